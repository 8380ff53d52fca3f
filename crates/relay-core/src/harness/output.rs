use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const READ_BUF: usize = 8 * 1024;

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Bytes read from a child in one `read` call.
#[derive(Debug)]
pub struct OutputChunk {
    pub stream: Stream,
    pub bytes: Vec<u8>,
}

/// Forward everything `reader` yields to `tx` until EOF, a read error, or
/// the receiver going away.
pub(crate) fn spawn_pipe_reader<R>(
    mut reader: R,
    stream: Stream,
    tx: mpsc::Sender<OutputChunk>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(?stream, error = %e, "pipe read failed");
                    break;
                }
            };
            let chunk = OutputChunk {
                stream,
                bytes: buf[..n].to_vec(),
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    })
}

/// Blocking counterpart of [`spawn_pipe_reader`] for pseudo-terminal
/// masters. Everything is reported as [`Stream::Stdout`].
pub(crate) fn spawn_blocking_reader(
    mut reader: Box<dyn io::Read + Send>,
    tx: mpsc::Sender<OutputChunk>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_BUF];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // EIO once the slave side is closed.
                Err(_) => break,
            };
            let chunk = OutputChunk {
                stream: Stream::Stdout,
                bytes: buf[..n].to_vec(),
            };
            if tx.blocking_send(chunk).is_err() {
                break;
            }
        }
    })
}
