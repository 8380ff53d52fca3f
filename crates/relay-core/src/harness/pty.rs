//! Children running under a pseudo-terminal.

use std::io::{self, Write};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::LaunchSpec;
use super::output::{OutputChunk, spawn_blocking_reader};
use crate::error::ProviderError;
use crate::process::{ExitState, Terminable};

const PTY_SIZE: PtySize = PtySize {
    rows: 40,
    cols: 120,
    pixel_width: 0,
    pixel_height: 0,
};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A child attached to the slave side of a pty we own the master of.
///
/// The child is a session leader, so its pid is also its process group id
/// and signals are sent to the whole group.
pub struct PtyChild {
    child: Box<dyn Child + Send + Sync>,
    master: Option<Box<dyn MasterPty + Send>>,
    pid: Option<u32>,
    exit: Option<ExitState>,
}

impl std::fmt::Debug for PtyChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyChild")
            .field("pid", &self.pid)
            .field("exit", &self.exit)
            .field("master_open", &self.master.is_some())
            .finish()
    }
}

impl PtyChild {
    fn signal_group(&self, signal: libc::c_int) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        // SAFETY: plain syscall; the pty child leads its own session.
        let ret = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }
}

#[async_trait]
impl Terminable for PtyChild {
    fn pid(&self) -> Option<u32> {
        if self.exit.is_some() { None } else { self.pid }
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitState>> {
        if let Some(state) = self.exit {
            return Ok(Some(state));
        }
        let state = self.child.try_wait()?.map(|status| {
            if status.signal().is_some() {
                ExitState {
                    code: None,
                    signal: None,
                }
            } else {
                ExitState {
                    code: Some(status.exit_code() as i32),
                    signal: None,
                }
            }
        });
        self.exit = state;
        Ok(state)
    }

    async fn wait_exit(&mut self) -> io::Result<ExitState> {
        loop {
            if let Some(state) = self.try_exit()? {
                return Ok(state);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.signal_group(libc::SIGTERM)
    }

    // portable-pty's own `kill` sends SIGHUP and then blocks; signal the
    // group directly instead.
    fn force_kill(&mut self) -> io::Result<()> {
        self.signal_group(libc::SIGKILL)
    }

    fn release(&mut self) {
        if self.master.take().is_some() {
            debug!(pid = ?self.pid, "released pty master");
        }
    }
}

impl Drop for PtyChild {
    fn drop(&mut self) {
        if self.exit.is_none() && matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.signal_group(libc::SIGKILL);
        }
    }
}

/// Everything the harness needs from a freshly spawned pty child.
pub(crate) struct PtyLaunch {
    pub child: PtyChild,
    pub reader: JoinHandle<()>,
    pub input: BoxFuture<'static, io::Result<()>>,
}

/// Open a pty, start `spec.program` on it and begin reading the master.
///
/// The prompt (if any) is typed into the terminal followed by a carriage
/// return; dropping the writer afterwards sends end-of-transmission.
pub(crate) fn spawn(
    spec: &LaunchSpec,
    tx: mpsc::Sender<OutputChunk>,
) -> Result<PtyLaunch, ProviderError> {
    let label = spec.provider.as_str();
    let program = which::which(&spec.program).map_err(|_| {
        ProviderError::binary_not_found(&spec.program.to_string_lossy(), spec.install_hint)
    })?;

    let pair = native_pty_system()
        .openpty(PTY_SIZE)
        .map_err(|e| {
            ProviderError::spawn(label, format!("could not open a pseudo-terminal: {e}"))
        })?;

    let mut cmd = CommandBuilder::new(&program);
    cmd.args(&spec.args);
    cmd.cwd(&spec.working_dir);
    spec.env.apply_pty(&mut cmd);

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| ProviderError::spawn(label, e))?;
    // Our copy of the slave must go, or the reader never sees EOF.
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| ProviderError::spawn(label, format!("pty reader: {e}")))?;
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|e| ProviderError::spawn(label, format!("pty writer: {e}")))?;

    let pid = child.process_id();
    let reader = spawn_blocking_reader(reader, tx);

    let prompt = spec.input.clone();
    let input: BoxFuture<'static, io::Result<()>> = Box::pin(async move {
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            if let Some(prompt) = prompt {
                writer.write_all(prompt.as_bytes())?;
                writer.write_all(b"\r")?;
                writer.flush()?;
            }
            drop(writer);
            Ok(())
        })
        .await
        .map_err(io::Error::other)?
    });

    Ok(PtyLaunch {
        child: PtyChild {
            child,
            master: Some(pair.master),
            pid,
            exit: None,
        },
        reader,
        input,
    })
}
