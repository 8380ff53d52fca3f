use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitState {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitState {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Result of [`kill_process_gracefully`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The process had already exited; nothing was sent.
    AlreadyExited(ExitState),
    /// The process exited within the escalation window after SIGTERM.
    Terminated(ExitState),
    /// SIGKILL was needed.
    Killed(ExitState),
}

impl KillOutcome {
    pub fn exit_state(&self) -> ExitState {
        match *self {
            KillOutcome::AlreadyExited(s)
            | KillOutcome::Terminated(s)
            | KillOutcome::Killed(s) => s,
        }
    }
}

/// A child process that can be signalled and awaited.
///
/// Implemented for piped children ([`ChildProcess`]) and for children
/// running under a pseudo-terminal.
#[async_trait]
pub trait Terminable: Send {
    /// OS pid, `None` once the process has been reaped.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> io::Result<Option<ExitState>>;

    /// Wait for exit. Must be cancel-safe: it is polled inside `select!`.
    async fn wait_exit(&mut self) -> io::Result<ExitState>;

    /// Ask the process (group) to stop.
    fn terminate(&mut self) -> io::Result<()>;

    /// Stop the process (group) unconditionally.
    fn force_kill(&mut self) -> io::Result<()>;

    /// Release auxiliary resources (e.g. a pseudo-terminal). Called on
    /// every terminal path; must be idempotent.
    fn release(&mut self) {}
}

/// Send SIGTERM, wait up to `escalation`, then SIGKILL.
///
/// Returns only once exit is confirmed. Calling it on a process that has
/// already exited returns [`KillOutcome::AlreadyExited`] without sending
/// anything, so it is safe to call twice.
pub async fn kill_process_gracefully<C>(
    child: &mut C,
    escalation: Duration,
) -> io::Result<KillOutcome>
where
    C: Terminable + ?Sized,
{
    if let Some(state) = child.try_exit()? {
        return Ok(KillOutcome::AlreadyExited(state));
    }

    let pid = child.pid();
    if let Err(e) = child.terminate() {
        warn!(?pid, error = %e, "SIGTERM failed, proceeding to SIGKILL");
    }

    match tokio::time::timeout(escalation, child.wait_exit()).await {
        Ok(Ok(state)) => {
            debug!(?pid, "process exited after SIGTERM");
            Ok(KillOutcome::Terminated(state))
        }
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => {
            warn!(
                ?pid,
                escalation_ms = escalation.as_millis() as u64,
                "process ignored SIGTERM, sending SIGKILL"
            );
            child.force_kill()?;
            let state = child.wait_exit().await?;
            Ok(KillOutcome::Killed(state))
        }
    }
}

/// A piped child spawned into its own process group, so signals reach any
/// helpers it forks as well.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    /// Captured at spawn; `Child::id` goes away once the child is reaped.
    pid: Option<u32>,
    exit: Option<ExitState>,
}

impl ChildProcess {
    /// Spawn `cmd` with stdin/stdout/stderr piped.
    pub fn spawn(cmd: &mut Command) -> io::Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let pid = child.id();
        Ok(Self {
            child,
            pid,
            exit: None,
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        // SAFETY: plain syscall on a pid we spawned as a group leader.
        let ret = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Group already gone.
            return Ok(());
        }
        Err(err)
    }
}

#[async_trait]
impl Terminable for ChildProcess {
    fn pid(&self) -> Option<u32> {
        if self.exit.is_some() { None } else { self.pid }
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitState>> {
        if let Some(state) = self.exit {
            return Ok(Some(state));
        }
        let state = self.child.try_wait()?.map(ExitState::from);
        self.exit = state;
        Ok(state)
    }

    async fn wait_exit(&mut self) -> io::Result<ExitState> {
        if let Some(state) = self.exit {
            return Ok(state);
        }
        let state = ExitState::from(self.child.wait().await?);
        self.exit = Some(state);
        Ok(state)
    }

    fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.signal_group(libc::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    fn force_kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL)?;
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped by a concurrent wait.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}
