//! Supervision of one agent process from spawn to a terminal state.
//!
//! Every adapter funnels through [`run_piped`] or [`run_pty`]. Both build a
//! [`RunningInvocation`] and drive it with a single `biased` `select!` over
//! process exit, caller cancellation, the hard timeout, the startup
//! timeout, the stall signal, the prompt writer and the output channel, in
//! that order. Process exit is polled first, so an exit that is ready in
//! the same turn as a timer wins.
//!
//! ```text
//! Spawning --prompt written--> Running --exit--> Completing --> Done
//!    |  (pty: Starting --session seen--> Running)
//!    +-- hard timeout --> TimingOut --+
//!    +-- no output    --> Stalling  --+--> Terminating --> Done
//!    +-- cancel       --> Cancelling -+
//! ```

pub mod output;
mod pty;

use std::fmt;
use std::future::pending;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::parser::{Dialect, StreamParser};
use crate::process::{
    ChildProcess, ExitState, KillOutcome, StallDetector, Terminable, TimeoutTimer,
    kill_process_gracefully,
};
use crate::provider::env::EnvPlan;
use crate::types::{AgentResult, InvocationRequest, ProviderType};

pub use output::{OutputChunk, Stream};
pub use pty::PtyChild;

/// SIGTERM-to-SIGKILL escalation window.
pub const KILL_ESCALATION: Duration = Duration::from_secs(5);

/// How long to keep reading after exit for output still in flight.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Default bound on the wait for a pty session to announce itself.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

const OUTPUT_CHANNEL: usize = 64;

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Spawning,
    /// Waiting for a pty session marker; stall detection not yet armed.
    Starting,
    Running,
    Completing,
    TimingOut,
    Stalling,
    Cancelling,
    Terminating,
    Done,
}

impl HarnessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarnessState::Spawning => "spawning",
            HarnessState::Starting => "starting",
            HarnessState::Running => "running",
            HarnessState::Completing => "completing",
            HarnessState::TimingOut => "timing_out",
            HarnessState::Stalling => "stalling",
            HarnessState::Cancelling => "cancelling",
            HarnessState::Terminating => "terminating",
            HarnessState::Done => "done",
        }
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing knobs for one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionConfig {
    pub hard_timeout: Duration,
    pub stall_timeout: Option<Duration>,
    /// When set, the stall detector stays disarmed until a session id shows
    /// up in the output, and this bounds the wait. The hard timeout runs
    /// from spawn either way.
    pub startup_timeout: Option<Duration>,
    pub kill_escalation: Duration,
    pub drain_grace: Duration,
}

impl SupervisionConfig {
    pub fn from_request(request: &InvocationRequest) -> Self {
        Self {
            hard_timeout: request.hard_timeout,
            stall_timeout: request.stall_timeout,
            startup_timeout: None,
            kill_escalation: KILL_ESCALATION,
            drain_grace: DRAIN_GRACE,
        }
    }

    pub fn with_startup_gate(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    pub fn with_kill_escalation(mut self, escalation: Duration) -> Self {
        self.kill_escalation = escalation;
        self
    }
}

/// A fully resolved command line, ready to spawn.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub provider: ProviderType,
    pub program: PathBuf,
    pub install_hint: &'static str,
    pub args: Vec<String>,
    pub env: EnvPlan,
    pub working_dir: PathBuf,
    /// Written to stdin (or typed into the pty), then closed.
    pub input: Option<String>,
    pub dialect: Dialect,
}

/// Spawn `spec` with piped stdio and supervise it.
pub async fn run_piped(
    spec: LaunchSpec,
    config: SupervisionConfig,
    cancel: CancellationToken,
) -> Result<AgentResult, ProviderError> {
    let label = spec.provider.as_str();
    check_working_dir(&spec)?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).current_dir(&spec.working_dir);
    spec.env.apply(&mut cmd);

    let mut child = ChildProcess::spawn(&mut cmd).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            ProviderError::binary_not_found(&spec.program.to_string_lossy(), spec.install_hint)
        }
        _ => ProviderError::spawn(label, e),
    })?;
    info!(provider = label, pid = ?child.pid(), args = ?spec.args, "spawned agent");

    let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL);
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.take_stdout() {
        readers.push(output::spawn_pipe_reader(stdout, Stream::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.take_stderr() {
        readers.push(output::spawn_pipe_reader(stderr, Stream::Stderr, tx));
    }

    let stdin = child.take_stdin();
    let prompt = spec.input;
    let input: BoxFuture<'static, io::Result<()>> = Box::pin(async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        if let Some(prompt) = prompt {
            stdin.write_all(prompt.as_bytes()).await?;
        }
        stdin.shutdown().await?;
        Ok(())
    });

    let parser = StreamParser::new(spec.dialect).with_label(label);
    RunningInvocation::new(spec.provider, child, rx, readers, parser, input, config)
        .run(cancel)
        .await
}

/// Spawn `spec` under a pseudo-terminal and supervise it.
pub async fn run_pty(
    spec: LaunchSpec,
    config: SupervisionConfig,
    cancel: CancellationToken,
) -> Result<AgentResult, ProviderError> {
    check_working_dir(&spec)?;

    let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL);
    let launch = pty::spawn(&spec, tx)?;
    info!(provider = spec.provider.as_str(), pid = ?launch.child.pid(), "spawned agent on pty");

    let parser = StreamParser::new(spec.dialect).with_label(spec.provider.as_str());
    RunningInvocation::new(
        spec.provider,
        launch.child,
        rx,
        vec![launch.reader],
        parser,
        launch.input,
        config,
    )
    .run(cancel)
    .await
}

fn check_working_dir(spec: &LaunchSpec) -> Result<(), ProviderError> {
    if spec.working_dir.is_dir() {
        return Ok(());
    }
    Err(ProviderError::spawn(
        spec.provider.as_str(),
        format!("working directory {} does not exist", spec.working_dir.display()),
    ))
}

/// How the select loop ended.
enum Outcome {
    Exited(io::Result<ExitState>),
    Cancelled,
    TimedOut,
    StartupTimedOut,
    Stalled,
}

/// Supervision state for a single spawned process. Never shared.
pub struct RunningInvocation<C: Terminable> {
    provider: ProviderType,
    child: C,
    output: mpsc::Receiver<OutputChunk>,
    readers: Vec<JoinHandle<()>>,
    parser: StreamParser,
    stderr: Vec<u8>,
    input: Option<BoxFuture<'static, io::Result<()>>>,
    config: SupervisionConfig,
    state: HarnessState,
    started: Instant,
    last_output: Instant,
    hard: Option<TimeoutTimer>,
    startup: Option<TimeoutTimer>,
    stall: Option<StallDetector>,
    stall_signal: CancellationToken,
}

impl<C: Terminable> RunningInvocation<C> {
    pub(crate) fn new(
        provider: ProviderType,
        child: C,
        output: mpsc::Receiver<OutputChunk>,
        readers: Vec<JoinHandle<()>>,
        parser: StreamParser,
        input: BoxFuture<'static, io::Result<()>>,
        config: SupervisionConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            provider,
            child,
            output,
            readers,
            parser,
            stderr: Vec::new(),
            input: Some(input),
            config,
            state: HarnessState::Spawning,
            started: now,
            last_output: now,
            hard: None,
            startup: None,
            stall: None,
            stall_signal: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    fn label(&self) -> &'static str {
        self.provider.as_str()
    }

    fn transition(&mut self, next: HarnessState) {
        debug!(
            provider = self.label(),
            from = %self.state,
            to = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "harness transition"
        );
        self.state = next;
    }

    fn arm_stall(&mut self) {
        if let Some(window) = self.config.stall_timeout {
            let signal = self.stall_signal.clone();
            self.stall = Some(StallDetector::spawn(window, move || signal.cancel()));
        }
    }

    fn disarm_timers(&mut self) {
        for timer in [&mut self.hard, &mut self.startup].into_iter().flatten() {
            timer.cancel();
        }
        if let Some(stall) = self.stall.take() {
            stall.cancel();
        }
    }

    fn accept(&mut self, chunk: OutputChunk) {
        self.last_output = Instant::now();
        if let Some(stall) = &self.stall {
            stall.touch();
        }
        match chunk.stream {
            Stream::Stdout => self.parser.push(&chunk.bytes),
            Stream::Stderr => self.stderr.extend_from_slice(&chunk.bytes),
        }
    }

    /// Drive the process to a terminal state. Consumes the invocation.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<AgentResult, ProviderError> {
        let gated = self.config.startup_timeout.is_some();
        self.hard = Some(TimeoutTimer::new(self.config.hard_timeout));
        match self.config.startup_timeout {
            Some(limit) => self.startup = Some(TimeoutTimer::new(limit)),
            None => self.arm_stall(),
        }

        let mut output_open = true;
        let outcome = loop {
            let writing = self.input.is_some();
            tokio::select! {
                biased;
                status = self.child.wait_exit() => break Outcome::Exited(status),
                _ = cancel.cancelled() => break Outcome::Cancelled,
                _ = expired(&mut self.hard) => break Outcome::TimedOut,
                _ = expired(&mut self.startup) => break Outcome::StartupTimedOut,
                _ = self.stall_signal.cancelled() => break Outcome::Stalled,
                written = poll_input(&mut self.input), if writing => {
                    self.input = None;
                    match written {
                        Ok(()) => debug!(provider = self.label(), "prompt written, stdin closed"),
                        // The agent may exit without reading its input; the
                        // exit status tells the real story.
                        Err(e) => {
                            warn!(provider = self.label(), error = %e, "failed to write prompt")
                        }
                    }
                    let next = if gated && self.parser.session_id().is_none() {
                        HarnessState::Starting
                    } else {
                        HarnessState::Running
                    };
                    self.transition(next);
                }
                chunk = self.output.recv(), if output_open => match chunk {
                    Some(chunk) => {
                        self.accept(chunk);
                        if self.startup.is_some() && self.parser.session_id().is_some() {
                            info!(
                                provider = self.label(),
                                session_id = self.parser.session_id().unwrap_or_default(),
                                "session started, arming stall detector"
                            );
                            self.startup = None;
                            self.arm_stall();
                            if self.input.is_none() {
                                self.transition(HarnessState::Running);
                            }
                        }
                    }
                    None => output_open = false,
                },
            }
        };

        let result = match outcome {
            Outcome::Exited(Ok(status)) => self.complete(status).await,
            Outcome::Exited(Err(e)) => {
                let err =
                    ProviderError::spawn(self.label(), format!("lost track of the process: {e}"));
                self.terminate(HarnessState::Terminating, err).await
            }
            Outcome::Cancelled => {
                let err = ProviderError::killed(self.label(), self.started.elapsed());
                self.terminate(HarnessState::Cancelling, err).await
            }
            Outcome::TimedOut => {
                let err = ProviderError::timeout(
                    self.label(),
                    self.started.elapsed(),
                    self.config.hard_timeout,
                );
                self.terminate(HarnessState::TimingOut, err).await
            }
            Outcome::StartupTimedOut => {
                let budget = self.config.startup_timeout.unwrap_or_default();
                let mut err = ProviderError::timeout(self.label(), self.started.elapsed(), budget);
                err.message = format!("{} (no session started)", err.message);
                self.terminate(HarnessState::TimingOut, err).await
            }
            Outcome::Stalled => {
                let window = self.config.stall_timeout.unwrap_or_default();
                let err = ProviderError::stall(self.label(), window, self.started.elapsed());
                self.terminate(HarnessState::Stalling, err).await
            }
        };

        self.transition(HarnessState::Done);
        match &result {
            Ok(r) => info!(
                provider = self.label(),
                success = r.success,
                records = r.records,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "agent finished"
            ),
            Err(e) => warn!(
                provider = self.label(),
                kind = %e.kind,
                elapsed_ms = e.elapsed.as_millis() as u64,
                "agent failed: {e}"
            ),
        }
        result
    }

    /// Exit observed: drain, then hand the output to the parser.
    async fn complete(&mut self, status: ExitState) -> Result<AgentResult, ProviderError> {
        self.transition(HarnessState::Completing);
        self.disarm_timers();
        self.drain().await;
        self.child.release();

        let elapsed = self.started.elapsed();
        let stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        info!(
            provider = self.label(),
            code = ?status.code,
            signal = ?status.signal,
            "agent exited"
        );

        if status.code != Some(0) {
            return Err(ProviderError::non_zero_exit(self.label(), status.code)
                .with_output(self.parser.captured(), stderr)
                .with_elapsed(elapsed));
        }

        let parser = std::mem::replace(&mut self.parser, StreamParser::new(Dialect::RawText));
        match parser.finish(status.code) {
            Ok(mut result) => {
                if result.duration_ms == 0 {
                    result.duration_ms = elapsed.as_millis() as u64;
                }
                Ok(result)
            }
            Err(mut err) => {
                err.partial_stderr = stderr;
                Err(err.with_elapsed(elapsed))
            }
        }
    }

    /// A timer fired or the caller gave up: stop the process, then report
    /// `err` with whatever output was collected.
    async fn terminate(
        &mut self,
        reason: HarnessState,
        err: ProviderError,
    ) -> Result<AgentResult, ProviderError> {
        self.transition(reason);
        self.disarm_timers();
        self.transition(HarnessState::Terminating);

        match kill_process_gracefully(&mut self.child, self.config.kill_escalation).await {
            Ok(KillOutcome::AlreadyExited(status)) => {
                debug!(provider = self.label(), "process exited before it could be stopped");
                return self.complete(status).await;
            }
            Ok(outcome) => debug!(provider = self.label(), ?outcome, "process stopped"),
            Err(e) => warn!(
                provider = self.label(),
                pid = ?self.child.pid(),
                error = %e,
                "failed to stop process"
            ),
        }

        self.drain().await;
        self.child.release();
        let stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        Err(err.with_output(self.parser.captured(), stderr))
    }

    /// Collect output still in flight, for at most the drain grace.
    async fn drain(&mut self) {
        let deadline = Instant::now() + self.config.drain_grace;
        while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, self.output.recv()).await {
            self.accept(chunk);
        }
        self.output.close();
    }
}

impl<C: Terminable> Drop for RunningInvocation<C> {
    fn drop(&mut self) {
        if let Some(stall) = self.stall.take() {
            stall.cancel();
        }
        for reader in &self.readers {
            reader.abort();
        }
        self.child.release();
    }
}

async fn expired(timer: &mut Option<TimeoutTimer>) {
    match timer {
        Some(timer) => timer.expired().await,
        None => pending().await,
    }
}

async fn poll_input(input: &mut Option<BoxFuture<'static, io::Result<()>>>) -> io::Result<()> {
    match input {
        Some(fut) => fut.await,
        None => pending().await,
    }
}
