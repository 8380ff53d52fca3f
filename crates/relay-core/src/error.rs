//! The terminal error type of an invocation.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// How much of stderr/stdout is quoted inside a user-facing message.
const EXCERPT_CHARS: usize = 400;

/// Why an invocation ended without an [`AgentResult`](crate::AgentResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The hard timeout elapsed before the process exited.
    Timeout,
    /// No output arrived within the stall window.
    Stall,
    /// The process exited with a non-zero status (or was killed by a
    /// signal nobody in this crate sent).
    NonZeroExit,
    /// The process exited cleanly but printed nothing parsable.
    ParseFailure,
    /// The provider binary is not installed. Always reported before spawn.
    BinaryNotFound,
    /// The caller cancelled the invocation.
    Killed,
    /// The binary exists but the process could not be started.
    Spawn,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Stall => "stall",
            ErrorKind::NonZeroExit => "non_zero_exit",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::BinaryNotFound => "binary_not_found",
            ErrorKind::Killed => "killed",
            ErrorKind::Spawn => "spawn",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, terminal invocation failure.
///
/// Carries whatever the process printed before the failure so callers can
/// decide whether to retry, switch provider or give up.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub partial_stdout: String,
    pub partial_stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl ProviderError {
    fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            partial_stdout: String::new(),
            partial_stderr: String::new(),
            exit_code: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn timeout(label: &str, elapsed: Duration, budget: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!(
                "{label} timed out after {} (budget {})",
                fmt_duration(elapsed),
                fmt_duration(budget)
            ),
        )
        .with_elapsed(elapsed)
    }

    pub fn stall(label: &str, window: Duration, elapsed: Duration) -> Self {
        Self::new(
            ErrorKind::Stall,
            format!(
                "{label} produced no output for {} and was stopped after {}",
                fmt_duration(window),
                fmt_duration(elapsed)
            ),
        )
        .with_elapsed(elapsed)
    }

    /// `code == None` means the process was terminated by a signal.
    pub fn non_zero_exit(label: &str, code: Option<i32>) -> Self {
        let message = match code {
            Some(code) => format!("{label} exited with code {code}"),
            None => format!("{label} was terminated by a signal"),
        };
        let mut err = Self::new(ErrorKind::NonZeroExit, message);
        err.exit_code = code;
        err
    }

    pub fn parse_failure(label: &str, detail: &str) -> Self {
        let mut err = Self::new(
            ErrorKind::ParseFailure,
            format!("{label} output could not be parsed: {detail}"),
        );
        err.exit_code = Some(0);
        err
    }

    pub fn binary_not_found(binary: &str, install_hint: &str) -> Self {
        Self::new(
            ErrorKind::BinaryNotFound,
            format!("`{binary}` was not found on PATH.\n{install_hint}"),
        )
    }

    /// Nothing could be selected: lists every candidate's install hint.
    pub fn no_provider_available(candidates: &[(&str, &str)]) -> Self {
        let names: Vec<String> =
            candidates.iter().map(|(binary, _)| format!("`{binary}`")).collect();
        let hints: Vec<&str> = candidates.iter().map(|(_, hint)| *hint).collect();
        Self::new(
            ErrorKind::BinaryNotFound,
            format!(
                "no agent CLI found on PATH (looked for {}).\n{}",
                names.join(", "),
                hints.join("\n")
            ),
        )
    }

    pub fn killed(label: &str, elapsed: Duration) -> Self {
        Self::new(
            ErrorKind::Killed,
            format!("{label} was cancelled after {}", fmt_duration(elapsed)),
        )
        .with_elapsed(elapsed)
    }

    pub fn spawn(label: &str, detail: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Spawn, format!("failed to start {label}: {detail}"))
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Attach captured output. For [`ErrorKind::NonZeroExit`] the tail of
    /// stderr is also quoted in the message, since that is usually where
    /// the CLI explains itself.
    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.partial_stdout = stdout.into();
        self.partial_stderr = stderr.into();
        if self.kind == ErrorKind::NonZeroExit {
            let quoted = if self.partial_stderr.trim().is_empty() {
                self.partial_stdout.trim()
            } else {
                self.partial_stderr.trim()
            };
            if !quoted.is_empty() {
                self.message = format!("{}: {}", self.message, tail(quoted, EXCERPT_CHARS));
            }
        }
        self
    }

    /// `true` for kinds where trying again (or trying another provider)
    /// is a reasonable reaction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout | ErrorKind::Stall | ErrorKind::NonZeroExit
        )
    }
}

/// The last `max` characters of `text`, prefixed with an ellipsis when cut.
fn tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - max).collect();
    format!("...{skipped}")
}

pub(crate) fn fmt_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
