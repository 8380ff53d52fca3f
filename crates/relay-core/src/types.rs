//! Request and result types shared by every provider.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard ceiling applied when the caller does not pick one (30 minutes).
pub const DEFAULT_HARD_TIMEOUT: Duration = Duration::from_secs(1800);

/// The closed set of agent CLIs this crate knows how to drive.
///
/// The declaration order is the auto-detection priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Claude,
    Codex,
    Gemini,
}

impl ProviderType {
    /// Every provider, in auto-detection priority order.
    pub const ALL: [ProviderType; 3] =
        [ProviderType::Claude, ProviderType::Codex, ProviderType::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Claude => "claude",
            ProviderType::Codex => "codex",
            ProviderType::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a provider or mode name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what} {value:?} (expected one of: {expected})")]
pub struct UnknownName {
    pub what: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl FromStr for ProviderType {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "claude-code" => Ok(ProviderType::Claude),
            "codex" => Ok(ProviderType::Codex),
            "gemini" => Ok(ProviderType::Gemini),
            _ => Err(UnknownName {
                what: "provider",
                value: s.to_string(),
                expected: "claude, codex, gemini",
            }),
        }
    }
}

/// How the agent is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Under a pseudo-terminal, used to capture a session id from a tool
    /// that otherwise only talks to a terminal.
    Interactive,
    /// Autonomous run with elevated permissions and streaming output.
    #[default]
    Headless,
    /// Single question/answer turn, no elevated permissions.
    Chat,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Interactive => "interactive",
            Mode::Headless => "headless",
            Mode::Chat => "chat",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" => Ok(Mode::Interactive),
            "headless" => Ok(Mode::Headless),
            "chat" => Ok(Mode::Chat),
            _ => Err(UnknownName {
                what: "mode",
                value: s.to_string(),
                expected: "interactive, headless, chat",
            }),
        }
    }
}

/// Everything needed to run one prompt against one provider.
///
/// Built once by the caller and only ever borrowed by the adapter and
/// the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub prompt: String,
    pub provider: ProviderType,
    /// Provider-specific model id. `None` leaves the CLI's own default alone.
    pub model: Option<String>,
    pub mode: Mode,
    pub working_dir: PathBuf,
    /// Absolute ceiling on wall time; output does not extend it.
    pub hard_timeout: Duration,
    /// Maximum silence tolerated between two output chunks.
    pub stall_timeout: Option<Duration>,
    /// Extra instructions appended to the system prompt where supported.
    pub extra_context: Option<String>,
    /// Variables the caller wants set in the child, resolved upstream.
    pub env_overrides: BTreeMap<String, String>,
}

impl InvocationRequest {
    /// Start a request with defaults: headless, current directory, 30 minute
    /// hard timeout, no stall timeout.
    pub fn new(provider: ProviderType, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            provider,
            model: None,
            mode: Mode::default(),
            working_dir: PathBuf::from("."),
            hard_timeout: DEFAULT_HARD_TIMEOUT,
            stall_timeout: None,
            extra_context: None,
            env_overrides: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_hard_timeout(mut self, timeout: Duration) -> Self {
        self.hard_timeout = timeout;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    pub fn with_extra_context(mut self, context: impl Into<String>) -> Self {
        self.extra_context = Some(context.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    /// The prompt with `extra_context` prepended, for CLIs that have no
    /// system-prompt flag.
    pub fn prompt_with_context(&self) -> String {
        match self.extra_context.as_deref().map(str::trim) {
            Some(ctx) if !ctx.is_empty() => format!("{ctx}\n\n{}", self.prompt),
            _ => self.prompt.clone(),
        }
    }
}

/// Token counts reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The normalized outcome of a finished invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    /// `false` when the provider itself reported an error result.
    pub success: bool,
    pub result: String,
    pub cost: Option<f64>,
    pub duration_ms: u64,
    pub session_id: Option<String>,
    /// Number of output records consumed while producing this result.
    pub records: usize,
    pub exit_code: Option<i32>,
    pub usage: Option<TokenUsage>,
}
