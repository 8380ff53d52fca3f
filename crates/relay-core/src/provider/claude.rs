//! Claude Code adapter.
//!
//! Headless runs `claude -p --output-format stream-json` and parses the
//! JSONL stream; chat asks for a single `json` object; interactive starts
//! the TUI on a pseudo-terminal and waits for it to announce a session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{EnvPlan, Provider, effective_mode, model_args};
use crate::error::ProviderError;
use crate::harness::{self, DEFAULT_STARTUP_TIMEOUT, LaunchSpec, SupervisionConfig};
use crate::parser::Dialect;
use crate::registry::descriptor;
use crate::types::{AgentResult, InvocationRequest, Mode, ProviderType};

/// Vendor variables passed through an allow-listed environment.
pub(crate) const VENDOR_ENV: &[&str] = &["ANTHROPIC_*", "CLAUDE_*"];

/// Command-line arguments for `request`. The prompt is never among them.
pub(crate) fn build_args(request: &InvocationRequest) -> Vec<String> {
    let mut args: Vec<String> = match effective_mode(ProviderType::Claude, request.mode) {
        Mode::Headless => [
            "-p",
            "--output-format",
            "stream-json",
            "--verbose",
            "--dangerously-skip-permissions",
        ]
        .map(String::from)
        .to_vec(),
        Mode::Chat => ["-p", "--output-format", "json"].map(String::from).to_vec(),
        Mode::Interactive => Vec::new(),
    };
    args.extend(model_args(request));
    if let Some(context) = request.extra_context.as_deref().filter(|c| !c.trim().is_empty()) {
        args.push("--append-system-prompt".to_string());
        args.push(context.to_string());
    }
    args
}

pub(crate) fn build_env(request: &InvocationRequest) -> EnvPlan {
    match effective_mode(ProviderType::Claude, request.mode) {
        Mode::Headless => EnvPlan::allow_list(VENDOR_ENV, &request.env_overrides),
        Mode::Chat => EnvPlan::inherit(&request.env_overrides),
        Mode::Interactive => {
            let mut plan = EnvPlan::inherit(&request.env_overrides);
            plan.set_default("TERM", "xterm-256color");
            plan
        }
    }
}

/// Adapter for the `claude` CLI.
#[derive(Clone)]
pub struct ClaudeAdapter {
    binary: PathBuf,
}

impl std::fmt::Debug for ClaudeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeAdapter").field("binary", &self.binary).finish()
    }
}

impl ClaudeAdapter {
    /// Look for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary(descriptor(ProviderType::Claude).binary)
    }

    /// Use a specific executable, e.g. a non-standard install or a test
    /// double.
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self { binary: path.into() }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for ClaudeAdapter {
    fn provider(&self) -> ProviderType {
        ProviderType::Claude
    }

    fn binary(&self) -> &Path {
        &self.binary
    }

    fn launch_spec(&self, request: &InvocationRequest) -> LaunchSpec {
        let d = self.descriptor();
        let dialect = match request.mode {
            Mode::Interactive => Dialect::RawText,
            Mode::Headless | Mode::Chat => Dialect::Claude,
        };
        LaunchSpec {
            provider: ProviderType::Claude,
            program: self.binary.clone(),
            install_hint: d.install_hint,
            args: (d.args)(request),
            env: (d.env)(request),
            working_dir: request.working_dir.clone(),
            input: Some(request.prompt.clone()),
            dialect,
        }
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: CancellationToken,
    ) -> Result<AgentResult, ProviderError> {
        let spec = self.launch_spec(request);
        let config = SupervisionConfig::from_request(request);
        match request.mode {
            Mode::Interactive => {
                let config =
                    config.with_startup_gate(DEFAULT_STARTUP_TIMEOUT.min(request.hard_timeout));
                harness::run_pty(spec, config, cancel).await
            }
            Mode::Headless | Mode::Chat => harness::run_piped(spec, config, cancel).await,
        }
    }
}
