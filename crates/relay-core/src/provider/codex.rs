//! Codex CLI adapter (`codex exec --json`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{EnvPlan, Provider, effective_mode, model_args};
use crate::error::ProviderError;
use crate::harness::{self, LaunchSpec, SupervisionConfig};
use crate::parser::Dialect;
use crate::registry::descriptor;
use crate::types::{AgentResult, InvocationRequest, Mode, ProviderType};

pub(crate) const VENDOR_ENV: &[&str] = &["OPENAI_*", "CODEX_*", "AZURE_OPENAI_API_KEY"];

pub(crate) fn build_args(request: &InvocationRequest) -> Vec<String> {
    let mut args: Vec<String> =
        ["exec", "--json", "--skip-git-repo-check"].map(String::from).to_vec();
    args.extend(model_args(request));
    match effective_mode(ProviderType::Codex, request.mode) {
        Mode::Headless => args.push("--full-auto".to_string()),
        _ => args.extend(["--sandbox", "read-only"].map(String::from)),
    }
    // Read the prompt from stdin.
    args.push("-".to_string());
    args
}

pub(crate) fn build_env(request: &InvocationRequest) -> EnvPlan {
    match effective_mode(ProviderType::Codex, request.mode) {
        Mode::Headless => EnvPlan::allow_list(VENDOR_ENV, &request.env_overrides),
        _ => EnvPlan::inherit(&request.env_overrides),
    }
}

/// Adapter for the `codex` CLI.
#[derive(Debug, Clone)]
pub struct CodexAdapter {
    binary: PathBuf,
}

impl CodexAdapter {
    pub fn new() -> Self {
        Self::with_binary(descriptor(ProviderType::Codex).binary)
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self { binary: path.into() }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for CodexAdapter {
    fn provider(&self) -> ProviderType {
        ProviderType::Codex
    }

    fn binary(&self) -> &Path {
        &self.binary
    }

    fn launch_spec(&self, request: &InvocationRequest) -> LaunchSpec {
        let d = self.descriptor();
        LaunchSpec {
            provider: ProviderType::Codex,
            program: self.binary.clone(),
            install_hint: d.install_hint,
            args: (d.args)(request),
            env: (d.env)(request),
            working_dir: request.working_dir.clone(),
            // No system-prompt flag; context rides along with the prompt.
            input: Some(request.prompt_with_context()),
            dialect: Dialect::Codex,
        }
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: CancellationToken,
    ) -> Result<AgentResult, ProviderError> {
        if request.mode == Mode::Interactive {
            warn!(provider = "codex", "interactive mode is not supported, running as chat");
        }
        let spec = self.launch_spec(request);
        harness::run_piped(spec, SupervisionConfig::from_request(request), cancel).await
    }
}
