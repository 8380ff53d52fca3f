//! Gemini CLI adapter.

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

pub(crate) const VENDOR_ENV: &[&str] = &["GEMINI_*", "GOOGLE_*"];

pub(crate) fn build_args(request: &InvocationRequest) -> Vec<String> {
    let mut args: Vec<String> = match effective_mode(ProviderType::Gemini, request.mode) {
        Mode::Headless => ["--output-format", "stream-json", "--yolo"].map(String::from).to_vec(),
        _ => ["--output-format", "json"].map(String::from).to_vec(),
    };
    args.extend(model_args(request));
    args
}

pub(crate) fn build_env(request: &InvocationRequest) -> EnvPlan {
    match effective_mode(ProviderType::Gemini, request.mode) {
        Mode::Headless => EnvPlan::allow_list(VENDOR_ENV, &request.env_overrides),
        _ => EnvPlan::inherit(&request.env_overrides),
    }
}

/// Adapter for the `gemini` CLI.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    binary: PathBuf,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::with_binary(descriptor(ProviderType::Gemini).binary)
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self { binary: path.into() }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for GeminiAdapter {
    fn provider(&self) -> ProviderType {
        ProviderType::Gemini
    }

    fn binary(&self) -> &Path {
        &self.binary
    }

    fn launch_spec(&self, request: &InvocationRequest) -> LaunchSpec {
        let d = self.descriptor();
        LaunchSpec {
            provider: ProviderType::Gemini,
            program: self.binary.clone(),
            install_hint: d.install_hint,
            args: (d.args)(request),
            env: (d.env)(request),
            working_dir: request.working_dir.clone(),
            input: Some(request.prompt_with_context()),
            dialect: Dialect::Gemini,
        }
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: CancellationToken,
    ) -> Result<AgentResult, ProviderError> {
        if request.mode == Mode::Interactive {
            warn!(provider = "gemini", "interactive mode is not supported, running as chat");
        }
        let spec = self.launch_spec(request);
        harness::run_piped(spec, SupervisionConfig::from_request(request), cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_streams_with_yolo() {
        let req = InvocationRequest::new(ProviderType::Gemini, "summarize");
        assert_eq!(build_args(&req), ["--output-format", "stream-json", "--yolo"]);
        assert!(build_env(&req).is_allow_list());
    }

    #[test]
    fn chat_asks_for_one_json_object() {
        let req = InvocationRequest::new(ProviderType::Gemini, "summarize")
            .with_mode(Mode::Chat)
            .with_model("gemini-2.5-pro");
        assert_eq!(
            build_args(&req),
            ["--output-format", "json", "--model", "gemini-2.5-pro"]
        );
        assert!(!build_env(&req).is_allow_list());
    }

    #[test]
    fn prompt_goes_to_stdin() {
        let req =
            InvocationRequest::new(ProviderType::Gemini, "summarize").with_extra_context("ctx");
        let spec = GeminiAdapter::with_binary("/usr/local/bin/gemini").launch_spec(&req);
        assert_eq!(spec.input.as_deref(), Some("ctx\n\nsummarize"));
        assert!(!spec.args.iter().any(|a| a == "summarize"));
        assert_eq!(spec.program, Path::new("/usr/local/bin/gemini"));
    }
}
