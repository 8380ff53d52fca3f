//! The `Provider` trait and the per-vendor adapters.
//!
//! An adapter knows exactly two things about its CLI: how to turn an
//! [`InvocationRequest`] into a command line (args, environment, stdin
//! payload, output dialect) and whether it needs a pseudo-terminal.
//! Spawning, supervision and parsing are shared and live in
//! [`crate::harness`].

pub(crate) mod claude;
pub(crate) mod codex;
pub mod env;
pub(crate) mod gemini;

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::harness::LaunchSpec;
use crate::registry::{ProviderDescriptor, descriptor};
use crate::types::{AgentResult, InvocationRequest, Mode, ProviderType};

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use env::EnvPlan;
pub use gemini::GeminiAdapter;

/// Adapter interface for one agent CLI.
///
/// Object-safe, so adapters can live in a
/// [`ProviderRegistry`](crate::ProviderRegistry) as `Box<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider(&self) -> ProviderType;

    /// Path or bare name of the executable this adapter launches.
    fn binary(&self) -> &Path;

    fn descriptor(&self) -> &'static ProviderDescriptor {
        descriptor(self.provider())
    }

    /// The exact command line `invoke` would run for `request`.
    fn launch_spec(&self, request: &InvocationRequest) -> LaunchSpec;

    /// Run the agent to completion, honoring the request's timeouts and
    /// `cancel`. The child is confirmed gone before this returns.
    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: CancellationToken,
    ) -> Result<AgentResult, ProviderError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};

/// Modes without a native implementation on this provider run as `Chat`.
pub(crate) fn effective_mode(provider: ProviderType, requested: Mode) -> Mode {
    if descriptor(provider).modes.contains(&requested) {
        requested
    } else {
        Mode::Chat
    }
}

/// `["--model", m]` when a non-empty model was requested.
pub(crate) fn model_args(request: &InvocationRequest) -> Vec<String> {
    match request.model.as_deref().map(str::trim) {
        Some(model) if !model.is_empty() => vec!["--model".to_string(), model.to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_flag_only_when_model_given() {
        let req = InvocationRequest::new(ProviderType::Claude, "hi");
        assert!(model_args(&req).is_empty());

        let req = req.with_model("  ");
        assert!(model_args(&req).is_empty());

        let req = req.with_model("sonnet");
        assert_eq!(model_args(&req), ["--model", "sonnet"]);
    }

    #[test]
    fn launch_specs_come_from_the_descriptor_table() {
        let adapters: [Box<dyn Provider>; 3] = [
            Box::new(ClaudeAdapter::new()),
            Box::new(CodexAdapter::new()),
            Box::new(GeminiAdapter::new()),
        ];
        for adapter in adapters {
            let d = adapter.descriptor();
            for mode in [Mode::Interactive, Mode::Headless, Mode::Chat] {
                let req = InvocationRequest::new(adapter.provider(), "hi")
                    .with_mode(mode)
                    .with_model("m1");
                let spec = adapter.launch_spec(&req);
                assert_eq!(spec.args, (d.args)(&req), "{} {mode}", d.binary);
                assert_eq!(spec.env.is_allow_list(), (d.env)(&req).is_allow_list());
                assert_eq!(spec.install_hint, d.install_hint);
            }
        }
    }

    #[test]
    fn unsupported_modes_fall_back_to_chat() {
        assert_eq!(effective_mode(ProviderType::Claude, Mode::Interactive), Mode::Interactive);
        assert_eq!(effective_mode(ProviderType::Codex, Mode::Interactive), Mode::Chat);
        assert_eq!(effective_mode(ProviderType::Gemini, Mode::Headless), Mode::Headless);
    }
}
