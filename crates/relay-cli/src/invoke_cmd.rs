//! `relay invoke`: run one prompt through the selected provider.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use relay_core::{
    AgentResult, ClaudeAdapter, CodexAdapter, GeminiAdapter, InvocationRequest, Mode,
    ProviderRegistry, ProviderType,
};

use crate::config::{Overrides, RelayConfig};

#[derive(Debug, Args)]
pub struct InvokeArgs {
    /// Provider to run (overrides RELAY_PROVIDER and the config file)
    #[arg(long)]
    pub provider: Option<ProviderType>,
    /// Model id passed through to the provider CLI
    #[arg(long)]
    pub model: Option<String>,
    /// interactive, headless or chat
    #[arg(long)]
    pub mode: Option<Mode>,
    /// Hard timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Seconds of silence tolerated before the run counts as stalled
    #[arg(long)]
    pub stall_timeout: Option<u64>,
    /// Working directory for the agent (defaults to the current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,
    /// Extra instructions appended to the system prompt where supported
    #[arg(long)]
    pub context: Option<String>,
    /// Print the full result as JSON instead of just the answer text
    #[arg(long)]
    pub json: bool,
    /// Prompt text; `-` or omitted reads it from stdin
    pub prompt: Option<String>,
}

/// The provider finished but reported its own failure.
#[derive(Debug, thiserror::Error)]
#[error("{provider} reported an unsuccessful result: {result}")]
pub struct UnsuccessfulResult {
    pub provider: ProviderType,
    pub result: String,
}

/// Build the registry, honouring `[binaries]` overrides.
pub fn build_registry(config: &RelayConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::with_defaults();
    for (provider, path) in &config.binaries {
        match provider {
            ProviderType::Claude => registry.register(ClaudeAdapter::with_binary(path)),
            ProviderType::Codex => registry.register(CodexAdapter::with_binary(path)),
            ProviderType::Gemini => registry.register(GeminiAdapter::with_binary(path)),
        };
    }
    registry
}

pub async fn run_invoke(args: InvokeArgs, cancel: CancellationToken) -> Result<()> {
    let config = RelayConfig::resolve(Overrides {
        model: args.model.clone(),
        mode: args.mode,
        timeout_secs: args.timeout,
        stall_timeout_secs: args.stall_timeout,
    })?;

    let prompt = read_prompt(args.prompt.as_deref()).await?;
    let working_dir = match args.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to read the current directory")?,
    };

    let registry = build_registry(&config);
    let provider = registry.select(args.provider, config.provider_hint.as_deref(), true)?;

    let mut request = InvocationRequest::new(provider.provider(), prompt)
        .with_mode(config.mode)
        .with_working_dir(working_dir)
        .with_hard_timeout(config.hard_timeout);
    if let Some(model) = config.model {
        request = request.with_model(model);
    }
    if let Some(stall) = config.stall_timeout {
        request = request.with_stall_timeout(stall);
    }
    if let Some(context) = args.context {
        request = request.with_extra_context(context);
    }

    tracing::info!(
        provider = %request.provider,
        mode = %request.mode,
        timeout_secs = request.hard_timeout.as_secs(),
        "invoking agent"
    );
    let result = provider.invoke(&request, cancel).await?;
    print_result(&result, args.json)?;

    if !result.success {
        return Err(UnsuccessfulResult {
            provider: request.provider,
            result: result.result,
        }
        .into());
    }
    Ok(())
}

async fn read_prompt(arg: Option<&str>) -> Result<String> {
    let prompt = match arg {
        Some(text) if text != "-" => text.to_string(),
        _ => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read prompt from stdin")?;
            buf
        }
    };
    if prompt.trim().is_empty() {
        bail!("prompt is empty; pass it as an argument or on stdin");
    }
    Ok(prompt)
}

fn print_result(result: &AgentResult, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(result).context("failed to serialize result")?;
        println!("{rendered}");
    } else {
        println!("{}", result.result.trim_end());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn config(binaries: BTreeMap<ProviderType, PathBuf>) -> RelayConfig {
        RelayConfig {
            provider_hint: None,
            model: None,
            mode: Mode::Headless,
            hard_timeout: Duration::from_secs(60),
            stall_timeout: None,
            binaries,
        }
    }

    #[test]
    fn registry_uses_configured_binaries() {
        let binaries = BTreeMap::from([(ProviderType::Codex, PathBuf::from("/opt/codex"))]);
        let registry = build_registry(&config(binaries));
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.get(ProviderType::Codex).unwrap().binary(),
            std::path::Path::new("/opt/codex")
        );
        assert_eq!(
            registry.get(ProviderType::Claude).unwrap().binary(),
            std::path::Path::new("claude")
        );
    }

    #[tokio::test]
    async fn prompt_argument_is_used_verbatim() {
        let prompt = read_prompt(Some("explain recursion")).await.unwrap();
        assert_eq!(prompt, "explain recursion");
    }

    #[test]
    fn unsuccessful_result_names_the_provider() {
        let err = UnsuccessfulResult {
            provider: ProviderType::Gemini,
            result: "quota exhausted".to_string(),
        };
        assert_eq!(err.to_string(), "gemini reported an unsuccessful result: quota exhausted");
    }
}
