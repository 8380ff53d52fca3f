use std::path::Path;

use tracing::{debug, warn};

use super::probe::{BinaryProbe, PathProbe};
use crate::error::ProviderError;
use crate::provider::{EnvPlan, claude, codex, gemini};
use crate::types::{InvocationRequest, Mode, ProviderType};

/// Environment variable consulted when no provider is passed explicitly.
pub const PROVIDER_ENV: &str = "RELAY_PROVIDER";

/// Static facts about one provider. One entry per [`ProviderType`], never
/// mutated.
#[derive(Debug)]
pub struct ProviderDescriptor {
    pub provider: ProviderType,
    /// Executable looked up on `$PATH`.
    pub binary: &'static str,
    pub display_name: &'static str,
    pub install_hint: &'static str,
    /// Modes the CLI supports natively; others run as [`Mode::Chat`].
    pub modes: &'static [Mode],
    pub args: fn(&InvocationRequest) -> Vec<String>,
    pub env: fn(&InvocationRequest) -> EnvPlan,
}

/// Priority order: the first available entry wins auto-detection.
static DESCRIPTORS: [ProviderDescriptor; 3] = [
    ProviderDescriptor {
        provider: ProviderType::Claude,
        binary: "claude",
        display_name: "Claude Code",
        install_hint: "Install Claude Code: npm install -g @anthropic-ai/claude-code",
        modes: &[Mode::Interactive, Mode::Headless, Mode::Chat],
        args: claude::build_args,
        env: claude::build_env,
    },
    ProviderDescriptor {
        provider: ProviderType::Codex,
        binary: "codex",
        display_name: "Codex CLI",
        install_hint: "Install Codex CLI: npm install -g @openai/codex",
        modes: &[Mode::Headless, Mode::Chat],
        args: codex::build_args,
        env: codex::build_env,
    },
    ProviderDescriptor {
        provider: ProviderType::Gemini,
        binary: "gemini",
        display_name: "Gemini CLI",
        install_hint: "Install Gemini CLI: npm install -g @google/gemini-cli",
        modes: &[Mode::Headless, Mode::Chat],
        args: gemini::build_args,
        env: gemini::build_env,
    },
];

pub fn descriptor(provider: ProviderType) -> &'static ProviderDescriptor {
    match provider {
        ProviderType::Claude => &DESCRIPTORS[0],
        ProviderType::Codex => &DESCRIPTORS[1],
        ProviderType::Gemini => &DESCRIPTORS[2],
    }
}

/// Every descriptor, in auto-detection priority order.
pub fn descriptors() -> &'static [ProviderDescriptor] {
    &DESCRIPTORS
}

/// Pick a provider: `explicit`, else a parsable `env_override`, else (when
/// `auto_detect`) the first provider whose binary is on `$PATH`.
///
/// An unrecognized `env_override` is logged and ignored.
pub fn select_provider(
    explicit: Option<ProviderType>,
    env_override: Option<&str>,
    auto_detect: bool,
) -> Result<&'static ProviderDescriptor, ProviderError> {
    select_provider_with(&PathProbe, explicit, env_override, auto_detect)
}

/// [`select_provider`] with a custom probe.
pub fn select_provider_with(
    probe: &dyn BinaryProbe,
    explicit: Option<ProviderType>,
    env_override: Option<&str>,
    auto_detect: bool,
) -> Result<&'static ProviderDescriptor, ProviderError> {
    let candidates = DESCRIPTORS.iter().map(|d| (d.provider, Path::new(d.binary)));
    pick(probe, explicit, env_override, auto_detect, candidates).map(descriptor)
}

/// Fail fast if `provider`'s binary is not on `$PATH`.
pub fn validate_provider(provider: ProviderType) -> Result<(), ProviderError> {
    let d = descriptor(provider);
    validate_binary(&PathProbe, provider, Path::new(d.binary))
}

pub(crate) fn validate_binary(
    probe: &dyn BinaryProbe,
    provider: ProviderType,
    binary: &Path,
) -> Result<(), ProviderError> {
    if probe.is_available(binary) {
        return Ok(());
    }
    Err(ProviderError::binary_not_found(
        &binary.to_string_lossy(),
        descriptor(provider).install_hint,
    ))
}

/// Selection shared by the free functions and the registry. `candidates`
/// must be in priority order.
pub(crate) fn pick<'a, I>(
    probe: &dyn BinaryProbe,
    explicit: Option<ProviderType>,
    env_override: Option<&str>,
    auto_detect: bool,
    candidates: I,
) -> Result<ProviderType, ProviderError>
where
    I: IntoIterator<Item = (ProviderType, &'a Path)> + Clone,
{
    if let Some(provider) = explicit {
        debug!(provider = provider.as_str(), "using explicitly selected provider");
        return Ok(provider);
    }

    if let Some(raw) = env_override.map(str::trim).filter(|raw| !raw.is_empty()) {
        match raw.parse::<ProviderType>() {
            Ok(provider) => {
                debug!(provider = provider.as_str(), "using provider from {PROVIDER_ENV}");
                return Ok(provider);
            }
            Err(e) => warn!(value = raw, "ignoring {PROVIDER_ENV}: {e}"),
        }
    }

    if auto_detect {
        for (provider, binary) in candidates.clone() {
            if probe.is_available(binary) {
                debug!(
                    provider = provider.as_str(),
                    binary = %binary.display(),
                    "auto-detected provider"
                );
                return Ok(provider);
            }
        }
    }

    let tried: Vec<(String, &str)> = candidates
        .into_iter()
        .map(|(provider, binary)| {
            (binary.to_string_lossy().into_owned(), descriptor(provider).install_hint)
        })
        .collect();
    let tried: Vec<(&str, &str)> = tried.iter().map(|(b, h)| (b.as_str(), *h)).collect();
    Err(ProviderError::no_provider_available(&tried))
}
