//! Configuration file management for relay.
//!
//! Provides a TOML-based config file at `~/.config/relay/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use relay_core::types::DEFAULT_HARD_TIMEOUT;
use relay_core::{Mode, ProviderType};

pub const TIMEOUT_ENV: &str = "RELAY_TIMEOUT_SECS";
pub const STALL_TIMEOUT_ENV: &str = "RELAY_STALL_TIMEOUT_SECS";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub defaults: DefaultsSection,
    pub binaries: BinariesSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DefaultsSection {
    /// Provider name; unset means auto-detect.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub mode: Option<Mode>,
    pub timeout_secs: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
}

/// Executable overrides, for CLIs installed outside `$PATH`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BinariesSection {
    pub claude: Option<PathBuf>,
    pub codex: Option<PathBuf>,
    pub gemini: Option<PathBuf>,
}

impl BinariesSection {
    pub fn get(&self, provider: ProviderType) -> Option<&PathBuf> {
        match provider {
            ProviderType::Claude => self.claude.as_ref(),
            ProviderType::Codex => self.codex.as_ref(),
            ProviderType::Gemini => self.gemini.as_ref(),
        }
    }
}

/// Written by `relay init`. Every key is optional.
pub const DEFAULT_CONFIG: &str = r#"# relay configuration
#
# Precedence: command-line flag > environment variable > this file > built-in default.

[defaults]
# Provider used when --provider and RELAY_PROVIDER are both unset.
# One of: claude, codex, gemini. Leave unset to auto-detect from $PATH.
# provider = "claude"

# Model id passed through to the provider CLI.
# model = ""

# interactive | headless | chat
mode = "headless"

# Hard ceiling on wall time (RELAY_TIMEOUT_SECS).
timeout_secs = 1800

# Maximum silence between two output chunks (RELAY_STALL_TIMEOUT_SECS).
# stall_timeout_secs = 300

[binaries]
# claude = "/usr/local/bin/claude"
# codex = "/usr/local/bin/codex"
# gemini = "/usr/local/bin/gemini"
"#;

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the relay config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/relay` or `~/.config/relay`,
/// including on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("relay");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("relay")
}

/// Return the path to the relay config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Like [`load_config`], but a missing file is an empty config. A file
/// that exists and does not parse is still an error.
pub fn load_config_if_present() -> Result<ConfigFile> {
    if !config_path().exists() {
        return Ok(ConfigFile::default());
    }
    load_config()
}

/// Write `contents` as the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(contents: &str) -> Result<PathBuf> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line. `None` falls through the chain.
#[derive(Debug, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub mode: Option<Mode>,
    pub timeout_secs: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct RelayConfig {
    /// Provider name from `RELAY_PROVIDER` or the config file. Handed to
    /// selection as-is, which ignores names it does not recognise.
    pub provider_hint: Option<String>,
    pub model: Option<String>,
    pub mode: Mode,
    pub hard_timeout: Duration,
    pub stall_timeout: Option<Duration>,
    pub binaries: BTreeMap<ProviderType, PathBuf>,
}

impl RelayConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Provider: `RELAY_PROVIDER` env > `defaults.provider` > auto-detect
    ///   (the `--provider` flag is applied by the caller)
    /// - Timeout: `--timeout` > `RELAY_TIMEOUT_SECS` > `defaults.timeout_secs` > 30 minutes
    /// - Stall timeout: `--stall-timeout` > `RELAY_STALL_TIMEOUT_SECS` >
    ///   `defaults.stall_timeout_secs` > none
    pub fn resolve(flags: Overrides) -> Result<Self> {
        let file = load_config_if_present()?;
        Self::resolve_with(flags, file)
    }

    fn resolve_with(flags: Overrides, file: ConfigFile) -> Result<Self> {
        let provider_hint = std::env::var(relay_core::registry::PROVIDER_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or(file.defaults.provider);

        let model = flags.model.or(file.defaults.model).filter(|m| !m.trim().is_empty());
        let mode = flags.mode.or(file.defaults.mode).unwrap_or_default();

        let hard_timeout = flags
            .timeout_secs
            .or(env_secs(TIMEOUT_ENV)?)
            .or(file.defaults.timeout_secs)
            .map_or(DEFAULT_HARD_TIMEOUT, Duration::from_secs);
        let stall_timeout = flags
            .stall_timeout_secs
            .or(env_secs(STALL_TIMEOUT_ENV)?)
            .or(file.defaults.stall_timeout_secs)
            .map(Duration::from_secs);

        let binaries = ProviderType::ALL
            .into_iter()
            .filter_map(|p| file.binaries.get(p).map(|path| (p, path.clone())))
            .collect();

        Ok(Self {
            provider_hint,
            model,
            mode,
            hard_timeout,
            stall_timeout,
            binaries,
        })
    }
}

fn env_secs(var: &str) -> Result<Option<u64>> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            let secs = value
                .trim()
                .parse()
                .with_context(|| {
                    format!("{var} must be a whole number of seconds, got {value:?}")
                })?;
            Ok(Some(secs))
        }
        _ => Ok(None),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        unsafe { std::env::remove_var(relay_core::registry::PROVIDER_ENV) };
        unsafe { std::env::remove_var(TIMEOUT_ENV) };
        unsafe { std::env::remove_var(STALL_TIMEOUT_ENV) };
    }

    fn file(contents: &str) -> ConfigFile {
        toml::from_str(contents).unwrap()
    }

    #[test]
    fn default_config_parses() {
        let cfg = file(DEFAULT_CONFIG);
        assert_eq!(cfg.defaults.mode, Some(Mode::Headless));
        assert_eq!(cfg.defaults.timeout_secs, Some(1800));
        assert!(cfg.defaults.provider.is_none());
        assert!(cfg.binaries.claude.is_none());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let _lock = lock_env();
        clear_env();

        let resolved = RelayConfig::resolve_with(Overrides::default(), file("")).unwrap();
        assert_eq!(resolved.mode, Mode::Headless);
        assert_eq!(resolved.hard_timeout, DEFAULT_HARD_TIMEOUT);
        assert!(resolved.stall_timeout.is_none());
        assert!(resolved.provider_hint.is_none());
        assert!(resolved.binaries.is_empty());
    }

    #[test]
    fn file_values_apply_when_nothing_else_is_set() {
        let _lock = lock_env();
        clear_env();

        let cfg = file(
            r#"
[defaults]
provider = "codex"
model = "o3"
mode = "chat"
timeout_secs = 60
stall_timeout_secs = 15

[binaries]
gemini = "/opt/gemini/bin/gemini"
"#,
        );
        let resolved = RelayConfig::resolve_with(Overrides::default(), cfg).unwrap();
        assert_eq!(resolved.provider_hint.as_deref(), Some("codex"));
        assert_eq!(resolved.model.as_deref(), Some("o3"));
        assert_eq!(resolved.mode, Mode::Chat);
        assert_eq!(resolved.hard_timeout, Duration::from_secs(60));
        assert_eq!(resolved.stall_timeout, Some(Duration::from_secs(15)));
        assert_eq!(
            resolved.binaries.get(&ProviderType::Gemini),
            Some(&PathBuf::from("/opt/gemini/bin/gemini"))
        );
    }

    #[test]
    fn env_var_overrides_config_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(relay_core::registry::PROVIDER_ENV, "gemini") };
        unsafe { std::env::set_var(TIMEOUT_ENV, "90") };

        let cfg = file("[defaults]\nprovider = \"codex\"\ntimeout_secs = 60\n");
        let resolved = RelayConfig::resolve_with(Overrides::default(), cfg).unwrap();
        assert_eq!(resolved.provider_hint.as_deref(), Some("gemini"));
        assert_eq!(resolved.hard_timeout, Duration::from_secs(90));

        clear_env();
    }

    #[test]
    fn cli_flag_overrides_all() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(STALL_TIMEOUT_ENV, "30") };

        let cfg = file("[defaults]\nstall_timeout_secs = 15\nmodel = \"a\"\n");
        let flags = Overrides {
            stall_timeout_secs: Some(5),
            model: Some("b".to_string()),
            ..Overrides::default()
        };
        let resolved = RelayConfig::resolve_with(flags, cfg).unwrap();
        assert_eq!(resolved.stall_timeout, Some(Duration::from_secs(5)));
        assert_eq!(resolved.model.as_deref(), Some("b"));

        clear_env();
    }

    #[test]
    fn malformed_env_timeout_is_an_error() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(TIMEOUT_ENV, "soon") };

        let err =
            RelayConfig::resolve_with(Overrides::default(), ConfigFile::default()).unwrap_err();

        clear_env();
        assert!(err.to_string().contains(TIMEOUT_ENV), "unexpected error: {err}");
    }

    #[test]
    fn unknown_mode_in_file_fails_to_parse() {
        let err = toml::from_str::<ConfigFile>("[defaults]\nmode = \"turbo\"\n").unwrap_err();
        assert!(err.to_string().contains("turbo"), "unexpected error: {err}");
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("relay/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
