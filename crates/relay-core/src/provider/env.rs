//! Child environment construction.
//!
//! Modes that hand the agent elevated permissions run with an allow-listed
//! environment: a base set every CLI needs to start, the vendor's own
//! credential variables, and whatever the caller passed explicitly.
//! Everything else in the parent environment (other vendors' keys, cloud
//! credentials, tokens) is withheld.

use std::collections::BTreeMap;

use portable_pty::CommandBuilder;
use tokio::process::Command;

/// Variables passed to every elevated child. Entries ending in `*` match by
/// prefix.
pub const BASE_ALLOW_LIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "TERM",
    "LANG",
    "LC_*",
    "TMPDIR",
    "TZ",
    "XDG_*",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "NODE_EXTRA_CA_CERTS",
];

/// How the child's environment is derived from the parent's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvPlan {
    /// Inherit the parent environment, then apply `overrides`.
    Inherit { overrides: BTreeMap<String, String> },
    /// Start from an empty environment holding exactly `vars`.
    AllowList { vars: BTreeMap<String, String> },
}

impl EnvPlan {
    pub fn inherit(overrides: &BTreeMap<String, String>) -> Self {
        EnvPlan::Inherit {
            overrides: overrides.clone(),
        }
    }

    /// Allow-list built from the current process environment.
    pub fn allow_list(vendor: &[&str], overrides: &BTreeMap<String, String>) -> Self {
        Self::allow_list_from(std::env::vars(), vendor, overrides)
    }

    /// Allow-list built from an explicit variable source.
    pub fn allow_list_from<I>(
        source: I,
        vendor: &[&str],
        overrides: &BTreeMap<String, String>,
    ) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: BTreeMap<String, String> = source
            .into_iter()
            .filter(|(key, _)| {
                BASE_ALLOW_LIST
                    .iter()
                    .chain(vendor)
                    .any(|pattern| matches_pattern(pattern, key))
            })
            .collect();
        vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        EnvPlan::AllowList { vars }
    }

    /// Set `key` unless the plan already provides it (or, for
    /// [`EnvPlan::Inherit`], the parent does).
    pub fn set_default(&mut self, key: &str, value: &str) {
        match self {
            EnvPlan::Inherit { overrides } => {
                if std::env::var_os(key).is_none() {
                    overrides.entry(key.to_string()).or_insert_with(|| value.to_string());
                }
            }
            EnvPlan::AllowList { vars } => {
                vars.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }
    }

    /// The value the child will see for `key`, if the plan determines it.
    /// For [`EnvPlan::Inherit`] this falls back to the parent environment.
    pub fn get(&self, key: &str) -> Option<String> {
        match self {
            EnvPlan::Inherit { overrides } => overrides
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok()),
            EnvPlan::AllowList { vars } => vars.get(key).cloned(),
        }
    }

    pub fn is_allow_list(&self) -> bool {
        matches!(self, EnvPlan::AllowList { .. })
    }

    pub fn apply(&self, cmd: &mut Command) {
        match self {
            EnvPlan::Inherit { overrides } => {
                cmd.envs(overrides);
            }
            EnvPlan::AllowList { vars } => {
                cmd.env_clear().envs(vars);
            }
        }
    }

    pub fn apply_pty(&self, cmd: &mut CommandBuilder) {
        let vars = match self {
            EnvPlan::Inherit { overrides } => overrides,
            EnvPlan::AllowList { vars } => {
                cmd.env_clear();
                vars
            }
        };
        for (key, value) in vars {
            cmd.env(key, value);
        }
    }
}

fn matches_pattern(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}
