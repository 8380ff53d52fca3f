//! `relay providers`: which agent CLIs are installed.

use anyhow::Result;

use relay_core::registry::descriptor;
use relay_core::{Mode, ProviderRegistry};

use crate::config::{Overrides, RelayConfig};
use crate::invoke_cmd::build_registry;

pub fn run_providers() -> Result<()> {
    let config = RelayConfig::resolve(Overrides::default())?;
    let registry = build_registry(&config);
    print!("{}", render_table(&registry));
    Ok(())
}

fn render_table(registry: &ProviderRegistry) -> String {
    let mut out = format!(
        "{:<8} {:<12} {:<10} {:<28} {}\n",
        "PROVIDER", "NAME", "STATUS", "MODES", "BINARY"
    );
    out.push_str(&"-".repeat(80));
    out.push('\n');

    let mut missing = Vec::new();
    for provider in registry.list() {
        let d = descriptor(provider);
        let available = registry.is_available(provider);
        let binary = registry
            .get(provider)
            .map(|p| p.binary().display().to_string())
            .unwrap_or_default();
        let modes = d.modes.iter().map(Mode::as_str).collect::<Vec<_>>().join(", ");
        let status = if available { "available" } else { "missing" };
        out.push_str(&format!(
            "{:<8} {:<12} {:<10} {:<28} {}\n",
            provider.as_str(), d.display_name, status, modes, binary
        ));
        if !available {
            missing.push(d.install_hint);
        }
    }

    if !missing.is_empty() {
        out.push('\n');
        for hint in missing {
            out.push_str(hint);
            out.push('\n');
        }
    }
    out
}
