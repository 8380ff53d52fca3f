use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;

static AVAILABILITY: OnceLock<Mutex<HashMap<String, bool>>> = OnceLock::new();

fn cache() -> MutexGuard<'static, HashMap<String, bool>> {
    AVAILABILITY
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Whether `name` resolves to an executable, either as a path or via
/// `$PATH`. The answer is cached for the life of the process.
pub fn is_binary_available(name: &str) -> bool {
    if let Some(&known) = cache().get(name) {
        return known;
    }
    let found = !name.is_empty() && which::which(name).is_ok();
    debug!(binary = name, found, "probed binary");
    cache().insert(name.to_string(), found);
    found
}

/// Forget every cached probe result.
pub fn reset_binary_cache() {
    cache().clear();
}

/// Decides whether a provider binary can be launched.
pub trait BinaryProbe: Send + Sync {
    fn is_available(&self, binary: &Path) -> bool;
}

/// The real probe: [`is_binary_available`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PathProbe;

impl BinaryProbe for PathProbe {
    fn is_available(&self, binary: &Path) -> bool {
        is_binary_available(&binary.to_string_lossy())
    }
}

/// A fixed answer set, for tests and dry runs. Matches either the full
/// binary string or its file name.
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    available: HashSet<String>,
}

impl StaticProbe {
    pub fn with(binaries: &[&str]) -> Self {
        Self {
            available: binaries.iter().map(|b| b.to_string()).collect(),
        }
    }
}

impl BinaryProbe for StaticProbe {
    fn is_available(&self, binary: &Path) -> bool {
        let full = binary.to_string_lossy();
        let name = binary.file_name().map(|n| n.to_string_lossy());
        self.available.contains(full.as_ref())
            || name.is_some_and(|n| self.available.contains(n.as_ref()))
    }
}
