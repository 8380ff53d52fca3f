//! Provider registry: which adapters exist, which binaries are installed,
//! and which provider a caller gets when it does not name one.
//!
//! The static facts live in a read-only descriptor table
//! ([`descriptor`]); [`ProviderRegistry`] pairs them with adapter
//! instances and validates availability before any process is spawned.

mod descriptor;
mod probe;

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::provider::{ClaudeAdapter, CodexAdapter, GeminiAdapter, Provider};
use crate::types::{AgentResult, InvocationRequest, ProviderType};

pub use descriptor::{
    PROVIDER_ENV, ProviderDescriptor, descriptor, descriptors, select_provider,
    select_provider_with, validate_provider,
};
pub use probe::{BinaryProbe, PathProbe, StaticProbe, is_binary_available, reset_binary_cache};

/// Registered adapters, keyed by provider.
///
/// # Example
///
/// ```ignore
/// let registry = ProviderRegistry::with_defaults();
/// let provider = registry.select(None, std::env::var(PROVIDER_ENV).ok().as_deref(), true)?;
/// let result = provider.invoke(&request, cancel).await?;
/// ```
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderType, Box<dyn Provider>>,
    probe: Box<dyn BinaryProbe>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// An empty registry probing `$PATH`.
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
            probe: Box::new(PathProbe),
        }
    }

    /// A registry with the stock adapter for every provider.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ClaudeAdapter::new());
        registry.register(CodexAdapter::new());
        registry.register(GeminiAdapter::new());
        registry
    }

    /// Replace the availability probe.
    pub fn with_probe(mut self, probe: impl BinaryProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Register an adapter under its [`Provider::provider`], returning the
    /// one it replaces.
    pub fn register(&mut self, provider: impl Provider + 'static) -> Option<Box<dyn Provider>> {
        self.providers.insert(provider.provider(), Box::new(provider))
    }

    pub fn get(&self, provider: ProviderType) -> Option<&dyn Provider> {
        self.providers.get(&provider).map(|p| p.as_ref())
    }

    /// Registered providers in priority order.
    pub fn list(&self) -> Vec<ProviderType> {
        self.providers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Whether `provider` is registered and its binary can be found.
    pub fn is_available(&self, provider: ProviderType) -> bool {
        self.get(provider).is_some_and(|p| self.probe.is_available(p.binary()))
    }

    /// The adapter for `provider`, or `BinaryNotFound` if its binary is
    /// missing. Never spawns anything.
    pub fn validate(&self, provider: ProviderType) -> Result<&dyn Provider, ProviderError> {
        let Some(adapter) = self.get(provider) else {
            let d = descriptor(provider);
            return Err(ProviderError::binary_not_found(d.binary, d.install_hint));
        };
        descriptor::validate_binary(self.probe.as_ref(), provider, adapter.binary())?;
        Ok(adapter)
    }

    /// Select as [`select_provider`] does, over the registered adapters and
    /// their configured binaries, then validate the choice.
    pub fn select(
        &self,
        explicit: Option<ProviderType>,
        env_override: Option<&str>,
        auto_detect: bool,
    ) -> Result<&dyn Provider, ProviderError> {
        let candidates = self.providers.iter().map(|(k, p)| (*k, p.binary()));
        let provider = descriptor::pick(
            self.probe.as_ref(),
            explicit,
            env_override,
            auto_detect,
            candidates,
        )?;
        self.validate(provider)
    }

    /// Validate `request.provider`, then run it.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: CancellationToken,
    ) -> Result<AgentResult, ProviderError> {
        let provider = self.validate(request.provider)?;
        provider.invoke(request, cancel).await
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
