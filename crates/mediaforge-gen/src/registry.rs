//! Active provider registry
//!
//! Built once at startup from construction results. Providers that failed
//! to construct are logged and left out; registration order is fallback
//! priority.

use mediaforge_core::ForgeError;
use tracing::{info, warn};

use crate::provider::Provider;

/// A provider that could not be constructed, kept for reporting
#[derive(Debug, Clone)]
pub struct ExcludedProvider {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
    excluded: Vec<ExcludedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter construction results into the active registry, preserving order
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (String, Result<Provider, ForgeError>)>,
    {
        let mut registry = Self::new();
        for (name, result) in results {
            match result {
                Ok(provider) => registry.register(provider),
                Err(e) => {
                    warn!(provider = %name, error = %e, "provider unavailable, excluded from registry");
                    registry.excluded.push(ExcludedProvider {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(active = ?registry.names(), excluded = registry.excluded.len(), "provider registry ready");
        registry
    }

    /// Append a provider at the lowest priority. A second provider with an
    /// already-registered name is ignored.
    pub fn register(&mut self, provider: Provider) {
        if self.get(provider.name()).is_some() {
            warn!(provider = %provider.name(), "duplicate provider name ignored");
            return;
        }
        self.providers.push(provider);
    }

    pub fn with(mut self, provider: Provider) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Providers in priority order
    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn excluded(&self) -> &[ExcludedProvider] {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
