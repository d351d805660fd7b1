//! Provider construction
//!
//! Maps provider names to concrete implementations and builds the active
//! registry from configuration.

pub mod elevenlabs;
pub mod flux;
pub mod mock;
pub mod openai;

use crate::config::ForgeConfig;
use crate::provider::Provider;
use crate::registry::ProviderRegistry;
use mediaforge_core::{ForgeError, Result};
use tracing::debug;

/// Create a provider by name with configuration
pub fn create_provider(name: &str, config: &ForgeConfig) -> Result<Provider> {
    match name {
        "mock" => Ok(mock::MockProvider::synchronous("mock").into_provider()),
        "flux" => Ok(Provider::Asynchronous(Box::new(flux::FluxProvider::from_config(config)?))),
        "openai" => Ok(Provider::Synchronous(Box::new(openai::OpenAiProvider::from_config(config)?))),
        "elevenlabs" => Ok(Provider::Synchronous(Box::new(
            elevenlabs::ElevenLabsProvider::from_config(config)?,
        ))),
        _ => Err(ForgeError::Configuration(format!(
            "Unknown provider '{}'. Available: {}",
            name,
            available_providers().join(", ")
        ))),
    }
}

/// List all available provider names, in default fallback order
pub fn available_providers() -> Vec<&'static str> {
    vec!["flux", "openai", "elevenlabs", "mock"]
}

/// Construct every enabled provider in `fallback_order`
pub fn construction_results(config: &ForgeConfig) -> Vec<(String, Result<Provider>)> {
    config
        .generation
        .fallback_order
        .iter()
        .filter(|name| {
            let enabled = config.is_enabled(name);
            if !enabled {
                debug!(provider = %name, "provider disabled in config");
            }
            enabled
        })
        .map(|name| (name.clone(), create_provider(name, config)))
        .collect()
}

/// The active registry for this configuration
pub fn build_registry(config: &ForgeConfig) -> ProviderRegistry {
    ProviderRegistry::from_results(construction_results(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider() {
        match create_provider("midjourney", &ForgeConfig::default()) {
            Err(ForgeError::Configuration(msg)) => assert!(msg.contains("Available: flux")),
            other => panic!("expected Configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_without_keys_keeps_only_mock() {
        let registry = build_registry(&ForgeConfig::default());
        assert_eq!(registry.names(), vec!["mock"]);
        let excluded: Vec<&str> = registry.excluded().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(excluded, vec!["flux", "openai", "elevenlabs"]);
    }

    #[test]
    fn test_registry_follows_fallback_order_and_enabled() {
        let config = ForgeConfig::from_toml(
            r#"
[providers.flux]
api_key = "fal"

[providers.openai]
api_key = "sk"
enabled = false

[providers.elevenlabs]
api_keys = ["xi-1", "xi-2"]

[generation]
fallback_order = ["mock", "elevenlabs", "openai", "flux"]
"#,
        )
        .unwrap();

        let registry = build_registry(&config);
        assert_eq!(registry.names(), vec!["mock", "elevenlabs", "flux"]);
        assert!(registry.excluded().is_empty());
        assert_eq!(
            registry.get("flux").map(|p| p.capability()),
            Some(crate::provider::Capability::Asynchronous)
        );
    }
}
