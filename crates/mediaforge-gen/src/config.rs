//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `MEDIAFORGE_{PROVIDER}_API_KEY`, `MEDIAFORGE_DEFAULT_*`, ...
//! 2. Project-local: `.mediaforge/config.toml`
//! 3. Global: `~/.mediaforge/config.toml`

use mediaforge_core::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::context::{
    Mode, RequestContext, DEFAULT_MAX_POLL_ITERATIONS, DEFAULT_MAX_RETRIES,
    DEFAULT_POLL_INTERVAL_MS,
};
use crate::credential::CredentialPool;
use crate::retry::{ExponentialBackoffRetry, NoDelayRetry, RetryExecutor, RetryPolicy};

const ENV_PREFIX: &str = "MEDIAFORGE";

/// Provider-specific configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// A single key, or several separated by commas
    pub api_key: Option<String>,
    pub api_keys: Vec<String>,
    pub api_url: Option<String>,
    pub default_model: Option<String>,
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_keys: Vec::new(),
            api_url: None,
            default_model: None,
            enabled: true,
        }
    }
}

impl ProviderConfig {
    /// All configured keys, list entries first
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.api_keys.clone();
        if let Some(list) = &self.api_key {
            keys.extend(list.split(',').map(|k| k.to_string()));
        }
        keys.into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// Name of the retry policy applied between whole-provider attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicyKind {
    #[default]
    None,
    Exponential,
}

impl std::str::FromStr for RetryPolicyKind {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "no-delay" | "immediate" => Ok(RetryPolicyKind::None),
            "exponential" | "backoff" => Ok(RetryPolicyKind::Exponential),
            other => Err(ForgeError::Configuration(format!(
                "Unknown retry policy '{}'. Expected none or exponential",
                other
            ))),
        }
    }
}

/// Generation defaults
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub default_provider: Option<String>,
    /// Applied to select-mode requests only
    pub default_model: Option<String>,
    pub default_voice: Option<String>,
    pub poll_interval_ms: u64,
    pub max_poll_iterations: u32,
    pub max_retries: u32,
    pub retry_policy: RetryPolicyKind,
    pub retry_base_delay_ms: u64,
    /// Fallback priority; also the set of providers constructed at startup
    pub fallback_order: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            default_model: None,
            default_voice: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_iterations: DEFAULT_MAX_POLL_ITERATIONS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_policy: RetryPolicyKind::default(),
            retry_base_delay_ms: ExponentialBackoffRetry::DEFAULT_BASE_DELAY_MS,
            fallback_order: crate::providers::available_providers()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// A `[providers.*]` section as written; unset keys stay `None`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderFile {
    pub api_key: Option<String>,
    pub api_keys: Option<Vec<String>>,
    pub api_url: Option<String>,
    pub default_model: Option<String>,
    pub enabled: Option<bool>,
}

/// The `[generation]` section as written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationFile {
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    pub default_voice: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_iterations: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_policy: Option<RetryPolicyKind>,
    pub retry_base_delay_ms: Option<u64>,
    pub fallback_order: Option<Vec<String>>,
}

/// Top-level config file structure. Layers merge at this level, and
/// defaults are filled in only when resolving into `ForgeConfig`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfigFile {
    #[serde(default)]
    pub providers: HashMap<String, ProviderFile>,
    #[serde(default)]
    pub generation: GenerationFile,
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default)]
pub struct ForgeConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub generation: GenerationConfig,
}

impl ForgeConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = ForgeConfigFile::default();

        // Layer 1: Global config (~/.mediaforge/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let global = Self::load_file(&global_path)?;
                Self::merge_into(&mut config, global);
            }
        }

        // Layer 2: Project-local config (.mediaforge/config.toml)
        let local_path = PathBuf::from(".mediaforge/config.toml");
        if local_path.exists() {
            let local = Self::load_file(&local_path)?;
            Self::merge_into(&mut config, local);
        }

        // Layer 3: Environment variable overrides
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());

        Ok(config.into())
    }

    /// Load config from a specific file path only, plus the given env lookup
    pub fn load_from_file<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load_file(path)?;
        Self::apply_env_overrides(&mut config, env);
        Ok(config.into())
    }

    /// Build from TOML text (no file layers, no env)
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ForgeConfigFile = toml::from_str(content)?;
        Ok(file.into())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Credential pool for a provider; empty when no key is configured
    pub fn credential_pool(&self, provider_name: &str) -> CredentialPool {
        let keys = self
            .providers
            .get(provider_name)
            .map(|p| p.keys())
            .unwrap_or_default();
        CredentialPool::new(provider_name, keys)
    }

    /// Get API URL for a provider (or its default)
    pub fn api_url(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_url.as_deref())
    }

    /// Model a provider uses when the request names none
    pub fn default_model(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.default_model.as_deref())
    }

    /// Check if a provider is enabled
    pub fn is_enabled(&self, provider_name: &str) -> bool {
        self.providers
            .get(provider_name)
            .map(|p| p.enabled)
            .unwrap_or(true)
    }

    /// A request context seeded with the configured defaults
    pub fn request_context(&self, mode: Mode) -> RequestContext {
        let g = &self.generation;
        let mut ctx = RequestContext::new(mode)
            .with_retries(g.max_retries)
            .with_poll_interval_ms(g.poll_interval_ms)
            .with_max_poll_iterations(g.max_poll_iterations);
        if mode == Mode::Select {
            ctx.provider_name = g.default_provider.clone();
            ctx.model = g.default_model.clone();
        }
        ctx.voice = g.default_voice.clone();
        ctx
    }

    /// The retry policy between whole-provider attempts
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        match self.generation.retry_policy {
            RetryPolicyKind::None => Arc::new(NoDelayRetry),
            RetryPolicyKind::Exponential => Arc::new(ExponentialBackoffRetry::new(
                Duration::from_millis(self.generation.retry_base_delay_ms),
            )),
        }
    }

    pub fn retry_executor(&self) -> RetryExecutor {
        RetryExecutor::with_policy(self.retry_policy())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".mediaforge").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<ForgeConfigFile> {
        let content = std::fs::read_to_string(path)?;
        let config: ForgeConfigFile = toml::from_str(&content).map_err(|e| {
            ForgeError::Configuration(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    fn merge_into(base: &mut ForgeConfigFile, overlay: ForgeConfigFile) {
        for (name, provider) in overlay.providers {
            let entry = base.providers.entry(name).or_default();
            if provider.api_key.is_some() || provider.api_keys.is_some() {
                entry.api_key = provider.api_key;
                entry.api_keys = provider.api_keys;
            }
            overwrite(&mut entry.api_url, provider.api_url);
            overwrite(&mut entry.default_model, provider.default_model);
            overwrite(&mut entry.enabled, provider.enabled);
        }

        let (b, g) = (&mut base.generation, overlay.generation);
        overwrite(&mut b.default_provider, g.default_provider);
        overwrite(&mut b.default_model, g.default_model);
        overwrite(&mut b.default_voice, g.default_voice);
        overwrite(&mut b.poll_interval_ms, g.poll_interval_ms);
        overwrite(&mut b.max_poll_iterations, g.max_poll_iterations);
        overwrite(&mut b.max_retries, g.max_retries);
        overwrite(&mut b.retry_policy, g.retry_policy);
        overwrite(&mut b.retry_base_delay_ms, g.retry_base_delay_ms);
        overwrite(&mut b.fallback_order, g.fallback_order);
    }

    fn apply_env_overrides<F>(config: &mut ForgeConfigFile, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut names: Vec<String> = crate::providers::available_providers()
            .iter()
            .map(|s| s.to_string())
            .collect();
        for name in config.providers.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        for name in &names {
            let upper = name.to_uppercase();
            if let Some(keys) = env(&format!("{}_{}_API_KEY", ENV_PREFIX, upper)) {
                let entry = config.providers.entry(name.clone()).or_default();
                entry.api_key = Some(keys);
                entry.api_keys = None;
            }
            if let Some(url) = env(&format!("{}_{}_API_URL", ENV_PREFIX, upper)) {
                config.providers.entry(name.clone()).or_default().api_url = Some(url);
            }
        }

        let g = &mut config.generation;
        if let Some(v) = env(&format!("{}_DEFAULT_PROVIDER", ENV_PREFIX)) {
            g.default_provider = Some(v);
        }
        if let Some(v) = env(&format!("{}_DEFAULT_MODEL", ENV_PREFIX)) {
            g.default_model = Some(v);
        }
        if let Some(v) = env(&format!("{}_DEFAULT_VOICE", ENV_PREFIX)) {
            g.default_voice = Some(v);
        }
        override_parsed(&env, "POLL_INTERVAL_MS", &mut g.poll_interval_ms);
        override_parsed(&env, "MAX_POLL_ITERATIONS", &mut g.max_poll_iterations);
        override_parsed(&env, "MAX_RETRIES", &mut g.max_retries);
        override_parsed(&env, "RETRY_POLICY", &mut g.retry_policy);
    }
}

impl From<ForgeConfigFile> for ForgeConfig {
    fn from(file: ForgeConfigFile) -> Self {
        let providers = file
            .providers
            .into_iter()
            .map(|(name, p)| {
                let resolved = ProviderConfig {
                    api_key: p.api_key,
                    api_keys: p.api_keys.unwrap_or_default(),
                    api_url: p.api_url,
                    default_model: p.default_model,
                    enabled: p.enabled.unwrap_or(true),
                };
                (name, resolved)
            })
            .collect();

        let d = GenerationConfig::default();
        let g = file.generation;
        let generation = GenerationConfig {
            default_provider: g.default_provider,
            default_model: g.default_model,
            default_voice: g.default_voice,
            poll_interval_ms: g.poll_interval_ms.unwrap_or(d.poll_interval_ms),
            max_poll_iterations: g.max_poll_iterations.unwrap_or(d.max_poll_iterations),
            max_retries: g.max_retries.unwrap_or(d.max_retries),
            retry_policy: g.retry_policy.unwrap_or(d.retry_policy),
            retry_base_delay_ms: g.retry_base_delay_ms.unwrap_or(d.retry_base_delay_ms),
            fallback_order: g.fallback_order.unwrap_or(d.fallback_order),
        };

        Self {
            providers,
            generation,
        }
    }
}

fn overwrite<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

/// Replace `target` with the parsed env value; unparseable values are logged and ignored
fn override_parsed<F, T>(env: &F, suffix: &str, target: &mut Option<T>)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{}_{}", ENV_PREFIX, suffix);
    if let Some(raw) = env(&key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = Some(value),
            Err(e) => warn!(key = %key, value = %raw, error = %e, "ignoring invalid override"),
        }
    }
}
