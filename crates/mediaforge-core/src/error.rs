//! Error types for MediaForge

use std::fmt;
use thiserror::Error;

/// The main error type for generation operations
#[derive(Debug, Error)]
pub enum ForgeError {
    /// A provider could not be constructed (e.g. missing credential)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider not found: {0}")]
    NotFound(String),

    /// HTTP-level failure while starting or polling a generation
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// The backend explicitly reported the job as failed
    #[error("Provider '{provider}' rejected the request: {reason}")]
    ProviderRejected { provider: String, reason: String },

    #[error("Job {job} timed out after {polls} status polls")]
    Timeout { job: String, polls: u32 },

    #[error("No credentials configured for '{0}'")]
    NoCredentials(String),

    #[error("All providers failed: {0}")]
    Aggregate(AggregateFailure),

    #[error("Generation cancelled: {0}")]
    Cancelled(String),

    #[error("Provider '{provider}' does not generate {media}")]
    UnsupportedMedia { provider: String, media: String },

    #[error("Provider '{provider}' does not accept model '{model}'")]
    UnsupportedModel { provider: String, model: String },

    #[error("Invalid response from '{provider}': {detail}")]
    InvalidResponse { provider: String, detail: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),
}

impl ForgeError {
    /// Whether a fresh attempt against the same provider could succeed.
    ///
    /// Cancellation and request/registry mismatches are final; everything
    /// the backend or the network produced is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ForgeError::Cancelled(_)
                | ForgeError::NotFound(_)
                | ForgeError::Configuration(_)
                | ForgeError::NoCredentials(_)
                | ForgeError::UnsupportedMedia { .. }
                | ForgeError::UnsupportedModel { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ForgeError::Cancelled(_))
    }
}

/// Result type alias for generation operations
pub type Result<T> = std::result::Result<T, ForgeError>;

impl From<toml::de::Error> for ForgeError {
    fn from(err: toml::de::Error) -> Self {
        ForgeError::TomlParseError(err.to_string())
    }
}

/// The terminal error of one provider in a fallback run
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ForgeError,
}

/// One failure per provider attempted, in attempt order
#[derive(Debug, Default)]
pub struct AggregateFailure {
    failures: Vec<ProviderFailure>,
}

impl AggregateFailure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: impl Into<String>, error: ForgeError) {
        self.failures.push(ProviderFailure {
            provider: provider.into(),
            error,
        });
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderFailure> {
        self.failures.iter()
    }

    /// Provider names in attempt order
    pub fn providers(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.provider.as_str()).collect()
    }

    /// The error recorded for a provider, if it was attempted
    pub fn error_for(&self, provider: &str) -> Option<&ForgeError> {
        self.failures
            .iter()
            .find(|f| f.provider == provider)
            .map(|f| &f.error)
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no eligible provider was attempted");
        }
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "[{}] {}", failure.provider, failure.error)?;
        }
        Ok(())
    }
}
