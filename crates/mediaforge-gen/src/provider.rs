//! Provider contract and request/result types

use base64::Engine;
use mediaforge_core::{ContentHash, ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::RequestContext;

/// The category of media a provider produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Speech,
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaCategory::Image => write!(f, "image"),
            MediaCategory::Speech => write!(f, "speech"),
        }
    }
}

impl std::str::FromStr for MediaCategory {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(MediaCategory::Image),
            "speech" | "audio" | "tts" => Ok(MediaCategory::Speech),
            other => Err(ForgeError::Configuration(format!(
                "Unknown media category '{}'. Expected image or speech",
                other
            ))),
        }
    }
}

/// Whether a backend answers inline or through a job that must be polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    Synchronous,
    Asynchronous,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Synchronous => write!(f, "synchronous"),
            Capability::Asynchronous => write!(f, "asynchronous"),
        }
    }
}

/// Static facts about a provider
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// Provider name (e.g. "flux", "openai", "elevenlabs", "mock")
    pub name: String,
    /// Media categories this provider can generate
    pub media: Vec<MediaCategory>,
    /// Named model presets; empty accepts any model
    pub models: Vec<String>,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, media: Vec<MediaCategory>, models: &[&str]) -> Self {
        Self {
            name: name.into(),
            media,
            models: models.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn supports(&self, media: MediaCategory) -> bool {
        self.media.contains(&media)
    }

    pub fn accepts_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

/// How the payload of a result should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Url,
    Base64,
    Blob,
}

/// Payload of a result: text for URLs and base64, raw bytes for blobs
#[derive(Clone, PartialEq, Eq)]
pub enum MediaData {
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Debug for MediaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaData::Text(s) if s.len() > 64 => {
                let head: String = s.chars().take(64).collect();
                write!(f, "Text({}.. {} chars)", head, s.len())
            }
            MediaData::Text(s) => write!(f, "Text({})", s),
            MediaData::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}

/// The result of a successful generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub data: MediaData,
    pub kind: MediaKind,
    /// Name of the provider that produced this result
    pub provider: String,
}

impl GenerationResult {
    pub fn url(provider: &str, url: impl Into<String>) -> Self {
        Self {
            data: MediaData::Text(url.into()),
            kind: MediaKind::Url,
            provider: provider.to_string(),
        }
    }

    pub fn base64(provider: &str, encoded: impl Into<String>) -> Self {
        Self {
            data: MediaData::Text(encoded.into()),
            kind: MediaKind::Base64,
            provider: provider.to_string(),
        }
    }

    pub fn blob(provider: &str, bytes: Vec<u8>) -> Self {
        Self {
            data: MediaData::Bytes(bytes),
            kind: MediaKind::Blob,
            provider: provider.to_string(),
        }
    }

    /// The URL, if this result only points at remote media
    pub fn as_url(&self) -> Option<&str> {
        match (&self.kind, &self.data) {
            (MediaKind::Url, MediaData::Text(url)) => Some(url),
            _ => None,
        }
    }

    /// Decoded media bytes for base64 and blob results, `None` for URLs
    pub fn bytes(&self) -> Result<Option<Vec<u8>>> {
        match (&self.kind, &self.data) {
            (MediaKind::Url, _) => Ok(None),
            (MediaKind::Base64, MediaData::Text(encoded)) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map(Some)
                .map_err(|e| ForgeError::InvalidResponse {
                    provider: self.provider.clone(),
                    detail: format!("invalid base64 payload: {}", e),
                }),
            (_, MediaData::Bytes(bytes)) => Ok(Some(bytes.clone())),
            (MediaKind::Blob, MediaData::Text(text)) => Ok(Some(text.as_bytes().to_vec())),
        }
    }

    /// Fingerprint of the payload as delivered
    pub fn digest(&self) -> ContentHash {
        match &self.data {
            MediaData::Text(s) => ContentHash::from_bytes(s.as_bytes()),
            MediaData::Bytes(b) => ContentHash::from_bytes(b),
        }
    }
}

/// Opaque handle of a backend job. Only the issuing provider interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of initiating a generation
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Ready(GenerationResult),
    Job(JobId),
}

/// Result of polling a job
#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Ready(GenerationResult),
    Failed { reason: String },
}

/// A request to generate media
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Prompt for images, text to speak for speech
    pub prompt: String,
    pub media: MediaCategory,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl GenerateRequest {
    pub fn image(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            media: MediaCategory::Image,
            width: None,
            height: None,
            seed: None,
        }
    }

    pub fn speech(text: impl Into<String>) -> Self {
        Self {
            prompt: text.into(),
            media: MediaCategory::Speech,
            width: None,
            height: None,
            seed: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Backend-specific parameters passed through to adapter payloads
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenerateOptions {
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Merge the extra parameters into a JSON object payload, overriding keys
    pub fn merge_into(&self, payload: &mut serde_json::Value) {
        if let Some(obj) = payload.as_object_mut() {
            for (k, v) in &self.extra {
                obj.insert(k.clone(), v.clone());
            }
        }
    }
}

/// A backend that answers a generation request inline
pub trait SyncProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Run the generation and return its result
    fn start(
        &self,
        request: &GenerateRequest,
        ctx: &RequestContext,
        opts: &GenerateOptions,
    ) -> Result<GenerationResult>;
}

/// A backend that answers with a job handle that must be polled
pub trait JobProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Submit the generation. Backends may still answer inline with `Ready`.
    fn start(
        &self,
        request: &GenerateRequest,
        ctx: &RequestContext,
        opts: &GenerateOptions,
    ) -> Result<StartOutcome>;

    /// Poll the status of a job previously returned by `start`
    fn status(&self, job: &JobId) -> Result<JobStatus>;

    /// Called once polling ends without a result (timeout, error or cancel).
    /// Providers holding per-job state release it here.
    fn abandon(&self, _job: &JobId) {}
}

/// A constructed provider, tagged by how it answers
pub enum Provider {
    Synchronous(Box<dyn SyncProvider>),
    Asynchronous(Box<dyn JobProvider>),
}

impl Provider {
    pub fn descriptor(&self) -> &ProviderDescriptor {
        match self {
            Provider::Synchronous(p) => p.descriptor(),
            Provider::Asynchronous(p) => p.descriptor(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor().name
    }

    pub fn capability(&self) -> Capability {
        match self {
            Provider::Synchronous(_) => Capability::Synchronous,
            Provider::Asynchronous(_) => Capability::Asynchronous,
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("capability", &self.capability())
            .finish()
    }
}
