//! MediaForge Gen - Generation provider orchestration
//!
//! Invokes external image and speech backends through a uniform provider
//! contract, retries failed attempts, polls asynchronous jobs to completion,
//! rotates API keys per provider and falls back across an ordered provider
//! chain.

pub mod config;
pub mod context;
pub mod credential;
pub mod http;
pub mod orchestrator;
pub mod poller;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod retry;

pub use config::ForgeConfig;
pub use context::{CancelToken, Mode, RequestContext};
pub use credential::CredentialPool;
pub use orchestrator::Orchestrator;
pub use poller::JobPoller;
pub use provider::{
    Capability, GenerateOptions, GenerateRequest, GenerationResult, JobId, JobProvider,
    JobStatus, MediaCategory, MediaData, MediaKind, Provider, ProviderDescriptor, StartOutcome,
    SyncProvider,
};
pub use registry::ProviderRegistry;
pub use retry::{ExponentialBackoffRetry, NoDelayRetry, RetryExecutor, RetryPolicy};
