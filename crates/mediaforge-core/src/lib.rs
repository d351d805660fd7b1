//! MediaForge Core - Foundational types shared by the MediaForge crates
//!
//! This crate provides:
//! - `ForgeError` - The generation error taxonomy and `Result` alias
//! - `AggregateFailure` - Structured per-provider failure list for fallback runs
//! - `ContentHash` - SHA-256 fingerprints of generated payloads

mod error;
mod hash;

pub use error::{AggregateFailure, ForgeError, ProviderFailure, Result};
pub use hash::ContentHash;
