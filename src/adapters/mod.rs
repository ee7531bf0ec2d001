//! Language-model collaborators.
//!
//! The core treats every model as an untrusted text oracle: a request goes
//! out, a string comes back. Deadlines are enforced by the caller, so an
//! adapter's future must be safe to drop mid-call.

pub mod command;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;

pub use command::CommandModel;
pub use http::HttpModel;

use crate::protocol::ModelRequest;

/// Trait for language-model backends
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Send one request and return the raw response text
    async fn complete(&self, request: &ModelRequest) -> Result<String>;

    /// Cheap reachability check
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
