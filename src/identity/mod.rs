//! The `identity` module resolves API keys against the remote identity
//! service.
//!
//! The service itself is an external collaborator; this module only holds
//! the resolver seam (`IdentityResolver`) and the HTTP adapter. Calls are
//! bounded to at most ten in flight across the process and each request
//! carries its own timeout, so a slow upstream never wedges the server.

pub mod http;
#[cfg(test)]
pub mod stub;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpIdentityResolver;

#[derive(Debug, Error)]
pub enum ResolverError {
    /// The identity service reports the key unknown or revoked.
    #[error("API key is not authorized")]
    Unauthorized,
    /// The identity service failed or timed out.
    #[error("identity service error: {0}")]
    Upstream(String),
}

/// Resolves an API key to the set of topics it may subscribe to, and
/// answers whether a topic is accessible without any key.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn topics_for_key(&self, api_key: &str) -> Result<Vec<String>, ResolverError>;

    async fn is_public_topic(&self, topic: &str) -> Result<bool, ResolverError>;
}
