//! Error types for cache operations.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// Errors surfaced by the connection cache.
///
/// Cloneable so that a single dial failure can be handed to every caller
/// waiting on the same peer.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The cache has begun shutting down and no longer accepts requests
    /// or inbound connections.
    #[error("connection cache is not available")]
    Unavailable,

    /// Opening the outbound connection failed.
    #[error("dial failed: {0:#}")]
    DialFailed(Arc<anyhow::Error>),

    /// The outbound connection did not open within the configured deadline.
    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),
}

impl From<anyhow::Error> for CacheError {
    fn from(error: anyhow::Error) -> Self {
        CacheError::DialFailed(Arc::new(error))
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
