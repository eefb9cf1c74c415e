//! Router and provider error types.

use std::time::Duration;

use insight_cache::CacheError;
use insight_embeddings::EmbeddingError;
use insight_storage::StorageError;
use insight_vector::VectorError;
use thiserror::Error;

/// Model provider failures. Retried with backoff, then escalated.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider failed: {0}")]
    Failed(String),

    #[error("Provider I/O error: {0}")]
    Io(String),

    #[error("Provider not configured")]
    NotConfigured,

    #[error("Cancelled before the call completed")]
    Cancelled,
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Io(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector index error: {0}")]
    Index(#[from] VectorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Escalation not found: {0}")]
    EscalationNotFound(String),

    #[error("Escalation already resolved: {0}")]
    AlreadyResolved(String),

    /// The run was cancelled before a model call started
    #[error("Routing cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Serialization(err.to_string())
    }
}
