//! Semantic cache error types.

use insight_embeddings::EmbeddingError;
use insight_storage::StorageError;
use insight_vector::VectorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector index error: {0}")]
    Index(#[from] VectorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
