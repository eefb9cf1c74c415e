//! Vector index error types.

use insight_storage::StorageError;
use thiserror::Error;

/// Errors that can occur during vector operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// usearch index error
    #[error("Index error: {0}")]
    Index(String),

    /// Vector length differs from the index dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Zero vectors have no cosine similarity to anything
    #[error("Vector has zero norm")]
    ZeroVector,

    /// Approximate search fell below the configured recall floor
    #[error("Recall {recall:.3} below floor {floor:.3}")]
    RecallBelowFloor { recall: f32, floor: f32 },

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for VectorError {
    fn from(err: serde_json::Error) -> Self {
        VectorError::Serialization(err.to_string())
    }
}
