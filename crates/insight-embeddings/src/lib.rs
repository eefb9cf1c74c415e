//! # insight-embeddings
//!
//! Embedding generation and the content-addressed embedding cache.
//!
//! ## Features
//! - `EmbeddingCache`: (fingerprint, model) -> vector, persisted through a
//!   `KvStore`, LRU-bounded by a byte budget, single-flight computation
//! - `CandleEmbedder`: local all-MiniLM-L6-v2 inference (384 dimensions)
//! - `HashEmbedder`: deterministic feature hashing, no model download
//!
//! The cache is the only place that decides whether content has already been
//! embedded under a given model.

pub mod candle;
pub mod error;
pub mod hashing;
pub mod model;
pub mod model_files;
pub mod store;

pub use crate::candle::CandleEmbedder;
pub use error::EmbeddingError;
pub use hashing::HashEmbedder;
pub use model::{cosine, Embedding, EmbeddingModel, ModelInfo};
pub use model_files::{get_or_download_model, ModelFiles, ModelPaths, DEFAULT_MODEL_REPO};
pub use store::{
    record_size_hint, CacheLookup, EmbeddingCache, EmbeddingCacheStats, EmbeddingRecord,
};
