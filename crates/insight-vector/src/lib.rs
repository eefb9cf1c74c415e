//! # insight-vector
//!
//! Approximate nearest-neighbor index over embeddings, with metadata filters.
//!
//! ## Features
//! - usearch-powered HNSW graph, cosine similarity
//! - Entries persisted through a `KvStore`; the graph is rebuilt on open
//! - Removal by fingerprint or source path leaves tombstones, no rebuild
//! - Compaction builds a fresh generation off to the side and swaps it in;
//!   searches see either the old or the new generation
//! - Recall measurement against exact k-NN with a configurable floor

pub mod entry;
pub mod error;
pub mod hnsw;
pub mod index;
pub mod recall;

pub use entry::{EntryKind, IndexEntry, SearchFilter, SearchHit};
pub use error::VectorError;
pub use hnsw::{HnswConfig, HnswGraph};
pub use index::{IndexConfig, IndexStats, VectorIndex};
pub use recall::{cosine_similarity, exact_top_k, is_zero_norm, recall_at_k};
