//! # insight-cache
//!
//! Semantic response cache: answers keyed by query embedding rather than by
//! exact text. A lookup embeds the query, searches the vector index among
//! cached-query entries and returns the stored answer when the best live
//! match clears the similarity threshold.
//!
//! Entries expire by TTL and are evicted expired-first, then least recently
//! hit, once the entry limit is reached.

pub mod entry;
pub mod error;
pub mod semantic;

pub use entry::{CacheEntry, CacheHit};
pub use error::CacheError;
pub use semantic::{SemanticCache, SemanticCacheConfig, SemanticCacheStats};
