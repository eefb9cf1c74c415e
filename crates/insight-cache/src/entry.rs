//! Cached responses.

use std::time::Duration;

use chrono::{DateTime, Utc};
use insight_types::Fingerprint;
use serde::{Deserialize, Serialize};

/// One cached answer.
///
/// Only `hit_count` and `last_hit` change after creation. Storing the same
/// query again replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint of the query text; also its vector index key
    pub fingerprint: Fingerprint,
    pub model_id: String,
    pub query: String,
    pub answer: String,
    /// Similarity threshold in force when the entry was written
    pub threshold_at_write: f32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_hit: Option<DateTime<Utc>>,
    /// Monotonic insertion order, breaks recency ties
    pub inserted_seq: u64,
}

impl CacheEntry {
    pub(crate) fn new(
        fingerprint: Fingerprint,
        model_id: &str,
        query: &str,
        answer: &str,
        threshold_at_write: f32,
        ttl: Duration,
        inserted_seq: u64,
    ) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            fingerprint,
            model_id: model_id.to_string(),
            query: query.to_string(),
            answer: answer.to_string(),
            threshold_at_write,
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            hit_count: 0,
            last_hit: None,
            inserted_seq,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Recency used for LRU ordering: last hit, else creation.
    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_hit.unwrap_or(self.created_at)
    }
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub answer: String,
    pub similarity: f32,
    /// Fingerprint of the cached query that matched
    pub matched: Fingerprint,
    pub hit_count: u64,
}
