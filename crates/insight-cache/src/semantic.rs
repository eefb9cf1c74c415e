//! Semantic cache over the embedding cache and vector index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use insight_embeddings::{EmbeddingCache, EmbeddingModel};
use insight_storage::{KvStore, Namespace};
use insight_types::{names, CacheSettings, Fingerprint, MetricsSink};
use insight_vector::{is_zero_norm, EntryKind, IndexEntry, SearchFilter, VectorIndex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::entry::{CacheEntry, CacheHit};
use crate::error::CacheError;

/// Semantic cache configuration
#[derive(Debug, Clone)]
pub struct SemanticCacheConfig {
    /// Minimum cosine similarity for a hit
    pub similarity_threshold: f32,
    pub max_entries: usize,
    /// TTL for entries stored without one
    pub default_ttl: Duration,
    /// Index candidates examined per lookup
    pub candidates: usize,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl SemanticCacheConfig {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            similarity_threshold: settings.similarity_threshold,
            max_entries: settings.response_cache_max_entries.max(1),
            default_ttl: settings.default_ttl(),
            candidates: 8,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

/// Semantic cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SemanticCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub expired_purged: u64,
    pub evictions: u64,
}

/// Response cache keyed by query similarity.
pub struct SemanticCache {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
    store: Arc<dyn KvStore>,
    embeddings: Arc<EmbeddingCache>,
    index: Arc<VectorIndex>,
    model: Arc<dyn EmbeddingModel>,
    metrics: Arc<dyn MetricsSink>,
    config: SemanticCacheConfig,
    next_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired_purged: AtomicU64,
    evictions: AtomicU64,
}

impl SemanticCache {
    /// Open the cache, reconciling persisted entries with the vector index.
    ///
    /// Cached-query vectors without an entry are dropped from the index;
    /// entries whose vector is missing are re-indexed from the embedding
    /// cache when possible and dropped otherwise.
    pub fn open(
        store: Arc<dyn KvStore>,
        embeddings: Arc<EmbeddingCache>,
        index: Arc<VectorIndex>,
        model: Arc<dyn EmbeddingModel>,
        metrics: Arc<dyn MetricsSink>,
        config: SemanticCacheConfig,
    ) -> Result<Self, CacheError> {
        let mut entries = HashMap::new();
        for (key, value) in store.scan_prefix(Namespace::Responses, b"")? {
            match serde_json::from_slice::<CacheEntry>(&value) {
                Ok(entry) => {
                    entries.insert(entry.fingerprint.clone(), entry);
                }
                Err(e) => {
                    warn!(key = ?String::from_utf8_lossy(&key), error = %e, "Skipping unreadable cache entry");
                }
            }
        }

        for orphan in index.fingerprints(&SearchFilter::kind(EntryKind::CachedQuery)) {
            if !entries.contains_key(&orphan) {
                index.remove_kind(&orphan, EntryKind::CachedQuery)?;
            }
        }

        let mut unindexable = Vec::new();
        for entry in entries.values() {
            let indexed = index
                .entries_for(&entry.fingerprint)
                .iter()
                .any(|e| e.kind == EntryKind::CachedQuery);
            if indexed {
                continue;
            }
            match embeddings.get(&entry.fingerprint, &entry.model_id) {
                Some(record)
                    if record.dimension == index.dimension() && !is_zero_norm(&record.vector) =>
                {
                    index.insert(
                        IndexEntry::cached_query(entry.fingerprint.clone(), &entry.model_id),
                        &record.vector,
                    )?;
                }
                _ => unindexable.push(entry.fingerprint.clone()),
            }
        }
        for fp in unindexable {
            warn!(fingerprint = %fp.short(), "Dropping cache entry without a vector");
            entries.remove(&fp);
            store.delete(Namespace::Responses, fp.as_str().as_bytes())?;
        }

        let next_seq = entries.values().map(|e| e.inserted_seq + 1).max().unwrap_or(0);
        info!(entries = entries.len(), "Semantic cache loaded");

        Ok(Self {
            entries: Mutex::new(entries),
            store,
            embeddings,
            index,
            model,
            metrics,
            config,
            next_seq: AtomicU64::new(next_seq),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired_purged: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SemanticCacheConfig {
        &self.config
    }

    /// Find a cached answer for a query similar enough to `query`.
    ///
    /// A query that embeds to a zero vector (no words at all) always misses.
    pub async fn lookup(&self, query: &str) -> Result<Option<CacheHit>, CacheError> {
        let embedded = self.embeddings.get_or_embed(query, &self.model).await?;
        if is_zero_norm(&embedded.record.vector) {
            debug!("Query has no embeddable content");
            self.record_miss();
            return Ok(None);
        }
        let candidates = self.index.search(
            &embedded.record.vector,
            self.config.candidates,
            &SearchFilter::kind(EntryKind::CachedQuery),
        )?;

        let now = Utc::now();
        let mut entries = self.lock();
        let mut expired = Vec::new();
        let mut result = None;
        for candidate in candidates {
            let fp = &candidate.entry.fingerprint;
            let Some(entry) = entries.get_mut(fp) else {
                continue;
            };
            if entry.is_expired(now) {
                expired.push(fp.clone());
                continue;
            }
            // Hits sort by similarity; the first live entry decides.
            let threshold = self.config.similarity_threshold.max(entry.threshold_at_write);
            if candidate.score >= threshold {
                entry.hit_count += 1;
                entry.last_hit = Some(now);
                self.store.put(
                    Namespace::Responses,
                    fp.as_str().as_bytes(),
                    &serde_json::to_vec(entry)?,
                )?;
                result = Some(CacheHit {
                    answer: entry.answer.clone(),
                    similarity: candidate.score,
                    matched: fp.clone(),
                    hit_count: entry.hit_count,
                });
            }
            break;
        }

        for fp in &expired {
            self.discard(&mut entries, fp)?;
        }
        self.expired_purged
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        drop(entries);

        match &result {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.counter(names::RESPONSE_CACHE_HITS, 1);
                self.metrics
                    .gauge(names::RESPONSE_CACHE_HIT_RATE, self.hit_rate());
                debug!(similarity = hit.similarity, matched = %hit.matched.short(), "Response cache hit");
            }
            None => self.record_miss(),
        }
        Ok(result)
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.counter(names::RESPONSE_CACHE_MISSES, 1);
        self.metrics
            .gauge(names::RESPONSE_CACHE_HIT_RATE, self.hit_rate());
    }

    /// Cache `answer` for `query`, replacing any entry for the same query.
    ///
    /// Returns `None` without storing when the query embeds to a zero
    /// vector, since no later lookup could match it.
    pub async fn store(
        &self,
        query: &str,
        answer: &str,
        ttl: Option<Duration>,
    ) -> Result<Option<Fingerprint>, CacheError> {
        let embedded = self.embeddings.get_or_embed(query, &self.model).await?;
        let record = embedded.record;
        if is_zero_norm(&record.vector) {
            debug!(fingerprint = %record.fingerprint.short(), "Not caching answer for query without content");
            return Ok(None);
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);

        let mut entries = self.lock();
        if !entries.contains_key(&record.fingerprint) {
            while entries.len() >= self.config.max_entries {
                let Some(victim) = self.eviction_victim(&entries) else {
                    break;
                };
                self.discard(&mut entries, &victim)?;
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let entry = CacheEntry::new(
            record.fingerprint.clone(),
            &record.model_id,
            query,
            answer,
            self.config.similarity_threshold,
            ttl,
            self.next_seq.fetch_add(1, Ordering::Relaxed),
        );
        self.store.put(
            Namespace::Responses,
            record.fingerprint.as_str().as_bytes(),
            &serde_json::to_vec(&entry)?,
        )?;
        self.index.insert(
            IndexEntry::cached_query(record.fingerprint.clone(), &record.model_id),
            &record.vector,
        )?;
        entries.insert(record.fingerprint.clone(), entry);
        debug!(fingerprint = %record.fingerprint.short(), ttl_secs = ttl.as_secs(), "Cached response");
        Ok(Some(record.fingerprint.clone()))
    }

    /// Pre-populate the cache with known (query, answer) pairs.
    pub async fn warm_up<I, Q, A>(&self, pairs: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = (Q, A)>,
        Q: AsRef<str>,
        A: AsRef<str>,
    {
        let mut stored = 0;
        for (query, answer) in pairs {
            if self.store(query.as_ref(), answer.as_ref(), None).await?.is_some() {
                stored += 1;
            }
        }
        info!(stored, "Semantic cache warmed up");
        Ok(stored)
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut entries = self.lock();
        let expired: Vec<Fingerprint> = entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.fingerprint.clone())
            .collect();
        for fp in &expired {
            self.discard(&mut entries, fp)?;
        }
        self.expired_purged
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        if !expired.is_empty() {
            info!(removed = expired.len(), "Swept expired responses");
        }
        Ok(expired.len())
    }

    /// Remove the entry for exactly this query text, if cached.
    pub fn invalidate(&self, query: &str) -> Result<bool, CacheError> {
        let fp = insight_types::fingerprint(query, self.model.model_id());
        let mut entries = self.lock();
        if !entries.contains_key(&fp) {
            return Ok(false);
        }
        self.discard(&mut entries, &fp)?;
        Ok(true)
    }

    /// Expired entries first (earliest expiry), then least recently used.
    fn eviction_victim(&self, entries: &HashMap<Fingerprint, CacheEntry>) -> Option<Fingerprint> {
        let now = Utc::now();
        let expired = entries
            .values()
            .filter(|e| e.is_expired(now))
            .min_by_key(|e| (e.expires_at, e.inserted_seq));
        expired
            .or_else(|| {
                entries
                    .values()
                    .min_by_key(|e| (e.last_used(), e.inserted_seq))
            })
            .map(|e| e.fingerprint.clone())
    }

    /// Drop an entry from memory, storage and the index.
    fn discard(
        &self,
        entries: &mut HashMap<Fingerprint, CacheEntry>,
        fp: &Fingerprint,
    ) -> Result<(), CacheError> {
        entries.remove(fp);
        self.store.delete(Namespace::Responses, fp.as_str().as_bytes())?;
        self.index.remove_kind(fp, EntryKind::CachedQuery)?;
        Ok(())
    }

    pub fn get(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        self.lock().get(fp).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> SemanticCacheStats {
        SemanticCacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            expired_purged: self.expired_purged.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_embeddings::HashEmbedder;
    use insight_storage::{MemoryStore, RocksStore};
    use insight_types::InMemoryMetrics;
    use insight_vector::IndexConfig;
    use tempfile::TempDir;

    const DIM: usize = 64;

    struct Fixture {
        cache: SemanticCache,
        index: Arc<VectorIndex>,
        metrics: Arc<InMemoryMetrics>,
    }

    fn open_with(store: Arc<dyn KvStore>, config: SemanticCacheConfig) -> Fixture {
        let embeddings = Arc::new(EmbeddingCache::open(Arc::clone(&store), 1 << 20).unwrap());
        let index = Arc::new(VectorIndex::open(Arc::clone(&store), IndexConfig::new(DIM)).unwrap());
        let metrics = Arc::new(InMemoryMetrics::new());
        let model: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedder::new(DIM));
        let cache = SemanticCache::open(
            store,
            embeddings,
            Arc::clone(&index),
            model,
            metrics.clone(),
            config,
        )
        .unwrap();
        Fixture {
            cache,
            index,
            metrics,
        }
    }

    fn fixture() -> Fixture {
        open_with(Arc::new(MemoryStore::new()), SemanticCacheConfig::default())
    }

    #[tokio::test]
    async fn test_repeated_query_hits() {
        let f = fixture();
        assert!(f.cache.lookup("how do I rotate api keys").await.unwrap().is_none());
        f.cache
            .store("how do I rotate api keys", "Use the vault CLI.", None)
            .await
            .unwrap();

        let hit = f.cache.lookup("how do I rotate api keys").await.unwrap().unwrap();
        assert_eq!(hit.answer, "Use the vault CLI.");
        assert!(hit.similarity > 0.99);
        assert_eq!(hit.hit_count, 1);

        // Case and punctuation do not change the embedding.
        let hit = f.cache.lookup("How do I rotate API keys?").await.unwrap().unwrap();
        assert_eq!(hit.hit_count, 2);

        assert_eq!(f.metrics.counter_value(names::RESPONSE_CACHE_HITS), 2);
        assert_eq!(f.metrics.counter_value(names::RESPONSE_CACHE_MISSES), 1);
    }

    #[tokio::test]
    async fn test_dissimilar_query_misses() {
        let f = fixture();
        f.cache
            .store("how do I rotate api keys", "Use the vault CLI.", None)
            .await
            .unwrap();
        assert!(f
            .cache
            .lookup("favourite pasta recipe with garlic")
            .await
            .unwrap()
            .is_none());
        // Shares most words but is a different question.
        assert!(f
            .cache
            .lookup("how do I revoke api keys for a deleted user account")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_symbol_only_queries_never_match_each_other() {
        let f = fixture();
        assert!(f.cache.store("🎉🎉🎉", "party time", None).await.unwrap().is_none());
        assert!(f.cache.is_empty());
        assert!(f.index.is_empty());

        f.cache
            .store("how do I rotate api keys", "Use the vault CLI.", None)
            .await
            .unwrap();
        assert!(f.cache.lookup("---").await.unwrap().is_none());
        assert!(f.cache.lookup("🎉🎉🎉").await.unwrap().is_none());
        assert!(f.cache.lookup("").await.unwrap().is_none());
        assert_eq!(f.cache.stats().misses, 3);
    }

    #[tokio::test]
    async fn test_similarity_just_below_threshold_misses() {
        let stored = "how do i rotate the api keys for the staging cluster every month";
        let asked = "how do i rotate the api keys for the staging cluster every week";
        let embedder = HashEmbedder::new(DIM);
        let similarity = embedder
            .embed(stored)
            .unwrap()
            .cosine_similarity(&embedder.embed(asked).unwrap());
        assert!(similarity > 0.5 && similarity < 0.999, "similarity {similarity}");

        let above = open_with(
            Arc::new(MemoryStore::new()),
            SemanticCacheConfig::default().with_threshold(similarity + 0.002),
        );
        above.cache.store(stored, "Rotate monthly.", None).await.unwrap();
        assert!(above.cache.lookup(asked).await.unwrap().is_none());

        let below = open_with(
            Arc::new(MemoryStore::new()),
            SemanticCacheConfig::default().with_threshold(similarity - 0.002),
        );
        below.cache.store(stored, "Rotate monthly.", None).await.unwrap();
        let hit = below.cache.lookup(asked).await.unwrap().unwrap();
        assert!((hit.similarity - similarity).abs() < 0.002);
    }

    #[tokio::test]
    async fn test_threshold_is_configurable() {
        let f = open_with(
            Arc::new(MemoryStore::new()),
            SemanticCacheConfig::default().with_threshold(0.3),
        );
        f.cache
            .store("how do I rotate api keys", "Use the vault CLI.", None)
            .await
            .unwrap();
        let hit = f
            .cache
            .lookup("how do I rotate api keys quickly")
            .await
            .unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_never_hits() {
        let f = fixture();
        f.cache
            .store("what is the backup schedule", "Nightly.", Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(f
            .cache
            .lookup("what is the backup schedule")
            .await
            .unwrap()
            .is_none());
        // Purged lazily by the lookup.
        assert!(f.cache.is_empty());
        assert!(f.index.is_empty());
        assert_eq!(f.cache.stats().expired_purged, 1);
    }

    #[tokio::test]
    async fn test_hit_does_not_extend_ttl() {
        let f = fixture();
        let fp = f
            .cache
            .store("q one", "a", Some(Duration::from_secs(60)))
            .await
            .unwrap()
            .unwrap();
        let before = f.cache.get(&fp).unwrap().expires_at;
        f.cache.lookup("q one").await.unwrap().unwrap();
        let after = f.cache.get(&fp).unwrap();
        assert_eq!(after.expires_at, before);
        assert_eq!(after.hit_count, 1);
        assert!(after.last_hit.is_some());
    }

    #[tokio::test]
    async fn test_store_same_query_replaces() {
        let f = fixture();
        f.cache.store("deploy steps", "old", None).await.unwrap();
        f.cache.store("deploy steps", "new", None).await.unwrap();
        assert_eq!(f.cache.len(), 1);
        assert_eq!(f.index.len(), 1);
        let hit = f.cache.lookup("deploy steps").await.unwrap().unwrap();
        assert_eq!(hit.answer, "new");
    }

    #[tokio::test]
    async fn test_capacity_evicts_expired_first_then_lru() {
        let f = open_with(
            Arc::new(MemoryStore::new()),
            SemanticCacheConfig::default().with_max_entries(2),
        );
        f.cache.store("alpha question", "a", None).await.unwrap();
        f.cache
            .store("beta question", "b", Some(Duration::ZERO))
            .await
            .unwrap();
        f.cache.store("gamma question", "c", None).await.unwrap();

        // beta was expired, so it went first
        assert!(f.cache.lookup("alpha question").await.unwrap().is_some());
        assert_eq!(f.cache.stats().evictions, 1);

        // alpha was just hit, so gamma is least recently used
        f.cache.store("delta question", "d", None).await.unwrap();
        assert!(f.cache.lookup("alpha question").await.unwrap().is_some());
        assert!(f.cache.lookup("gamma question").await.unwrap().is_none());
        assert!(f.cache.lookup("delta question").await.unwrap().is_some());
        assert_eq!(f.cache.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let f = fixture();
        f.cache.store("keep me", "k", None).await.unwrap();
        f.cache
            .store("drop me", "d", Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(f.cache.sweep().unwrap(), 1);
        assert_eq!(f.cache.len(), 1);
        assert_eq!(f.index.len(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_and_invalidate() {
        let f = fixture();
        let stored = f
            .cache
            .warm_up([("first faq", "one"), ("second faq", "two")])
            .await
            .unwrap();
        assert_eq!(stored, 2);
        assert!(f.cache.invalidate("first faq").unwrap());
        assert!(!f.cache.invalidate("first faq").unwrap());
        assert!(f.cache.lookup("first faq").await.unwrap().is_none());
        assert!(f.cache.lookup("second faq").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store: Arc<dyn KvStore> = Arc::new(RocksStore::open(temp.path()).unwrap());
            let f = open_with(store, SemanticCacheConfig::default());
            f.cache
                .store("where are the runbooks", "In ops/runbooks.", None)
                .await
                .unwrap();
            f.cache.lookup("where are the runbooks").await.unwrap().unwrap();
        }
        let store: Arc<dyn KvStore> = Arc::new(RocksStore::open(temp.path()).unwrap());
        let f = open_with(store, SemanticCacheConfig::default());
        let hit = f
            .cache
            .lookup("where are the runbooks")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.answer, "In ops/runbooks.");
        assert_eq!(hit.hit_count, 2);
    }
}
