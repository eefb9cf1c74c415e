//! Content-addressed embedding cache.
//!
//! Maps (fingerprint, model id) to an immutable embedding record.
//!
//! ## Design
//!
//! - **Write-through**: every new record is persisted before `put` returns;
//!   on open the whole namespace is loaded back, so the cache survives restarts
//! - **Byte budget**: records are kept in an LRU list; when the estimated
//!   size exceeds the budget the least recently used records are dropped from
//!   memory and storage
//! - **Batched touches**: `get` only updates the in-memory recency; last-access
//!   times reach storage on `flush()`, called periodically by the scheduler
//! - **Single-flight**: `get_or_embed` runs at most one computation per key;
//!   concurrent callers for the same key wait and reuse the result
//!
//! Recency ties (identical last-access times after a restart) are broken by
//! insertion order, oldest first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use insight_storage::{BatchOp, KvStore, Namespace};
use insight_types::{fingerprint, Fingerprint};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EmbeddingError;
use crate::model::EmbeddingModel;

/// Fixed per-record overhead added to the vector and key sizes.
const RECORD_OVERHEAD_BYTES: u64 = 64;

/// An embedding computed for one content version under one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub fingerprint: Fingerprint,
    pub model_id: String,
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    fn size_bytes(&self) -> u64 {
        (self.vector.len() * std::mem::size_of::<f32>()) as u64
            + self.fingerprint.as_str().len() as u64
            + self.model_id.len() as u64
            + RECORD_OVERHEAD_BYTES
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model_id: String,
    fingerprint: Fingerprint,
}

impl CacheKey {
    fn new(fingerprint: &Fingerprint, model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            fingerprint: fingerprint.clone(),
        }
    }

    /// `{model_id}\0{fingerprint}` so one model's records share a prefix.
    fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.model_id.len() + 1 + Fingerprint::HEX_LEN);
        key.extend_from_slice(self.model_id.as_bytes());
        key.push(0);
        key.extend_from_slice(self.fingerprint.as_str().as_bytes());
        key
    }
}

/// Persisted form of a record plus its bookkeeping.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    record: EmbeddingRecord,
    inserted_seq: u64,
    last_access_ms: i64,
}

struct Slot {
    record: Arc<EmbeddingRecord>,
    inserted_seq: u64,
    last_access_ms: i64,
}

struct Inner {
    lru: LruCache<CacheKey, Slot>,
    bytes: u64,
    next_seq: u64,
}

/// Result of `get_or_embed`.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub record: Arc<EmbeddingRecord>,
    /// True if this call ran the model.
    pub computed: bool,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingCacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub capacity_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub evictions: u64,
    pub pending_touches: usize,
}

/// Persistent, byte-bounded embedding cache.
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
    store: Arc<dyn KvStore>,
    capacity_bytes: u64,
    /// Keys whose last-access time changed since the last flush
    pending_touches: DashMap<CacheKey, i64>,
    /// One gate per key currently being computed
    in_flight: DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

impl EmbeddingCache {
    /// Open the cache, loading every persisted record.
    pub fn open(store: Arc<dyn KvStore>, capacity_bytes: u64) -> Result<Self, EmbeddingError> {
        let mut stored: Vec<StoredRecord> = store
            .scan_prefix(Namespace::Embeddings, b"")?
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_slice(&value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(key = ?String::from_utf8_lossy(&key), error = %e, "Skipping unreadable embedding record");
                    None
                }
            })
            .collect();

        // Least recent first so the LRU list ends up in access order.
        stored.sort_by_key(|s| (s.last_access_ms, s.inserted_seq));

        let mut inner = Inner {
            lru: LruCache::unbounded(),
            bytes: 0,
            next_seq: stored.iter().map(|s| s.inserted_seq + 1).max().unwrap_or(0),
        };
        for s in stored {
            let key = CacheKey::new(&s.record.fingerprint, &s.record.model_id);
            inner.bytes += s.record.size_bytes();
            inner.lru.put(
                key,
                Slot {
                    record: Arc::new(s.record),
                    inserted_seq: s.inserted_seq,
                    last_access_ms: s.last_access_ms,
                },
            );
        }
        info!(entries = inner.lru.len(), bytes = inner.bytes, "Embedding cache loaded");

        let cache = Self {
            inner: Mutex::new(inner),
            store,
            capacity_bytes,
            pending_touches: DashMap::new(),
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };
        {
            let mut inner = cache.lock();
            cache.enforce_budget(&mut inner)?;
        }
        Ok(cache)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a record without computing anything.
    pub fn get(&self, fingerprint: &Fingerprint, model_id: &str) -> Option<Arc<EmbeddingRecord>> {
        let key = CacheKey::new(fingerprint, model_id);
        let now = Utc::now().timestamp_millis();
        let found = {
            let mut inner = self.lock();
            inner.lru.get_mut(&key).map(|slot| {
                slot.last_access_ms = now;
                Arc::clone(&slot.record)
            })
        };
        match found {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.pending_touches.insert(key, now);
                Some(record)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a vector for (fingerprint, model).
    ///
    /// Writing the same vector again is a no-op. Writing a different vector
    /// under an existing key fails with `InconsistentCacheWrite` and leaves the
    /// stored record untouched.
    pub fn put(
        &self,
        fingerprint: &Fingerprint,
        model_id: &str,
        vector: Vec<f32>,
    ) -> Result<Arc<EmbeddingRecord>, EmbeddingError> {
        let key = CacheKey::new(fingerprint, model_id);
        let now = Utc::now();
        let mut inner = self.lock();

        if let Some(slot) = inner.lru.get_mut(&key) {
            if slot.record.vector != vector {
                warn!(fingerprint = %fingerprint.short(), model = model_id, "Conflicting embedding write rejected");
                return Err(EmbeddingError::InconsistentCacheWrite {
                    fingerprint: fingerprint.clone(),
                    model_id: model_id.to_string(),
                });
            }
            slot.last_access_ms = now.timestamp_millis();
            let record = Arc::clone(&slot.record);
            drop(inner);
            self.pending_touches.insert(key, now.timestamp_millis());
            return Ok(record);
        }

        let record = EmbeddingRecord {
            fingerprint: fingerprint.clone(),
            model_id: model_id.to_string(),
            dimension: vector.len(),
            vector,
            created_at: now,
        };
        let inserted_seq = inner.next_seq;
        let stored = StoredRecord {
            record,
            inserted_seq,
            last_access_ms: now.timestamp_millis(),
        };
        self.store.put(
            Namespace::Embeddings,
            &key.storage_key(),
            &serde_json::to_vec(&stored)?,
        )?;

        inner.next_seq += 1;
        inner.bytes += stored.record.size_bytes();
        let record = Arc::new(stored.record);
        inner.lru.put(
            key,
            Slot {
                record: Arc::clone(&record),
                inserted_seq,
                last_access_ms: stored.last_access_ms,
            },
        );
        debug!(fingerprint = %fingerprint.short(), model = model_id, "Embedding cached");

        self.enforce_budget(&mut inner)?;
        Ok(record)
    }

    /// Drop least recently used records until within budget.
    /// The most recently used record is always kept.
    fn enforce_budget(&self, inner: &mut Inner) -> Result<(), EmbeddingError> {
        let mut evicted = Vec::new();
        while inner.bytes > self.capacity_bytes && inner.lru.len() > 1 {
            let Some((key, slot)) = inner.lru.pop_lru() else {
                break;
            };
            inner.bytes -= slot.record.size_bytes();
            evicted.push(key);
        }
        if evicted.is_empty() {
            return Ok(());
        }

        let count = evicted.len();
        let ops = evicted
            .into_iter()
            .map(|key| {
                self.pending_touches.remove(&key);
                BatchOp::delete(Namespace::Embeddings, key.storage_key())
            })
            .collect();
        self.store.write_batch(ops)?;
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        debug!(count, bytes = inner.bytes, "Evicted embeddings over budget");
        Ok(())
    }

    /// Remove every record matching `predicate`, e.g. records of a retired model.
    pub fn evict<F>(&self, predicate: F) -> Result<usize, EmbeddingError>
    where
        F: Fn(&EmbeddingRecord) -> bool,
    {
        let mut inner = self.lock();
        let doomed: Vec<CacheKey> = inner
            .lru
            .iter()
            .filter(|(_, slot)| predicate(&slot.record))
            .map(|(key, _)| key.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let ops = doomed
            .iter()
            .map(|key| BatchOp::delete(Namespace::Embeddings, key.storage_key()))
            .collect();
        self.store.write_batch(ops)?;

        for key in &doomed {
            if let Some(slot) = inner.lru.pop(key) {
                inner.bytes -= slot.record.size_bytes();
            }
            self.pending_touches.remove(key);
        }
        self.evictions.fetch_add(doomed.len() as u64, Ordering::Relaxed);
        info!(count = doomed.len(), "Evicted embeddings by predicate");
        Ok(doomed.len())
    }

    /// Persist batched last-access times. Returns the number of records written.
    pub fn flush(&self) -> Result<usize, EmbeddingError> {
        let touched: Vec<(CacheKey, i64)> = self
            .pending_touches
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        if touched.is_empty() {
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(touched.len());
        {
            let inner = self.lock();
            for (key, _) in &touched {
                if let Some(slot) = inner.lru.peek(key) {
                    let stored = StoredRecord {
                        record: (*slot.record).clone(),
                        inserted_seq: slot.inserted_seq,
                        last_access_ms: slot.last_access_ms,
                    };
                    ops.push(BatchOp::put(
                        Namespace::Embeddings,
                        key.storage_key(),
                        serde_json::to_vec(&stored)?,
                    ));
                }
            }
        }
        let written = ops.len();
        self.store.write_batch(ops)?;
        // Keep touches that arrived while we were writing.
        for (key, at) in &touched {
            self.pending_touches.remove_if(key, |_, latest| latest == at);
        }
        debug!(written, "Flushed embedding access times");
        Ok(written)
    }

    /// Return the cached embedding of `text` under `model`, computing it at
    /// most once per key across concurrent callers.
    pub async fn get_or_embed(
        &self,
        text: &str,
        model: &Arc<dyn EmbeddingModel>,
    ) -> Result<CacheLookup, EmbeddingError> {
        let model_id = model.model_id().to_string();
        let fp = fingerprint(text, &model_id);
        if let Some(record) = self.get(&fp, &model_id) {
            return Ok(CacheLookup {
                record,
                computed: false,
            });
        }

        let flight = Flight::join(&self.in_flight, CacheKey::new(&fp, &model_id));
        let _permit = flight.gate.lock().await;

        // Another caller may have finished while we waited.
        if let Some(record) = self.peek(&fp, &model_id) {
            return Ok(CacheLookup {
                record,
                computed: false,
            });
        }

        let result = self.compute(text, &fp, model).await;
        result.map(|record| CacheLookup {
            record,
            computed: true,
        })
    }

    async fn compute(
        &self,
        text: &str,
        fp: &Fingerprint,
        model: &Arc<dyn EmbeddingModel>,
    ) -> Result<Arc<EmbeddingRecord>, EmbeddingError> {
        let owned = text.to_string();
        let worker = Arc::clone(model);
        let embedding = tokio::task::spawn_blocking(move || worker.embed(&owned))
            .await
            .map_err(|e| EmbeddingError::Task(e.to_string()))??;

        if embedding.dimension() != model.dimension() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: model.dimension(),
                actual: embedding.dimension(),
            });
        }
        self.computations.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %fp.short(), model = model.model_id(), "Computed embedding");
        self.put(fp, model.model_id(), embedding.values)
    }

    /// Like `get` but without touching recency or counters.
    fn peek(&self, fingerprint: &Fingerprint, model_id: &str) -> Option<Arc<EmbeddingRecord>> {
        let inner = self.lock();
        inner
            .lru
            .peek(&CacheKey::new(fingerprint, model_id))
            .map(|slot| Arc::clone(&slot.record))
    }

    pub fn contains(&self, fingerprint: &Fingerprint, model_id: &str) -> bool {
        self.peek(fingerprint, model_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of model computations performed through `get_or_embed`.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        let (entries, bytes) = {
            let inner = self.lock();
            (inner.lru.len(), inner.bytes)
        };
        EmbeddingCacheStats {
            entries,
            bytes,
            capacity_bytes: self.capacity_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pending_touches: self.pending_touches.len(),
        }
    }
}

/// One caller's share of a key's single-flight gate.
///
/// The last holder to drop removes the gate, whether it returned normally,
/// failed or was cancelled mid-computation. While any holder remains, new
/// callers queue on the same gate.
struct Flight<'a> {
    map: &'a DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>,
    key: CacheKey,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> Flight<'a> {
    fn join(map: &'a DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>, key: CacheKey) -> Self {
        let gate = map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Self { map, key, gate }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        // The map holds one reference and this flight another.
        self.map.remove_if(&self.key, |_, gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) <= 2
        });
    }
}

/// Estimated cache bytes for one record of `dimension` floats.
pub fn record_size_hint(dimension: usize, model_id: &str) -> u64 {
    (dimension * std::mem::size_of::<f32>()) as u64
        + Fingerprint::HEX_LEN as u64
        + model_id.len() as u64
        + RECORD_OVERHEAD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::HashEmbedder;
    use crate::model::{Embedding, ModelInfo};
    use insight_storage::{MemoryStore, RocksStore};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    const MODEL: &str = "test-model";

    fn memory_cache(capacity: u64) -> EmbeddingCache {
        EmbeddingCache::open(Arc::new(MemoryStore::new()), capacity).unwrap()
    }

    fn fp(text: &str) -> Fingerprint {
        fingerprint(text, MODEL)
    }

    /// Counts calls and sleeps so concurrent callers overlap.
    struct SlowModel {
        inner: HashEmbedder,
        calls: AtomicUsize,
    }

    impl EmbeddingModel for SlowModel {
        fn info(&self) -> &ModelInfo {
            self.inner.info()
        }

        fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.inner.embed(text)
        }
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let cache = memory_cache(1 << 20);
        let vector = vec![0.25, -0.5, 0.125];
        cache.put(&fp("a"), MODEL, vector.clone()).unwrap();

        let record = cache.get(&fp("a"), MODEL).unwrap();
        assert_eq!(record.vector, vector);
        assert_eq!(record.dimension, 3);
        assert!(cache.get(&fp("a"), "other-model").is_none());
    }

    #[test]
    fn test_put_same_vector_is_idempotent() {
        let cache = memory_cache(1 << 20);
        cache.put(&fp("a"), MODEL, vec![1.0, 2.0]).unwrap();
        cache.put(&fp("a"), MODEL, vec![1.0, 2.0]).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_conflicting_put_rejected_and_original_kept() {
        let cache = memory_cache(1 << 20);
        cache.put(&fp("a"), MODEL, vec![1.0, 2.0]).unwrap();

        let err = cache.put(&fp("a"), MODEL, vec![1.0, 2.5]).unwrap_err();
        assert!(matches!(err, EmbeddingError::InconsistentCacheWrite { .. }));
        assert_eq!(cache.get(&fp("a"), MODEL).unwrap().vector, vec![1.0, 2.0]);
    }

    #[test]
    fn test_budget_evicts_least_recently_used() {
        let per_record = record_size_hint(4, MODEL);
        let cache = memory_cache(per_record * 2);

        cache.put(&fp("a"), MODEL, vec![0.0; 4]).unwrap();
        cache.put(&fp("b"), MODEL, vec![1.0; 4]).unwrap();
        // touch "a" so "b" becomes least recently used
        assert!(cache.get(&fp("a"), MODEL).is_some());
        cache.put(&fp("c"), MODEL, vec![2.0; 4]).unwrap();

        assert!(cache.contains(&fp("a"), MODEL));
        assert!(!cache.contains(&fp("b"), MODEL));
        assert!(cache.contains(&fp("c"), MODEL));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_untouched_entries_evicted_oldest_first() {
        let per_record = record_size_hint(2, MODEL);
        let cache = memory_cache(per_record * 2);
        cache.put(&fp("first"), MODEL, vec![0.0; 2]).unwrap();
        cache.put(&fp("second"), MODEL, vec![1.0; 2]).unwrap();
        cache.put(&fp("third"), MODEL, vec![2.0; 2]).unwrap();
        assert!(!cache.contains(&fp("first"), MODEL));
        assert!(cache.contains(&fp("second"), MODEL));
    }

    #[test]
    fn test_evict_by_predicate() {
        let cache = memory_cache(1 << 20);
        cache.put(&fp("a"), "old-model", vec![1.0]).unwrap();
        cache.put(&fp("b"), "old-model", vec![1.0]).unwrap();
        cache.put(&fp("c"), MODEL, vec![1.0]).unwrap();

        let removed = cache.evict(|r| r.model_id == "old-model").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&fp("c"), MODEL));
    }

    #[test]
    fn test_survives_restart() {
        let temp = TempDir::new().unwrap();
        {
            let store: Arc<dyn KvStore> = Arc::new(RocksStore::open(temp.path()).unwrap());
            let cache = EmbeddingCache::open(store, 1 << 20).unwrap();
            cache.put(&fp("persist me"), MODEL, vec![0.5, 0.5]).unwrap();
        }
        let store: Arc<dyn KvStore> = Arc::new(RocksStore::open(temp.path()).unwrap());
        let cache = EmbeddingCache::open(store, 1 << 20).unwrap();
        let record = cache.get(&fp("persist me"), MODEL).unwrap();
        assert_eq!(record.vector, vec![0.5, 0.5]);
    }

    #[test]
    fn test_flush_persists_recency_order() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let per_record = record_size_hint(2, MODEL);
        {
            let cache = EmbeddingCache::open(Arc::clone(&store), per_record * 3).unwrap();
            cache.put(&fp("a"), MODEL, vec![0.0; 2]).unwrap();
            cache.put(&fp("b"), MODEL, vec![1.0; 2]).unwrap();
            std::thread::sleep(Duration::from_millis(5));
            assert!(cache.get(&fp("a"), MODEL).is_some());
            assert_eq!(cache.flush().unwrap(), 1);
            assert_eq!(cache.stats().pending_touches, 0);
        }
        // after reopening, "b" is least recent and goes first
        let cache = EmbeddingCache::open(store, per_record * 2).unwrap();
        cache.put(&fp("c"), MODEL, vec![2.0; 2]).unwrap();
        assert!(cache.contains(&fp("a"), MODEL));
        assert!(!cache.contains(&fp("b"), MODEL));
    }

    #[tokio::test]
    async fn test_get_or_embed_reuses_cached_vector() {
        let cache = memory_cache(1 << 20);
        let model: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedder::with_model_id(MODEL, 32));

        let first = cache.get_or_embed("some note", &model).await.unwrap();
        let second = cache.get_or_embed("some note   \n", &model).await.unwrap();
        assert!(first.computed);
        assert!(!second.computed);
        assert_eq!(first.record.vector, second.record.vector);
        assert_eq!(cache.computations(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_per_fingerprint() {
        let cache = Arc::new(memory_cache(1 << 20));
        let slow = Arc::new(SlowModel {
            inner: HashEmbedder::with_model_id(MODEL, 16),
            calls: AtomicUsize::new(0),
        });
        let model: Arc<dyn EmbeddingModel> = slow.clone();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let model = Arc::clone(&model);
            handles.push(tokio::spawn(async move {
                cache.get_or_embed("shared content", &model).await.unwrap()
            }));
        }
        let mut computed = 0;
        for handle in handles {
            if handle.await.unwrap().computed {
                computed += 1;
            }
        }
        assert_eq!(computed, 1);
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_abandoned_computation_releases_gate() {
        let cache = Arc::new(memory_cache(1 << 20));
        let model: Arc<dyn EmbeddingModel> = Arc::new(SlowModel {
            inner: HashEmbedder::with_model_id(MODEL, 16),
            calls: AtomicUsize::new(0),
        });

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), cache.get_or_embed("slow note", &model))
                .await;
        assert!(abandoned.is_err());
        assert!(cache.in_flight.is_empty());

        // A later caller is not blocked by the abandoned attempt.
        let lookup = cache.get_or_embed("slow note", &model).await.unwrap();
        assert_eq!(lookup.record.dimension, 16);
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiters_leave_no_gate_behind() {
        let cache = Arc::new(memory_cache(1 << 20));
        let model: Arc<dyn EmbeddingModel> = Arc::new(SlowModel {
            inner: HashEmbedder::with_model_id(MODEL, 16),
            calls: AtomicUsize::new(0),
        });
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let model = Arc::clone(&model);
            handles.push(tokio::spawn(async move {
                cache.get_or_embed("shared content", &model).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_keys_compute_independently() {
        let cache = Arc::new(memory_cache(1 << 20));
        let model: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedder::with_model_id(MODEL, 16));
        let (a, b) = tokio::join!(
            cache.get_or_embed("note one", &model),
            cache.get_or_embed("note two", &model)
        );
        assert!(a.unwrap().computed);
        assert!(b.unwrap().computed);
        assert_eq!(cache.computations(), 2);
    }
}
