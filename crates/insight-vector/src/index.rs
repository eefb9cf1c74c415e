//! The searchable vector index.
//!
//! State lives in a `Generation`: one HNSW graph plus the live entries and
//! vectors it serves. Writers mutate the active generation in place under a
//! maintenance lock. Compaction takes the same lock, builds a new generation
//! from live entries only and swaps the active pointer; searches clone the
//! pointer once and finish on whichever generation they started with.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use insight_storage::{BatchOp, KvStore, Namespace};
use insight_types::{Fingerprint, IndexSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::entry::{EntryKind, IndexEntry, SearchFilter, SearchHit};
use crate::error::VectorError;
use crate::hnsw::{HnswConfig, HnswGraph};
use crate::recall::{exact_top_k, is_zero_norm, recall_at_k};

/// Index configuration
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub hnsw: HnswConfig,
    /// Tombstones / (live + tombstones) above which compaction runs
    pub compaction_threshold: f32,
    /// Minimum acceptable recall@k against exact search
    pub recall_floor: f32,
    /// Graph candidates fetched per requested result before filtering
    pub oversample: usize,
}

impl IndexConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            hnsw: HnswConfig::new(dimension),
            compaction_threshold: 0.2,
            recall_floor: 0.95,
            oversample: 4,
        }
    }

    pub fn from_settings(dimension: usize, settings: &IndexSettings) -> Self {
        Self {
            hnsw: HnswConfig::new(dimension)
                .with_connectivity(settings.connectivity)
                .with_expansion(settings.expansion_add, settings.expansion_search)
                .with_capacity(settings.capacity),
            compaction_threshold: settings.compaction_threshold,
            recall_floor: settings.recall_floor,
            oversample: 4,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub live_entries: usize,
    pub tombstones: usize,
    pub dimension: usize,
    /// Incremented by every compaction
    pub generation: u64,
    pub compactions: u64,
}

impl IndexStats {
    pub fn tombstone_ratio(&self) -> f32 {
        let total = self.live_entries + self.tombstones;
        if total == 0 {
            0.0
        } else {
            self.tombstones as f32 / total as f32
        }
    }
}

/// Persisted form of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    vector_id: u64,
    entry: IndexEntry,
    vector: Vec<f32>,
}

#[derive(Default)]
struct LiveSet {
    entries: HashMap<u64, Arc<IndexEntry>>,
    vectors: HashMap<u64, Arc<[f32]>>,
    by_fingerprint: HashMap<Fingerprint, Vec<u64>>,
    /// Removed from `entries` but still present in the graph
    tombstones: usize,
}

impl LiveSet {
    fn insert(&mut self, id: u64, entry: Arc<IndexEntry>, vector: Arc<[f32]>) {
        self.by_fingerprint
            .entry(entry.fingerprint.clone())
            .or_default()
            .push(id);
        self.entries.insert(id, entry);
        self.vectors.insert(id, vector);
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        self.vectors.remove(&id);
        if let Some(ids) = self.by_fingerprint.get_mut(&entry.fingerprint) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_fingerprint.remove(&entry.fingerprint);
            }
        }
        self.tombstones += 1;
        true
    }
}

struct Generation {
    number: u64,
    graph: HnswGraph,
    live: RwLock<LiveSet>,
}

impl Generation {
    fn build(
        number: u64,
        config: &HnswConfig,
        items: Vec<(u64, Arc<IndexEntry>, Arc<[f32]>)>,
    ) -> Result<Self, VectorError> {
        let capacity = config.capacity.max(items.len() * 2);
        let graph = HnswGraph::new(config.clone().with_capacity(capacity))?;
        let mut live = LiveSet::default();
        for (id, entry, vector) in items {
            graph.add(id, &vector)?;
            live.insert(id, entry, vector);
        }
        Ok(Self {
            number,
            graph,
            live: RwLock::new(live),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LiveSet> {
        self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LiveSet> {
        self.live.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map graph results to live entries passing `filter`.
    fn resolve(&self, raw: &[(u64, f32)], filter: &SearchFilter) -> Vec<SearchHit> {
        let live = self.read();
        raw.iter()
            .filter_map(|&(id, score)| {
                let entry = live.entries.get(&id)?;
                filter.matches(entry).then(|| SearchHit {
                    vector_id: id,
                    entry: Arc::clone(entry),
                    score,
                })
            })
            .collect()
    }

    /// Brute-force search over live entries passing `filter`.
    fn exhaustive(&self, query: &[f32], k: usize, filter: &SearchFilter) -> Vec<SearchHit> {
        let live = self.read();
        let candidates = live
            .entries
            .iter()
            .filter(|(_, entry)| filter.matches(entry))
            .filter_map(|(id, _)| live.vectors.get(id).map(|v| (*id, &v[..])));
        exact_top_k(candidates, query, k)
            .into_iter()
            .filter_map(|(id, score)| {
                live.entries.get(&id).map(|entry| SearchHit {
                    vector_id: id,
                    entry: Arc::clone(entry),
                    score,
                })
            })
            .collect()
    }
}

/// Filtered approximate nearest-neighbor index.
pub struct VectorIndex {
    active: RwLock<Arc<Generation>>,
    /// Serializes inserts, removals and compaction
    maintenance: Mutex<()>,
    store: Arc<dyn KvStore>,
    config: IndexConfig,
    next_id: AtomicU64,
    compactions: AtomicU64,
}

fn storage_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

impl VectorIndex {
    /// Open the index, rebuilding the graph from persisted entries.
    pub fn open(store: Arc<dyn KvStore>, config: IndexConfig) -> Result<Self, VectorError> {
        let dimension = config.hnsw.dimension;
        let mut items = Vec::new();
        let mut max_id = None;
        for (_, value) in store.scan_prefix(Namespace::IndexEntries, b"")? {
            let stored: StoredEntry = match serde_json::from_slice(&value) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable index entry");
                    continue;
                }
            };
            max_id = max_id.max(Some(stored.vector_id));
            if stored.vector.len() != dimension {
                warn!(
                    id = stored.vector_id,
                    expected = dimension,
                    actual = stored.vector.len(),
                    "Skipping index entry with stale dimension"
                );
                continue;
            }
            if is_zero_norm(&stored.vector) {
                warn!(id = stored.vector_id, "Skipping index entry with zero vector");
                continue;
            }
            items.push((
                stored.vector_id,
                Arc::new(stored.entry),
                Arc::<[f32]>::from(stored.vector),
            ));
        }

        let generation = Generation::build(0, &config.hnsw, items)?;
        info!(
            entries = generation.read().entries.len(),
            dim = dimension,
            "Vector index opened"
        );

        Ok(Self {
            active: RwLock::new(Arc::new(generation)),
            maintenance: Mutex::new(()),
            store,
            next_id: AtomicU64::new(max_id.map_or(0, |id| id + 1)),
            compactions: AtomicU64::new(0),
            config,
        })
    }

    fn current(&self) -> Arc<Generation> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn maintenance(&self) -> MutexGuard<'_, ()> {
        self.maintenance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dimension(&self) -> usize {
        self.config.hnsw.dimension
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn check_dimension(&self, values: &[f32]) -> Result<(), VectorError> {
        if values.len() != self.dimension() {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension(),
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// Add an entry with its vector. Returns the vector id.
    ///
    /// Inserting an entry identical to a live one (same fingerprint, model,
    /// kind, path and offset) returns the existing id. A zero vector is
    /// rejected with `ZeroVector`.
    pub fn insert(&self, entry: IndexEntry, vector: &[f32]) -> Result<u64, VectorError> {
        self.check_dimension(vector)?;
        if is_zero_norm(vector) {
            return Err(VectorError::ZeroVector);
        }
        let _guard = self.maintenance();
        let generation = self.current();

        {
            let live = generation.read();
            let existing = live
                .by_fingerprint
                .get(&entry.fingerprint)
                .into_iter()
                .flatten()
                .find(|id| live.entries.get(id).is_some_and(|e| e.same_identity(&entry)));
            if let Some(id) = existing {
                return Ok(*id);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = StoredEntry {
            vector_id: id,
            entry,
            vector: vector.to_vec(),
        };
        self.store.put(
            Namespace::IndexEntries,
            &storage_key(id),
            &serde_json::to_vec(&stored)?,
        )?;

        let entry = Arc::new(stored.entry);
        let fingerprint = entry.fingerprint.clone();
        generation
            .write()
            .insert(id, entry, Arc::<[f32]>::from(stored.vector));

        if let Err(e) = generation.graph.add(id, vector) {
            let mut live = generation.write();
            live.remove(id);
            live.tombstones -= 1;
            drop(live);
            self.store.delete(Namespace::IndexEntries, &storage_key(id))?;
            return Err(e);
        }
        debug!(id, fingerprint = %fingerprint.short(), "Indexed vector");
        Ok(id)
    }

    /// Remove every entry with this fingerprint. Returns how many were removed.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<usize, VectorError> {
        let _guard = self.maintenance();
        let generation = self.current();
        let ids = generation
            .read()
            .by_fingerprint
            .get(fingerprint)
            .cloned()
            .unwrap_or_default();
        self.remove_ids(&generation, ids)
    }

    /// Remove entries with this fingerprint and kind only.
    pub fn remove_kind(&self, fingerprint: &Fingerprint, kind: EntryKind) -> Result<usize, VectorError> {
        let _guard = self.maintenance();
        let generation = self.current();
        let ids: Vec<u64> = {
            let live = generation.read();
            live.by_fingerprint
                .get(fingerprint)
                .into_iter()
                .flatten()
                .filter(|id| live.entries.get(id).is_some_and(|e| e.kind == kind))
                .copied()
                .collect()
        };
        self.remove_ids(&generation, ids)
    }

    /// Remove every entry sourced from `path`.
    pub fn remove_source(&self, path: &str) -> Result<usize, VectorError> {
        let _guard = self.maintenance();
        let generation = self.current();
        let ids: Vec<u64> = generation
            .read()
            .entries
            .iter()
            .filter(|(_, e)| e.source_path.as_deref() == Some(path))
            .map(|(id, _)| *id)
            .collect();
        self.remove_ids(&generation, ids)
    }

    /// Callers hold the maintenance lock.
    fn remove_ids(&self, generation: &Generation, ids: Vec<u64>) -> Result<usize, VectorError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.write_batch(
            ids.iter()
                .map(|id| BatchOp::delete(Namespace::IndexEntries, storage_key(*id).to_vec()))
                .collect(),
        )?;

        let removed = {
            let mut live = generation.write();
            ids.iter().filter(|id| live.remove(**id)).count()
        };
        for id in &ids {
            // Entries are already unreachable; a failed graph delete only costs space.
            if let Err(e) = generation.graph.remove(*id) {
                warn!(id, error = %e, "Graph removal failed");
            }
        }
        debug!(removed, "Removed vectors");

        if self.needs_compaction_in(generation) {
            self.compact_locked()?;
        }
        Ok(removed)
    }

    fn needs_compaction_in(&self, generation: &Generation) -> bool {
        let live = generation.read();
        let total = live.entries.len() + live.tombstones;
        total > 0
            && live.tombstones > 0
            && live.tombstones as f32 / total as f32 > self.config.compaction_threshold
    }

    /// True if the tombstone ratio exceeds the compaction threshold.
    pub fn needs_compaction(&self) -> bool {
        self.needs_compaction_in(&self.current())
    }

    /// Compact if the tombstone ratio calls for it. Returns whether it ran.
    pub fn maybe_compact(&self) -> Result<bool, VectorError> {
        let _guard = self.maintenance();
        if !self.needs_compaction_in(&self.current()) {
            return Ok(false);
        }
        self.compact_locked()?;
        Ok(true)
    }

    /// Rebuild from live entries and swap the new generation in.
    pub fn compact(&self) -> Result<(), VectorError> {
        let _guard = self.maintenance();
        self.compact_locked()
    }

    fn compact_locked(&self) -> Result<(), VectorError> {
        let old = self.current();
        let (items, purged) = {
            let live = old.read();
            let mut items: Vec<_> = live
                .entries
                .iter()
                .filter_map(|(id, entry)| {
                    live.vectors
                        .get(id)
                        .map(|v| (*id, Arc::clone(entry), Arc::clone(v)))
                })
                .collect();
            items.sort_by_key(|(id, _, _)| *id);
            (items, live.tombstones)
        };

        let live_count = items.len();
        let fresh = Generation::build(old.number + 1, &self.config.hnsw, items)?;
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(fresh);
        self.compactions.fetch_add(1, Ordering::Relaxed);
        info!(
            generation = old.number + 1,
            live = live_count,
            purged,
            "Vector index compacted"
        );
        Ok(())
    }

    /// Up to `k` hits passing `filter`, highest similarity first; equal
    /// scores go to the most recently inserted entry. A zero query matches
    /// nothing.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, VectorError> {
        self.check_dimension(query)?;
        if k == 0 || is_zero_norm(query) {
            return Ok(Vec::new());
        }
        let generation = self.current();
        if generation.read().entries.is_empty() {
            return Ok(Vec::new());
        }

        let graph_len = generation.graph.len();
        let mut want = k.saturating_mul(self.config.oversample.max(1));
        let mut hits = loop {
            let fetch = want.min(graph_len.max(1));
            let raw = generation.graph.search(query, fetch)?;
            let hits = generation.resolve(&raw, filter);
            if hits.len() >= k || fetch >= graph_len {
                break hits;
            }
            want = want.saturating_mul(2);
        };

        if hits.len() < k {
            // Selective filter or an approximation miss; fall back to exact.
            hits = generation.exhaustive(query, k, filter);
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(b.vector_id.cmp(&a.vector_id)));
        hits.truncate(k);
        Ok(hits)
    }

    /// Average recall@k of the graph against exact search, unfiltered.
    pub fn measure_recall(&self, queries: &[Vec<f32>], k: usize) -> Result<f32, VectorError> {
        if queries.is_empty() || k == 0 {
            return Ok(1.0);
        }
        let generation = self.current();
        let mut total = 0.0f32;
        for query in queries {
            self.check_dimension(query)?;
            let raw = generation.graph.search(query, k)?;
            let approx: Vec<u64> = generation
                .resolve(&raw, &SearchFilter::all())
                .iter()
                .map(|h| h.vector_id)
                .collect();
            let exact: Vec<u64> = generation
                .exhaustive(query, k, &SearchFilter::all())
                .iter()
                .map(|h| h.vector_id)
                .collect();
            total += recall_at_k(&approx, &exact);
        }
        Ok(total / queries.len() as f32)
    }

    /// Like `measure_recall`, failing with `RecallBelowFloor` under the floor.
    pub fn verify_recall(&self, queries: &[Vec<f32>], k: usize) -> Result<f32, VectorError> {
        let recall = self.measure_recall(queries, k)?;
        if recall < self.config.recall_floor {
            warn!(recall, floor = self.config.recall_floor, "Recall below floor");
            return Err(VectorError::RecallBelowFloor {
                recall,
                floor: self.config.recall_floor,
            });
        }
        Ok(recall)
    }

    /// Up to `n` stored vectors spread evenly over the index, for benchmarks.
    pub fn sample_vectors(&self, n: usize) -> Vec<Vec<f32>> {
        let generation = self.current();
        let live = generation.read();
        let mut ids: Vec<u64> = live.vectors.keys().copied().collect();
        ids.sort_unstable();
        if n == 0 || ids.is_empty() {
            return Vec::new();
        }
        let step = (ids.len() / n).max(1);
        ids.iter()
            .step_by(step)
            .take(n)
            .filter_map(|id| live.vectors.get(id).map(|v| v.to_vec()))
            .collect()
    }

    pub fn get(&self, vector_id: u64) -> Option<Arc<IndexEntry>> {
        self.current().read().entries.get(&vector_id).cloned()
    }

    pub fn vector(&self, vector_id: u64) -> Option<Arc<[f32]>> {
        self.current().read().vectors.get(&vector_id).cloned()
    }

    /// Live entries with this fingerprint.
    pub fn entries_for(&self, fingerprint: &Fingerprint) -> Vec<Arc<IndexEntry>> {
        let generation = self.current();
        let live = generation.read();
        live.by_fingerprint
            .get(fingerprint)
            .into_iter()
            .flatten()
            .filter_map(|id| live.entries.get(id).cloned())
            .collect()
    }

    /// Live entries sourced from exactly `path`, ordered by chunk offset.
    pub fn entries_for_source(&self, path: &str) -> Vec<(u64, Arc<IndexEntry>)> {
        let generation = self.current();
        let live = generation.read();
        let mut found: Vec<(u64, Arc<IndexEntry>)> = live
            .entries
            .iter()
            .filter(|(_, e)| e.source_path.as_deref() == Some(path))
            .map(|(id, e)| (*id, Arc::clone(e)))
            .collect();
        found.sort_by_key(|(id, e)| (e.chunk_offset, *id));
        found
    }

    /// Every source path with live entries.
    pub fn sources(&self) -> HashSet<String> {
        let generation = self.current();
        let live = generation.read();
        live.entries
            .values()
            .filter_map(|e| e.source_path.clone())
            .collect()
    }

    /// Distinct fingerprints among live entries passing `filter`.
    pub fn fingerprints(&self, filter: &SearchFilter) -> HashSet<Fingerprint> {
        let generation = self.current();
        let live = generation.read();
        live.entries
            .values()
            .filter(|e| filter.matches(e))
            .map(|e| e.fingerprint.clone())
            .collect()
    }

    /// Number of live entries passing `filter`.
    pub fn count(&self, filter: &SearchFilter) -> usize {
        let generation = self.current();
        let live = generation.read();
        live.entries.values().filter(|e| filter.matches(e)).count()
    }

    pub fn len(&self) -> usize {
        self.current().read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> IndexStats {
        let generation = self.current();
        let live = generation.read();
        IndexStats {
            live_entries: live.entries.len(),
            tombstones: live.tombstones,
            dimension: self.dimension(),
            generation: generation.number,
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_storage::{MemoryStore, RocksStore};
    use insight_types::fingerprint;
    use rand::Rng;
    use std::thread;
    use tempfile::TempDir;

    const DIM: usize = 32;

    fn random_unit(dim: usize) -> Vec<f32> {
        let mut rng = rand::rng();
        let values: Vec<f32> = (0..dim).map(|_| rng.random::<f32>() - 0.5).collect();
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        values.into_iter().map(|v| v / norm).collect()
    }

    fn memory_index(dim: usize) -> VectorIndex {
        VectorIndex::open(Arc::new(MemoryStore::new()), IndexConfig::new(dim)).unwrap()
    }

    fn chunk(i: usize) -> IndexEntry {
        let path = format!("note-{i}.md");
        IndexEntry::chunk(fingerprint(&path, "m"), "m", path, 0)
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = memory_index(DIM);
        let hits = index.search(&random_unit(DIM), 5, &SearchFilter::all()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = memory_index(DIM);
        let err = index.insert(chunk(0), &random_unit(DIM + 1)).unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { .. }));
        assert!(index.is_empty());

        let err = index
            .search(&random_unit(DIM - 1), 1, &SearchFilter::all())
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_zero_vectors_never_indexed_or_matched() {
        let index = memory_index(DIM);
        let err = index.insert(chunk(0), &vec![0.0; DIM]).unwrap_err();
        assert!(matches!(err, VectorError::ZeroVector));
        assert!(index.is_empty());

        index.insert(chunk(1), &random_unit(DIM)).unwrap();
        let hits = index.search(&vec![0.0; DIM], 5, &SearchFilter::all()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_self_retrieval_for_every_entry() {
        let index = memory_index(DIM);
        let vectors: Vec<Vec<f32>> = (0..200).map(|_| random_unit(DIM)).collect();
        let ids: Vec<u64> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| index.insert(chunk(i), v).unwrap())
            .collect();

        for (i, v) in vectors.iter().enumerate() {
            let hits = index.search(v, 1, &SearchFilter::all()).unwrap();
            assert_eq!(hits[0].vector_id, ids[i]);
            assert!((hits[0].score - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_removed_entry_never_returned() {
        let index = memory_index(DIM);
        let vectors: Vec<Vec<f32>> = (0..50).map(|_| random_unit(DIM)).collect();
        for (i, v) in vectors.iter().enumerate() {
            index.insert(chunk(i), v).unwrap();
        }

        let victim = chunk(7).fingerprint;
        assert_eq!(index.remove(&victim).unwrap(), 1);

        for v in &vectors {
            let hits = index.search(v, 10, &SearchFilter::all()).unwrap();
            assert!(hits.iter().all(|h| h.entry.fingerprint != victim));
        }
        assert_eq!(index.remove(&victim).unwrap(), 0);
    }

    #[test]
    fn test_results_sorted_and_ties_prefer_recent() {
        let index = memory_index(DIM);
        let shared = random_unit(DIM);
        let older = index.insert(chunk(1), &shared).unwrap();
        let newer = index.insert(chunk(2), &shared).unwrap();
        index.insert(chunk(3), &random_unit(DIM)).unwrap();

        let hits = index.search(&shared, 3, &SearchFilter::all()).unwrap();
        assert_eq!(hits[0].vector_id, newer);
        assert_eq!(hits[1].vector_id, older);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let index = memory_index(DIM);
        let v = random_unit(DIM);
        let a = index.insert(chunk(1), &v).unwrap();
        let b = index.insert(chunk(1), &v).unwrap();
        assert_eq!(a, b);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_filter_by_kind_with_few_matches() {
        let index = memory_index(DIM);
        for i in 0..100 {
            index.insert(chunk(i), &random_unit(DIM)).unwrap();
        }
        let q = random_unit(DIM);
        index
            .insert(IndexEntry::cached_query(fingerprint("q", "m"), "m"), &q)
            .unwrap();

        let hits = index
            .search(&random_unit(DIM), 5, &SearchFilter::kind(EntryKind::CachedQuery))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.kind, EntryKind::CachedQuery);
    }

    #[test]
    fn test_remove_source() {
        let index = memory_index(DIM);
        let fp = fingerprint("shared", "m");
        index
            .insert(IndexEntry::chunk(fp.clone(), "m", "a.md", 0), &random_unit(DIM))
            .unwrap();
        index
            .insert(IndexEntry::chunk(fp.clone(), "m", "b.md", 0), &random_unit(DIM))
            .unwrap();
        assert_eq!(index.sources().len(), 2);
        assert_eq!(index.entries_for_source("a.md").len(), 1);
        assert_eq!(index.remove_source("a.md").unwrap(), 1);
        assert!(index.entries_for_source("a.md").is_empty());
        let remaining = index.entries_for(&fp);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source_path.as_deref(), Some("b.md"));
    }

    #[test]
    fn test_remove_kind_keeps_other_kinds() {
        let index = memory_index(DIM);
        let fp = fingerprint("same text", "m");
        let v = random_unit(DIM);
        index
            .insert(IndexEntry::chunk(fp.clone(), "m", "a.md", 0), &v)
            .unwrap();
        index
            .insert(IndexEntry::cached_query(fp.clone(), "m"), &v)
            .unwrap();
        assert_eq!(index.remove_kind(&fp, EntryKind::CachedQuery).unwrap(), 1);
        let left = index.entries_for(&fp);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].kind, EntryKind::Chunk);
    }

    #[test]
    fn test_compaction_triggered_by_tombstone_ratio() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut config = IndexConfig::new(DIM);
        config.compaction_threshold = 0.25;
        let index = VectorIndex::open(store, config).unwrap();
        for i in 0..10 {
            index.insert(chunk(i), &random_unit(DIM)).unwrap();
        }

        index.remove(&chunk(0).fingerprint).unwrap();
        index.remove(&chunk(1).fingerprint).unwrap();
        assert_eq!(index.stats().tombstones, 2);
        assert_eq!(index.stats().compactions, 0);

        // 3 / 10 crosses 0.25
        index.remove(&chunk(2).fingerprint).unwrap();
        let stats = index.stats();
        assert_eq!(stats.compactions, 1);
        assert_eq!(stats.tombstones, 0);
        assert_eq!(stats.live_entries, 7);
        assert_eq!(stats.generation, 1);
        assert!(!index.needs_compaction());
    }

    #[test]
    fn test_search_during_compaction_sees_consistent_generation() {
        let index = Arc::new(memory_index(DIM));
        let vectors: Vec<Vec<f32>> = (0..300).map(|_| random_unit(DIM)).collect();
        for (i, v) in vectors.iter().enumerate() {
            index.insert(chunk(i), v).unwrap();
        }
        for i in 0..50 {
            index.remove(&chunk(i).fingerprint).unwrap();
        }

        let reader = {
            let index = Arc::clone(&index);
            let probes: Vec<Vec<f32>> = vectors[50..70].to_vec();
            thread::spawn(move || {
                for _ in 0..20 {
                    for probe in &probes {
                        let hits = index.search(probe, 5, &SearchFilter::all()).unwrap();
                        assert_eq!(hits.len(), 5);
                        assert!((hits[0].score - 1.0).abs() < 1e-3);
                    }
                }
            })
        };
        for _ in 0..5 {
            index.compact().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(index.len(), 250);
    }

    #[test]
    fn test_recall_meets_floor() {
        let index = memory_index(DIM);
        for i in 0..500 {
            index.insert(chunk(i), &random_unit(DIM)).unwrap();
        }
        let queries: Vec<Vec<f32>> = (0..20).map(|_| random_unit(DIM)).collect();
        let recall = index.verify_recall(&queries, 10).unwrap();
        assert!(recall >= 0.95);
    }

    #[test]
    fn test_recall_floor_violation_reported() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut config = IndexConfig::new(DIM);
        config.recall_floor = 1.01;
        let index = VectorIndex::open(store, config).unwrap();
        index.insert(chunk(0), &random_unit(DIM)).unwrap();
        let err = index.verify_recall(&[random_unit(DIM)], 1).unwrap_err();
        assert!(matches!(err, VectorError::RecallBelowFloor { .. }));
    }

    #[test]
    fn test_reopen_rebuilds_from_storage() {
        let temp = TempDir::new().unwrap();
        let v = random_unit(DIM);
        let removed_fp;
        let kept_id;
        {
            let store: Arc<dyn KvStore> = Arc::new(RocksStore::open(temp.path()).unwrap());
            let index = VectorIndex::open(store, IndexConfig::new(DIM)).unwrap();
            kept_id = index.insert(chunk(1), &v).unwrap();
            index.insert(chunk(2), &random_unit(DIM)).unwrap();
            removed_fp = chunk(2).fingerprint;
            index.remove(&removed_fp).unwrap();
        }
        let store: Arc<dyn KvStore> = Arc::new(RocksStore::open(temp.path()).unwrap());
        let index = VectorIndex::open(store, IndexConfig::new(DIM)).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.stats().tombstones, 0);
        let hits = index.search(&v, 1, &SearchFilter::all()).unwrap();
        assert_eq!(hits[0].entry.source_path.as_deref(), Some("note-1.md"));

        // new ids continue after the highest persisted one
        let id = index.insert(chunk(3), &random_unit(DIM)).unwrap();
        assert!(id > kept_id);
        assert!(index.entries_for(&removed_fp).is_empty());
    }
}
