//! RocksDB-backed `KvStore`.
//!
//! Provides:
//! - Database open with one column family per namespace
//! - Single-key reads and writes
//! - Forward prefix scans
//! - Atomic write batches

use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use crate::column_families::{build_cf_descriptors, Namespace};
use crate::error::StorageError;
use crate::store::{BatchOp, KvStore};

/// RocksDB storage for vault-insight.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open storage at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        Ok(Self { db })
    }

    fn cf(&self, ns: Namespace) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(ns.cf_name())
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(ns.cf_name().to_string()))
    }

    /// Trigger manual compaction on every namespace.
    pub fn compact(&self) -> Result<(), StorageError> {
        info!("Starting full compaction...");
        for ns in Namespace::ALL {
            let cf = self.cf(ns)?;
            self.db.compact_range_cf::<&[u8], &[u8]>(cf, None, None);
        }
        info!("Compaction complete");
        Ok(())
    }

    /// Entry counts per namespace plus on-disk size.
    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();
        for ns in Namespace::ALL {
            let cf = self.cf(ns)?;
            let count = self.count_cf_entries(cf)?;
            match ns {
                Namespace::Embeddings => stats.embedding_count = count,
                Namespace::Responses => stats.response_count = count,
                Namespace::IndexEntries => stats.index_entry_count = count,
                Namespace::Escalations => stats.escalation_count = count,
            }
        }
        stats.disk_usage_bytes = self.disk_usage();
        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

impl KvStore for RocksStore {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(ns)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(ns)?;
        self.db.put_cf(cf, key, value)?;
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(ns)?;
        self.db.delete_cf(cf, key)?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        ns: Namespace,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let cf = self.cf(ns)?;
        let mut results = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        let count = ops.len();
        for op in ops {
            match op {
                BatchOp::Put { ns, key, value } => batch.put_cf(self.cf(ns)?, key, value),
                BatchOp::Delete { ns, key } => batch.delete_cf(self.cf(ns)?, key),
            }
        }
        self.db.write(batch)?;
        debug!(ops = count, "Wrote batch");
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    pub embedding_count: u64,
    pub response_count: u64,
    pub index_entry_count: u64,
    pub escalation_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_families::ALL_CF_NAMES;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_open_creates_column_families() {
        let (store, _temp) = create_test_store();
        for cf_name in ALL_CF_NAMES {
            assert!(store.db.cf_handle(cf_name).is_some(), "CF {} should exist", cf_name);
        }
    }

    #[test]
    fn test_put_get_delete() {
        let (store, _temp) = create_test_store();
        store.put(Namespace::Embeddings, b"k1", b"v1").unwrap();
        assert_eq!(
            store.get(Namespace::Embeddings, b"k1").unwrap(),
            Some(b"v1".to_vec())
        );
        // namespaces are isolated
        assert!(store.get(Namespace::Responses, b"k1").unwrap().is_none());

        store.delete(Namespace::Embeddings, b"k1").unwrap();
        assert!(store.get(Namespace::Embeddings, b"k1").unwrap().is_none());
        // deleting again is fine
        store.delete(Namespace::Embeddings, b"k1").unwrap();
    }

    #[test]
    fn test_scan_prefix_stops_at_boundary() {
        let (store, _temp) = create_test_store();
        store.put(Namespace::Responses, b"a:1", b"1").unwrap();
        store.put(Namespace::Responses, b"a:2", b"2").unwrap();
        store.put(Namespace::Responses, b"b:1", b"3").unwrap();

        let found = store.scan_prefix(Namespace::Responses, b"a:").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, b"a:1".to_vec());
        assert_eq!(found[1].1, b"2".to_vec());
    }

    #[test]
    fn test_write_batch_applies_all() {
        let (store, _temp) = create_test_store();
        store.put(Namespace::IndexEntries, b"old", b"x").unwrap();
        store
            .write_batch(vec![
                BatchOp::put(Namespace::IndexEntries, b"new".to_vec(), b"y".to_vec()),
                BatchOp::delete(Namespace::IndexEntries, b"old".to_vec()),
            ])
            .unwrap();
        assert!(store.get(Namespace::IndexEntries, b"old").unwrap().is_none());
        assert!(store.get(Namespace::IndexEntries, b"new").unwrap().is_some());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.put(Namespace::Escalations, b"e1", b"pending").unwrap();
            store.flush().unwrap();
        }
        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(
            store.get(Namespace::Escalations, b"e1").unwrap(),
            Some(b"pending".to_vec())
        );
    }

    #[test]
    fn test_stats_counts_namespaces() {
        let (store, _temp) = create_test_store();
        store.put(Namespace::Embeddings, b"a", b"1").unwrap();
        store.put(Namespace::Embeddings, b"b", b"1").unwrap();
        store.put(Namespace::Responses, b"c", b"1").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.embedding_count, 2);
        assert_eq!(stats.response_count, 1);
        assert_eq!(stats.index_entry_count, 0);
    }
}
