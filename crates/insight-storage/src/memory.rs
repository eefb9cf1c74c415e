//! In-memory `KvStore` for tests and throwaway runs.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::column_families::Namespace;
use crate::error::StorageError;
use crate::store::{BatchOp, KvStore};

type Keyspace = BTreeMap<(Namespace, Vec<u8>), Vec<u8>>;

/// Ordered map guarded by a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Keyspace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in a namespace.
    pub fn len(&self, ns: Namespace) -> usize {
        self.data
            .read()
            .map(|d| d.keys().filter(|(n, _)| *n == ns).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, ns: Namespace) -> bool {
        self.len(ns) == 0
    }
}

impl KvStore for MemoryStore {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(data.get(&(ns, key.to_vec())).cloned())
    }

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.insert((ns, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.remove(&(ns, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(
        &self,
        ns: Namespace,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(data
            .range((ns, prefix.to_vec())..)
            .take_while(|((n, k), _)| *n == ns && k.starts_with(prefix))
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        for op in ops {
            match op {
                BatchOp::Put { ns, key, value } => {
                    data.insert((ns, key), value);
                }
                BatchOp::Delete { ns, key } => {
                    data.remove(&(ns, key));
                }
            }
        }
        Ok(())
    }
}
