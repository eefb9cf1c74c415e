//! The persistence contract consumed by the caches and the vector index.

use crate::column_families::Namespace;
use crate::error::StorageError;

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        ns: Namespace,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        ns: Namespace,
        key: Vec<u8>,
    },
}

impl BatchOp {
    pub fn put(ns: Namespace, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOp::Put {
            ns,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(ns: Namespace, key: impl Into<Vec<u8>>) -> Self {
        BatchOp::Delete { ns, key: key.into() }
    }
}

/// Durable namespaced key-value storage.
pub trait KvStore: Send + Sync {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, ns: Namespace, key: &[u8]) -> Result<(), StorageError>;

    /// All (key, value) pairs whose key starts with `prefix`, in key order.
    #[allow(clippy::type_complexity)]
    fn scan_prefix(
        &self,
        ns: Namespace,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply every op or none.
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError>;

    /// Persist buffered writes.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
