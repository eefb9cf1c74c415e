//! Persistence layer for vault-insight.
//!
//! Provides a namespaced key-value contract (`KvStore`) with two backends:
//! - `RocksStore`: RocksDB, one column family per namespace
//! - `MemoryStore`: ordered in-memory map for tests and ephemeral runs
//!
//! The core only needs get/put/delete/scan-by-prefix plus atomic batches.

pub mod column_families;
pub mod db;
pub mod error;
pub mod memory;
pub mod store;

pub use column_families::Namespace;
pub use db::{RocksStore, StorageStats};
pub use error::StorageError;
pub use memory::MemoryStore;
pub use store::{BatchOp, KvStore};
