//! Namespaces and their RocksDB column families.
//!
//! - embeddings: (model, fingerprint) -> embedding record
//! - responses: semantic response cache entries
//! - index_entries: vector index entries with their vectors
//! - escalations: pending and resolved human-review items

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for embedding records
pub const CF_EMBEDDINGS: &str = "embeddings";

/// Column family name for cached model responses
pub const CF_RESPONSES: &str = "responses";

/// Column family name for vector index entries
pub const CF_INDEX_ENTRIES: &str = "index_entries";

/// Column family name for escalation queue items
pub const CF_ESCALATIONS: &str = "escalations";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_EMBEDDINGS, CF_RESPONSES, CF_INDEX_ENTRIES, CF_ESCALATIONS];

/// Logical keyspace within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Embeddings,
    Responses,
    IndexEntries,
    Escalations,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Embeddings,
        Namespace::Responses,
        Namespace::IndexEntries,
        Namespace::Escalations,
    ];

    /// Column family backing this namespace.
    pub fn cf_name(self) -> &'static str {
        match self {
            Namespace::Embeddings => CF_EMBEDDINGS,
            Namespace::Responses => CF_RESPONSES,
            Namespace::IndexEntries => CF_INDEX_ENTRIES,
            Namespace::Escalations => CF_ESCALATIONS,
        }
    }
}

/// Embedding vectors are large and rarely rewritten; compress them.
fn embeddings_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_EMBEDDINGS, embeddings_options()),
        ColumnFamilyDescriptor::new(CF_RESPONSES, Options::default()),
        ColumnFamilyDescriptor::new(CF_INDEX_ENTRIES, embeddings_options()),
        ColumnFamilyDescriptor::new(CF_ESCALATIONS, Options::default()),
    ]
}
