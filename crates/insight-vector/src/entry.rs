//! Index entries, search filters and hits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use insight_types::Fingerprint;
use serde::{Deserialize, Serialize};

/// What an entry's vector represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A chunk of a vault note
    Chunk,
    /// A query whose answer sits in the semantic response cache
    CachedQuery,
}

/// Metadata for one vector in the index.
///
/// References its embedding by (fingerprint, model id). Entries are added and
/// removed whole; there is no partial update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub fingerprint: Fingerprint,
    pub model_id: String,
    pub kind: EntryKind,
    /// Vault-relative path, absent for cached queries
    pub source_path: Option<String>,
    /// Byte offset of the chunk within its note
    pub chunk_offset: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    pub inserted_at: DateTime<Utc>,
}

impl IndexEntry {
    pub fn chunk(
        fingerprint: Fingerprint,
        model_id: impl Into<String>,
        source_path: impl Into<String>,
        chunk_offset: usize,
    ) -> Self {
        Self {
            fingerprint,
            model_id: model_id.into(),
            kind: EntryKind::Chunk,
            source_path: Some(source_path.into()),
            chunk_offset,
            tags: Vec::new(),
            inserted_at: Utc::now(),
        }
    }

    pub fn cached_query(fingerprint: Fingerprint, model_id: impl Into<String>) -> Self {
        Self {
            fingerprint,
            model_id: model_id.into(),
            kind: EntryKind::CachedQuery,
            source_path: None,
            chunk_offset: 0,
            tags: Vec::new(),
            inserted_at: Utc::now(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Two entries describing the same thing; inserting a duplicate is a no-op.
    pub(crate) fn same_identity(&self, other: &IndexEntry) -> bool {
        self.fingerprint == other.fingerprint
            && self.model_id == other.model_id
            && self.kind == other.kind
            && self.source_path == other.source_path
            && self.chunk_offset == other.chunk_offset
    }
}

/// Restricts which entries a search may return. The default matches all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub kind: Option<EntryKind>,
    /// Match entries carrying at least one of these tags
    pub tags_any: Vec<String>,
    pub path_prefix: Option<String>,
    /// Skip entries from this exact path (e.g. the note being analyzed)
    pub exclude_path: Option<String>,
}

impl SearchFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(kind: EntryKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_tags_any(mut self, tags: Vec<String>) -> Self {
        self.tags_any = tags;
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn excluding_path(mut self, path: impl Into<String>) -> Self {
        self.exclude_path = Some(path.into());
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if self.kind.is_some_and(|k| k != entry.kind) {
            return false;
        }
        if !self.tags_any.is_empty() && !entry.tags.iter().any(|t| self.tags_any.contains(t)) {
            return false;
        }
        let path = entry.source_path.as_deref();
        if let Some(prefix) = &self.path_prefix {
            if !path.is_some_and(|p| p.starts_with(prefix.as_str())) {
                return false;
            }
        }
        if let Some(excluded) = &self.exclude_path {
            if path == Some(excluded.as_str()) {
                return false;
            }
        }
        true
    }
}

/// One search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Internal vector id; larger ids were inserted later
    pub vector_id: u64,
    pub entry: Arc<IndexEntry>,
    /// Cosine similarity, 1.0 for identical direction
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_types::fingerprint;

    fn chunk(path: &str, tags: &[&str]) -> IndexEntry {
        IndexEntry::chunk(fingerprint(path, "m"), "m", path, 0)
            .with_tags(tags.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_default_filter_matches_everything() {
        let filter = SearchFilter::all();
        assert!(filter.is_unrestricted());
        assert!(filter.matches(&chunk("a.md", &[])));
        assert!(filter.matches(&IndexEntry::cached_query(fingerprint("q", "m"), "m")));
    }

    #[test]
    fn test_kind_filter() {
        let filter = SearchFilter::kind(EntryKind::CachedQuery);
        assert!(!filter.matches(&chunk("a.md", &[])));
        assert!(filter.matches(&IndexEntry::cached_query(fingerprint("q", "m"), "m")));
    }

    #[test]
    fn test_tag_and_path_filters() {
        let filter = SearchFilter::kind(EntryKind::Chunk)
            .with_tags_any(vec!["rust".into()])
            .with_path_prefix("projects/");
        assert!(filter.matches(&chunk("projects/a.md", &["rust", "notes"])));
        assert!(!filter.matches(&chunk("projects/b.md", &["python"])));
        assert!(!filter.matches(&chunk("journal/c.md", &["rust"])));
    }

    #[test]
    fn test_exclude_path() {
        let filter = SearchFilter::all().excluding_path("self.md");
        assert!(!filter.matches(&chunk("self.md", &[])));
        assert!(filter.matches(&chunk("other.md", &[])));
    }
}
