//! Vault collaborator.
//!
//! The engine never touches the filesystem; it pulls notes from a
//! `VaultSource`. The CLI supplies a directory walker.

use std::sync::{Mutex, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use insight_types::RawDocument;

use crate::error::PipelineError;

/// A lazy, restartable stream of vault notes.
///
/// Each call to `documents` starts a fresh pass over the vault.
pub trait VaultSource: Send + Sync {
    fn documents(&self) -> BoxStream<'_, Result<RawDocument, PipelineError>>;
}

/// In-memory vault, keyed by path.
#[derive(Debug, Default)]
pub struct MemoryVault {
    notes: Mutex<Vec<RawDocument>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notes(notes: impl IntoIterator<Item = RawDocument>) -> Self {
        let vault = Self::new();
        for note in notes {
            vault.upsert(note);
        }
        vault
    }

    /// Add a note, replacing any note at the same path.
    pub fn upsert(&self, note: RawDocument) {
        let mut notes = self.notes.lock().unwrap_or_else(PoisonError::into_inner);
        match notes.iter_mut().find(|n| n.path == note.path) {
            Some(existing) => *existing = note,
            None => notes.push(note),
        }
    }

    pub fn remove(&self, path: &str) -> bool {
        let mut notes = self.notes.lock().unwrap_or_else(PoisonError::into_inner);
        let before = notes.len();
        notes.retain(|n| n.path != path);
        notes.len() != before
    }

    pub fn len(&self) -> usize {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VaultSource for MemoryVault {
    fn documents(&self) -> BoxStream<'_, Result<RawDocument, PipelineError>> {
        let snapshot = self
            .notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_stream_is_restartable() {
        let vault = MemoryVault::with_notes([
            RawDocument::new("a.md", "alpha", Utc::now()),
            RawDocument::new("b.md", "beta", Utc::now()),
        ]);
        let first: Vec<RawDocument> = vault.documents().try_collect().await.unwrap();
        let second: Vec<RawDocument> = vault.documents().try_collect().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_path() {
        let vault = MemoryVault::new();
        vault.upsert(RawDocument::new("a.md", "v1", Utc::now()));
        vault.upsert(RawDocument::new("a.md", "v2", Utc::now()));
        let docs: Vec<RawDocument> = vault.documents().try_collect().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "v2");
        assert!(vault.remove("a.md"));
        assert!(vault.is_empty());
    }
}
