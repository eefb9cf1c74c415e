//! Process: chunk, tag, embed and index a note.

use std::sync::Arc;

use async_trait::async_trait;
use insight_embeddings::{EmbeddingCache, EmbeddingModel, EmbeddingRecord};
use insight_types::{normalize, Fingerprint};
use insight_vector::{is_zero_norm, EntryKind, IndexEntry, VectorIndex};
use tracing::debug;

use crate::chunking::{chunk_text, derive_tags, TextChunk};
use crate::error::StageFailure;
use crate::item::{ChunkRef, StageName, WorkItem};
use crate::stage::{Stage, StageContext};

/// Tags kept per chunk.
pub const TAGS_PER_CHUNK: usize = 5;

pub struct ProcessStage {
    embeddings: Arc<EmbeddingCache>,
    embedder: Arc<dyn EmbeddingModel>,
    index: Arc<VectorIndex>,
    chunk_max_chars: usize,
}

impl ProcessStage {
    pub fn new(
        embeddings: Arc<EmbeddingCache>,
        embedder: Arc<dyn EmbeddingModel>,
        index: Arc<VectorIndex>,
        chunk_max_chars: usize,
    ) -> Self {
        Self {
            embeddings,
            embedder,
            index,
            chunk_max_chars,
        }
    }

    fn fail(err: impl std::fmt::Display) -> StageFailure {
        StageFailure::from_error(StageName::Process, err)
    }

    /// Index entries currently held for `path`, as (fingerprint, offset)
    /// pairs, with their vector ids.
    fn indexed(&self, path: &str) -> (Vec<(Fingerprint, usize)>, Vec<u64>) {
        let model_id = self.embedder.model_id();
        self.index
            .entries_for_source(path)
            .into_iter()
            .filter(|(_, e)| e.kind == EntryKind::Chunk && e.model_id == model_id)
            .map(|(id, e)| ((e.fingerprint.clone(), e.chunk_offset), id))
            .unzip()
    }
}

#[async_trait]
impl Stage for ProcessStage {
    fn name(&self) -> StageName {
        StageName::Process
    }

    async fn run(&self, mut item: WorkItem, _ctx: &StageContext) -> Result<WorkItem, StageFailure> {
        let text = normalize(&item.document.text);
        let chunks = chunk_text(&text, self.chunk_max_chars);

        let mut embedded: Vec<(TextChunk, Arc<EmbeddingRecord>, Vec<String>)> =
            Vec::with_capacity(chunks.len());
        let mut computed = 0usize;
        for chunk in chunks {
            let lookup = self
                .embeddings
                .get_or_embed(&chunk.text, &self.embedder)
                .await
                .map_err(Self::fail)?;
            if lookup.computed {
                computed += 1;
            }
            if is_zero_norm(&lookup.record.vector) {
                debug!(path = %item.path(), offset = chunk.offset, "Skipping chunk without words");
                continue;
            }
            let tags = derive_tags(&chunk.text, TAGS_PER_CHUNK);
            embedded.push((chunk, lookup.record, tags));
        }

        let wanted: Vec<(Fingerprint, usize)> = embedded
            .iter()
            .map(|(chunk, record, _)| (record.fingerprint.clone(), chunk.offset))
            .collect();
        let (current, current_ids) = self.indexed(item.path());

        let vector_ids = if current == wanted {
            current_ids
        } else {
            let removed = self.index.remove_source(item.path()).map_err(Self::fail)?;
            let mut ids = Vec::with_capacity(embedded.len());
            for (chunk, record, tags) in &embedded {
                let entry = IndexEntry::chunk(
                    record.fingerprint.clone(),
                    record.model_id.clone(),
                    item.path(),
                    chunk.offset,
                )
                .with_tags(tags.clone());
                ids.push(self.index.insert(entry, &record.vector).map_err(Self::fail)?);
            }
            debug!(path = %item.path(), removed, inserted = ids.len(), "Reindexed note");
            ids
        };

        item.chunks = embedded
            .into_iter()
            .zip(vector_ids)
            .map(|((chunk, record, tags), vector_id)| ChunkRef {
                offset: chunk.offset,
                fingerprint: record.fingerprint.clone(),
                vector_id,
                tags,
            })
            .collect();
        let note = format!(
            "{} chunks, {} embeddings computed{}",
            item.chunks.len(),
            computed,
            if current == wanted { ", index unchanged" } else { "" }
        );
        item.record(StageName::Process, note);
        Ok(item)
    }
}
