//! # insight-pipeline
//!
//! The staged workflow that turns vault notes into insight artifacts.
//!
//! ## Stages
//! 1. **Scan**: fingerprint the note into a `WorkItem`
//! 2. **Process**: chunk, tag, embed (through the embedding cache) and index
//! 3. **Analyze**: find related notes and route the analysis prompt through
//!    the cost router
//! 4. **Refine**: widen the neighborhood until confidence settles
//! 5. **Produce**: write the artifact
//!
//! A failure in any stage is recorded against that item only.

pub mod chunking;
pub mod engine;
pub mod error;
pub mod item;
pub mod sink;
pub mod source;
pub mod stage;
pub mod stages;

#[cfg(test)]
mod testing;

pub use chunking::{chunk_text, derive_tags, TextChunk};
pub use engine::{
    FailedItem, Pipeline, PipelineConfig, ProducedItem, RoutingSummary, RunReport, TtiSummary,
};
pub use error::{FailureKind, PipelineError, StageFailure};
pub use item::{ChunkRef, ItemState, ProvenanceRecord, RelatedNote, StageName, WorkItem};
pub use sink::{Artifact, ArtifactSink, JsonDirSink, MemorySink};
pub use source::{MemoryVault, VaultSource};
pub use stage::{Stage, StageContext};
pub use stages::{
    AnalyzeConfig, AnalyzeStage, ProcessStage, ProduceStage, RefineConfig, RefineStage,
    RefineStop, StageDeps, StageSet,
};
