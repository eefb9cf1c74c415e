//! The four stages after Scan.

mod analyze;
mod process;
mod produce;
mod refine;

pub use analyze::{AnalyzeConfig, AnalyzeStage};
pub use process::{ProcessStage, TAGS_PER_CHUNK};
pub use produce::{artifact_for, ProduceStage};
pub use refine::{refine_loop, RefineConfig, RefineOutcome, RefineStage, RefineStop};

use std::sync::Arc;

use insight_embeddings::{EmbeddingCache, EmbeddingModel};
use insight_router::CostRouter;
use insight_types::PipelineSettings;
use insight_vector::VectorIndex;

use crate::item::StageName;
use crate::sink::ArtifactSink;
use crate::stage::Stage;

/// Collaborators for the standard stages.
pub struct StageDeps {
    pub embeddings: Arc<EmbeddingCache>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub index: Arc<VectorIndex>,
    pub router: Arc<CostRouter>,
    pub sink: Arc<dyn ArtifactSink>,
}

/// One stage per step. Scan is the engine's own intake.
#[derive(Clone)]
pub struct StageSet {
    pub process: Arc<dyn Stage>,
    pub analyze: Arc<dyn Stage>,
    pub refine: Arc<dyn Stage>,
    pub produce: Arc<dyn Stage>,
}

impl StageSet {
    pub fn standard(deps: StageDeps, settings: &PipelineSettings) -> Self {
        let analyze = AnalyzeConfig {
            summary_chunk_chars: settings.summary_chunk_chars.max(1),
            ..AnalyzeConfig::default()
        };
        let refine = RefineConfig {
            max_iterations: settings.refine_max_iterations,
            target_confidence: settings.refine_target_confidence,
            related_k: analyze.related_k,
            ..RefineConfig::default()
        };
        Self {
            process: Arc::new(ProcessStage::new(
                deps.embeddings,
                deps.embedder,
                Arc::clone(&deps.index),
                settings.chunk_max_chars,
            )),
            analyze: Arc::new(AnalyzeStage::new(deps.router, Arc::clone(&deps.index), analyze)),
            refine: Arc::new(RefineStage::new(deps.index, refine)),
            produce: Arc::new(ProduceStage::new(deps.sink)),
        }
    }

    pub fn with_analyze(mut self, stage: Arc<dyn Stage>) -> Self {
        self.analyze = stage;
        self
    }

    pub fn get(&self, name: StageName) -> Option<&Arc<dyn Stage>> {
        match name {
            StageName::Scan => None,
            StageName::Process => Some(&self.process),
            StageName::Analyze => Some(&self.analyze),
            StageName::Refine => Some(&self.refine),
            StageName::Produce => Some(&self.produce),
        }
    }
}
