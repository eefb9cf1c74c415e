//! Produce: assemble the artifact and hand it to the sink.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StageFailure;
use crate::item::{StageName, WorkItem};
use crate::sink::{Artifact, ArtifactSink};
use crate::stage::{Stage, StageContext};

pub struct ProduceStage {
    sink: Arc<dyn ArtifactSink>,
}

impl ProduceStage {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self { sink }
    }
}

/// Snapshot an item as an artifact.
pub fn artifact_for(item: &WorkItem) -> Artifact {
    Artifact {
        item_id: item.id.clone(),
        path: item.path().to_string(),
        fingerprint: item.document.fingerprint.clone(),
        analysis: item.analysis.clone(),
        escalation_id: item.escalation_id.clone(),
        tags: item.tags(),
        related: item.related.clone(),
        confidence: item.confidence,
        refine_iterations: item.refine_iterations,
        cost: item.cost_spent,
        decisions: item.decisions.clone(),
        provenance: item.provenance().to_vec(),
        produced_at: Utc::now(),
    }
}

#[async_trait]
impl Stage for ProduceStage {
    fn name(&self) -> StageName {
        StageName::Produce
    }

    async fn run(&self, mut item: WorkItem, _ctx: &StageContext) -> Result<WorkItem, StageFailure> {
        let note = if item.is_escalated() {
            "artifact written, awaiting review"
        } else {
            "artifact written"
        };
        item.record(StageName::Produce, note);
        self.sink
            .write(&artifact_for(&item))
            .await
            .map_err(|e| StageFailure::from_error(StageName::Produce, e))?;
        Ok(item)
    }
}
