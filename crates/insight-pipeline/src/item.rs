//! Work items and their state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use insight_router::RoutingDecision;
use insight_types::{Document, Fingerprint, RawDocument};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::StageFailure;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Scan,
    Process,
    Analyze,
    Refine,
    Produce,
}

impl StageName {
    /// State an item reaches when this stage succeeds.
    pub fn completes_to(self) -> ItemState {
        match self {
            StageName::Scan => ItemState::Scanned,
            StageName::Process => ItemState::Processed,
            StageName::Analyze => ItemState::Analyzed,
            StageName::Refine => ItemState::Refined,
            StageName::Produce => ItemState::Produced,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageName::Scan => "scan",
            StageName::Process => "process",
            StageName::Analyze => "analyze",
            StageName::Refine => "refine",
            StageName::Produce => "produce",
        };
        f.write_str(name)
    }
}

/// Per-item state. `Produced` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemState {
    Scanned,
    Processed,
    Analyzed,
    Refined,
    Produced,
    Failed { stage: StageName, reason: String },
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Produced | ItemState::Failed { .. })
    }

    /// The stage that runs next from this state.
    pub fn next_stage(&self) -> Option<StageName> {
        match self {
            ItemState::Scanned => Some(StageName::Process),
            ItemState::Processed => Some(StageName::Analyze),
            ItemState::Analyzed => Some(StageName::Refine),
            ItemState::Refined => Some(StageName::Produce),
            ItemState::Produced | ItemState::Failed { .. } => None,
        }
    }
}

/// One append-only provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub stage: StageName,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// A chunk of the note as indexed by Process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub offset: usize,
    pub fingerprint: Fingerprint,
    pub vector_id: u64,
    pub tags: Vec<String>,
}

/// Another note found to be related.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedNote {
    pub path: String,
    pub score: f32,
}

/// The unit flowing through the pipeline: one content version of one note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub document: Document,
    pub state: ItemState,
    pub chunks: Vec<ChunkRef>,
    pub related: Vec<RelatedNote>,
    /// Model or human answer from Analyze
    pub analysis: Option<String>,
    pub escalation_id: Option<String>,
    pub confidence: f32,
    pub cost_spent: f64,
    pub decisions: Vec<RoutingDecision>,
    pub refine_iterations: u32,
    provenance: Vec<ProvenanceRecord>,
}

impl WorkItem {
    /// Fingerprint a raw note into a freshly scanned item.
    pub fn scan(raw: RawDocument, model_id: &str) -> Self {
        let document = Document::from_raw(raw, model_id);
        let mut item = Self {
            id: Ulid::new().to_string(),
            document,
            state: ItemState::Scanned,
            chunks: Vec::new(),
            related: Vec::new(),
            analysis: None,
            escalation_id: None,
            confidence: 0.0,
            cost_spent: 0.0,
            decisions: Vec::new(),
            refine_iterations: 0,
            provenance: Vec::new(),
        };
        let note = format!("fingerprint {}", item.document.fingerprint.short());
        item.record(StageName::Scan, note);
        item
    }

    pub fn path(&self) -> &str {
        &self.document.path
    }

    pub fn provenance(&self) -> &[ProvenanceRecord] {
        &self.provenance
    }

    /// Append a provenance record.
    pub fn record(&mut self, stage: StageName, note: impl Into<String>) {
        self.provenance.push(ProvenanceRecord {
            stage,
            note: note.into(),
            at: Utc::now(),
        });
    }

    /// Move to the state `stage` completes to. Only the next stage in order
    /// may complete.
    pub fn complete(&mut self, stage: StageName) -> Result<(), StageFailure> {
        if self.state.next_stage() != Some(stage) {
            return Err(StageFailure::new(
                stage,
                format!("cannot complete {stage} from {:?}", self.state),
            ));
        }
        self.state = stage.completes_to();
        Ok(())
    }

    pub fn fail(&mut self, failure: &StageFailure) {
        self.record(failure.stage, format!("failed: {}", failure.reason));
        self.state = ItemState::Failed {
            stage: failure.stage,
            reason: failure.reason.clone(),
        };
    }

    pub fn is_escalated(&self) -> bool {
        self.escalation_id.is_some()
    }

    /// Union of chunk tags in first-seen order.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in self.chunks.iter().flat_map(|c| &c.tags) {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }
}
