//! Artifacts and where they go.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use insight_router::RoutingDecision;
use insight_types::Fingerprint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::item::{ProvenanceRecord, RelatedNote};

/// The product of one note's trip through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub item_id: String,
    pub path: String,
    pub fingerprint: Fingerprint,
    /// Absent while a human review is pending
    pub analysis: Option<String>,
    pub escalation_id: Option<String>,
    pub tags: Vec<String>,
    pub related: Vec<RelatedNote>,
    pub confidence: f32,
    pub refine_iterations: u32,
    pub cost: f64,
    pub decisions: Vec<RoutingDecision>,
    pub provenance: Vec<ProvenanceRecord>,
    pub produced_at: DateTime<Utc>,
}

/// Receives finished artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn write(&self, artifact: &Artifact) -> Result<(), PipelineError>;
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn write(&self, artifact: &Artifact) -> Result<(), PipelineError> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(artifact.clone());
        Ok(())
    }
}

/// Writes each artifact as pretty JSON into a directory, one file per note.
/// A later artifact for the same note overwrites the earlier one.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an artifact for `note_path` is written to.
    pub fn file_for(&self, note_path: &str) -> PathBuf {
        let stem: String = note_path
            .trim_end_matches(".md")
            .chars()
            .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect();
        self.dir.join(format!("insight_{stem}.json"))
    }
}

#[async_trait]
impl ArtifactSink for JsonDirSink {
    async fn write(&self, artifact: &Artifact) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PipelineError::Sink(format!("{}: {e}", self.dir.display())))?;
        let file = self.file_for(&artifact.path);
        let json = serde_json::to_vec_pretty(artifact)?;
        tokio::fs::write(&file, json)
            .await
            .map_err(|e| PipelineError::Sink(format!("{}: {e}", file.display())))?;
        debug!(path = %artifact.path, file = %file.display(), "Wrote artifact");
        Ok(())
    }
}
