//! Pipeline error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::StageName;

/// How a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Error,
    Timeout,
    /// The run was cancelled while the stage was waiting to call a model
    Cancelled,
}

/// A stage failure. Recorded against the item; never aborts other items.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageName,
    pub kind: FailureKind,
    pub reason: String,
}

impl StageFailure {
    pub fn new(stage: StageName, reason: impl Into<String>) -> Self {
        Self {
            stage,
            kind: FailureKind::Error,
            reason: reason.into(),
        }
    }

    pub fn timeout(stage: StageName, reason: impl Into<String>) -> Self {
        Self {
            stage,
            kind: FailureKind::Timeout,
            reason: reason.into(),
        }
    }

    pub fn cancelled(stage: StageName) -> Self {
        Self {
            stage,
            kind: FailureKind::Cancelled,
            reason: "run cancelled".to_string(),
        }
    }

    /// Wrap any error raised inside `stage`.
    pub fn from_error(stage: StageName, err: impl fmt::Display) -> Self {
        Self::new(stage, err.to_string())
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.reason)
    }
}

/// Errors that end a whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Artifact sink error: {0}")]
    Sink(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Vector index error: {0}")]
    Index(#[from] insight_vector::VectorError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
