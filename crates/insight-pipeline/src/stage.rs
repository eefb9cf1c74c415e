//! The stage abstraction.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StageFailure;
use crate::item::{StageName, WorkItem};

/// Per-run context handed to every stage.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    /// Fires when the run is cancelled. Stages check it before starting
    /// a model call; work already in flight runs to completion.
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// One typed transform of a work item.
///
/// The engine advances the item's state after `run` returns `Ok`; stages
/// only fill in their payload and provenance.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(&self, item: WorkItem, ctx: &StageContext) -> Result<WorkItem, StageFailure>;
}
