//! Refine: widen the neighborhood until confidence settles.
//!
//! Each iteration doubles the number of neighbors consulted per chunk,
//! folds newly found notes into the related set and re-estimates
//! confidence from neighbor agreement. No model is called here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use insight_router::neighbor_confidence;
use insight_vector::{EntryKind, SearchFilter, VectorError, VectorIndex};
use serde::{Deserialize, Serialize};

use crate::error::StageFailure;
use crate::item::{RelatedNote, StageName, WorkItem};
use crate::stage::{Stage, StageContext};

/// Smallest gain that counts as progress.
const MIN_IMPROVEMENT: f32 = 1e-3;

/// Consecutive non-improving iterations before giving up.
const STAGNATION_LIMIT: u32 = 2;

const MAX_NEIGHBORS: usize = 64;

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineStop {
    TargetReached,
    Stagnated,
    IterationLimit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineOutcome {
    pub confidence: f32,
    pub iterations: u32,
    pub stop: RefineStop,
}

/// Run `step` until the best confidence reaches `target`, fails to improve
/// on two consecutive iterations, or `max_iterations` steps have run.
///
/// `step` gets the iteration number (from 0) and the best confidence so
/// far, and returns a new estimate. Confidence never decreases.
pub fn refine_loop<F, E>(
    initial: f32,
    target: f32,
    max_iterations: u32,
    mut step: F,
) -> Result<RefineOutcome, E>
where
    F: FnMut(u32, f32) -> Result<f32, E>,
{
    let mut best = initial;
    let mut iterations = 0;
    let mut stale = 0;
    let stop = loop {
        if best >= target {
            break RefineStop::TargetReached;
        }
        if iterations >= max_iterations {
            break RefineStop::IterationLimit;
        }
        let next = step(iterations, best)?;
        iterations += 1;
        if next > best + MIN_IMPROVEMENT {
            best = next;
            stale = 0;
        } else {
            stale += 1;
            if stale >= STAGNATION_LIMIT {
                break RefineStop::Stagnated;
            }
        }
    };
    Ok(RefineOutcome {
        confidence: best,
        iterations,
        stop,
    })
}

/// Refine stage settings.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    pub max_iterations: u32,
    pub target_confidence: f32,
    /// Neighbors per chunk on the first iteration
    pub initial_k: usize,
    /// Related notes kept per item
    pub related_k: usize,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            target_confidence: 0.85,
            initial_k: 4,
            related_k: 5,
        }
    }
}

pub struct RefineStage {
    index: Arc<VectorIndex>,
    config: RefineConfig,
}

impl RefineStage {
    pub fn new(index: Arc<VectorIndex>, config: RefineConfig) -> Self {
        Self { index, config }
    }

    /// Mean neighbor confidence across the item's chunks at width `k`,
    /// recording every note seen in `seen`.
    fn support(
        &self,
        item: &WorkItem,
        k: usize,
        seen: &mut HashMap<String, f32>,
    ) -> Result<f32, VectorError> {
        let filter = SearchFilter::kind(EntryKind::Chunk).excluding_path(item.path());
        let mut total = 0.0;
        let mut counted = 0usize;
        for chunk in &item.chunks {
            let Some(vector) = self.index.vector(chunk.vector_id) else {
                continue;
            };
            let hits = self.index.search(&vector, k, &filter)?;
            let vectors: Vec<(f32, Arc<[f32]>)> = hits
                .iter()
                .filter_map(|hit| self.index.vector(hit.vector_id).map(|v| (hit.score, v)))
                .collect();
            let neighbors: Vec<(f32, &[f32])> = vectors.iter().map(|(s, v)| (*s, &v[..])).collect();
            total += neighbor_confidence(&neighbors);
            counted += 1;

            for hit in &hits {
                if let Some(path) = &hit.entry.source_path {
                    let score = seen.entry(path.clone()).or_insert(hit.score);
                    *score = score.max(hit.score);
                }
            }
        }
        Ok(if counted == 0 { 0.0 } else { total / counted as f32 })
    }
}

#[async_trait]
impl Stage for RefineStage {
    fn name(&self) -> StageName {
        StageName::Refine
    }

    async fn run(&self, mut item: WorkItem, _ctx: &StageContext) -> Result<WorkItem, StageFailure> {
        let mut seen: HashMap<String, f32> = item
            .related
            .iter()
            .map(|r| (r.path.clone(), r.score))
            .collect();
        let analysis_confidence = item.confidence;

        let outcome = refine_loop(
            item.confidence,
            self.config.target_confidence,
            self.config.max_iterations,
            |iteration, _best| {
                let k = self
                    .config
                    .initial_k
                    .max(1)
                    .saturating_mul(1 << iteration.min(6))
                    .min(MAX_NEIGHBORS);
                let support = self.support(&item, k, &mut seen)?;
                Ok::<f32, VectorError>((analysis_confidence + support) / 2.0)
            },
        )
        .map_err(|e| StageFailure::from_error(StageName::Refine, e))?;

        let mut related: Vec<RelatedNote> = seen
            .into_iter()
            .map(|(path, score)| RelatedNote { path, score })
            .collect();
        related.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        related.truncate(self.config.related_k);

        item.related = related;
        item.confidence = outcome.confidence;
        item.refine_iterations = outcome.iterations;
        item.record(
            StageName::Refine,
            format!(
                "{} iterations, confidence {:.3}, {:?}",
                outcome.iterations, outcome.confidence, outcome.stop
            ),
        );
        Ok(item)
    }
}
