//! The run engine.
//!
//! Pulls notes from a `VaultSource`, scans each into a `WorkItem` and drives
//! it through Process, Analyze, Refine and Produce. Items run concurrently
//! up to `parallelism_limit`; stages within an item run in order, each
//! bounded by `stage_timeout`. A failing item is recorded and never touches
//! its siblings. A cancelled run still reports every note the vault
//! delivered: finished, stopped between stages, or never started.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use hdrhistogram::Histogram;
use insight_router::RoutingPath;
use insight_types::{names, Fingerprint, MetricsSink, PipelineSettings, RawDocument};
use insight_vector::VectorIndex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::{FailureKind, PipelineError, StageFailure};
use crate::item::{ItemState, StageName, WorkItem};
use crate::source::VaultSource;
use crate::stage::StageContext;
use crate::stages::StageSet;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Items in flight at once
    pub parallelism_limit: usize,
    /// Bound on one stage of one item
    pub stage_timeout: Duration,
    /// Embedding model id used for fingerprints
    pub model_id: String,
}

impl PipelineConfig {
    pub fn from_settings(settings: &PipelineSettings, model_id: impl Into<String>) -> Self {
        Self {
            parallelism_limit: settings.parallelism_limit.max(1),
            stage_timeout: settings.stage_timeout(),
            model_id: model_id.into(),
        }
    }
}

/// A note that made it through Produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducedItem {
    pub item_id: String,
    pub path: String,
    pub fingerprint: Fingerprint,
    /// Set when the analysis awaits a human
    pub escalation_id: Option<String>,
    pub confidence: f32,
    pub cost: f64,
    pub refine_iterations: u32,
}

/// A note that failed or was cancelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub item_id: String,
    pub path: String,
    pub stage: StageName,
    pub kind: FailureKind,
    pub reason: String,
}

/// Routing decisions made during the run, by path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RoutingSummary {
    pub decisions: u64,
    pub cache_hits: u64,
    pub model_calls: u64,
    pub escalations: u64,
}

impl RoutingSummary {
    fn add(&mut self, path: RoutingPath) {
        self.decisions += 1;
        match path {
            RoutingPath::CacheHit => self.cache_hits += 1,
            RoutingPath::ModelCall => self.model_calls += 1,
            RoutingPath::HumanEscalation => self.escalations += 1,
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.decisions)
    }

    pub fn escalation_rate(&self) -> f64 {
        ratio(self.escalations, self.decisions)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Time-to-insight percentiles over produced items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TtiSummary {
    pub count: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub produced: Vec<ProducedItem>,
    pub failed: Vec<FailedItem>,
    pub cancelled: Vec<FailedItem>,
    /// Notes with no content
    pub skipped: Vec<String>,
    /// Notes the vault could not deliver
    pub vault_errors: Vec<String>,
    /// Index sources removed because their note is gone
    pub pruned: Vec<String>,
    /// Notes delivered after cancellation, never scanned
    pub not_started: Vec<String>,
    /// The run was cancelled; its results cover only part of the vault
    pub interrupted: bool,
    pub routing: RoutingSummary,
    pub total_cost: f64,
    pub tti: TtiSummary,
}

impl RunReport {
    /// Produced without waiting on a person.
    pub fn completed(&self) -> usize {
        self.produced.iter().filter(|p| p.escalation_id.is_none()).count()
    }

    /// Produced with a pending human review.
    pub fn escalated(&self) -> usize {
        self.produced.iter().filter(|p| p.escalation_id.is_some()).count()
    }

    pub fn produced_for(&self, path: &str) -> Option<&ProducedItem> {
        self.produced.iter().find(|p| p.path == path)
    }

    pub fn failed_for(&self, path: &str) -> Option<&FailedItem> {
        self.failed.iter().find(|f| f.path == path)
    }

    /// Notes left unfinished by cancellation.
    pub fn unfinished(&self) -> usize {
        self.cancelled.len() + self.not_started.len()
    }
}

enum Outcome {
    Done {
        item: WorkItem,
        tti: Duration,
    },
    Failed {
        item: WorkItem,
        failure: StageFailure,
    },
    Skipped(String),
    NotStarted(String),
    VaultError(String),
}

/// Runs the staged workflow over a vault.
pub struct Pipeline {
    stages: StageSet,
    config: PipelineConfig,
    metrics: Arc<dyn MetricsSink>,
    prune: Option<Arc<VectorIndex>>,
}

impl Pipeline {
    pub fn new(stages: StageSet, config: PipelineConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            stages,
            config,
            metrics,
            prune: None,
        }
    }

    /// After a complete, uncancelled pass, remove index entries for notes
    /// that are no longer in the vault.
    pub fn pruning(mut self, index: Arc<VectorIndex>) -> Self {
        self.prune = Some(index);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every note of `vault` through the pipeline.
    ///
    /// Cancelling `cancel` stops intake of new notes and stops items
    /// between stages; a model call already under way finishes first. The
    /// report is then marked interrupted and lists the notes that never
    /// started.
    pub async fn run(
        &self,
        vault: &dyn VaultSource,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Ulid::new().to_string();
        let started_at = Utc::now();
        let ctx = StageContext::new(cancel.clone());
        let mut tti = Histogram::<u64>::new_with_bounds(1, 24 * 3_600_000_000, 3)
            .map_err(|e| PipelineError::Metrics(e.to_string()))?;
        info!(run_id = %run_id, parallelism = self.config.parallelism_limit, "Pipeline run started");

        let mut report = RunReport {
            run_id,
            started_at,
            finished_at: started_at,
            produced: Vec::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
            skipped: Vec::new(),
            vault_errors: Vec::new(),
            pruned: Vec::new(),
            not_started: Vec::new(),
            interrupted: false,
            routing: RoutingSummary::default(),
            total_cost: 0.0,
            tti: TtiSummary::default(),
        };
        let mut seen: HashSet<String> = HashSet::new();

        let mut outcomes = std::pin::pin!(vault
            .documents()
            .map(|doc| self.drive_document(doc, &ctx))
            .buffer_unordered(self.config.parallelism_limit));

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Outcome::Done { item, tti: elapsed } => {
                    tti.saturating_record(elapsed.as_micros().max(1) as u64);
                    self.metrics.counter(names::ITEMS_COMPLETED, 1);
                    seen.insert(item.path().to_string());
                    tally(&mut report, &item);
                    report.produced.push(ProducedItem {
                        item_id: item.id.clone(),
                        path: item.path().to_string(),
                        fingerprint: item.document.fingerprint.clone(),
                        escalation_id: item.escalation_id.clone(),
                        confidence: item.confidence,
                        cost: item.cost_spent,
                        refine_iterations: item.refine_iterations,
                    });
                }
                Outcome::Failed { item, failure } => {
                    seen.insert(item.path().to_string());
                    tally(&mut report, &item);
                    let failed = FailedItem {
                        item_id: item.id.clone(),
                        path: item.path().to_string(),
                        stage: failure.stage,
                        kind: failure.kind,
                        reason: failure.reason,
                    };
                    if failed.kind == FailureKind::Cancelled {
                        report.cancelled.push(failed);
                    } else {
                        self.metrics.counter(names::ITEMS_FAILED, 1);
                        report.failed.push(failed);
                    }
                }
                Outcome::Skipped(path) => report.skipped.push(path),
                Outcome::NotStarted(path) => report.not_started.push(path),
                Outcome::VaultError(reason) => report.vault_errors.push(reason),
            }
        }
        report.interrupted = cancel.is_cancelled();

        if let Some(index) = &self.prune {
            if !report.interrupted && report.vault_errors.is_empty() {
                report.pruned = prune_missing(index, &seen)?;
            }
        }

        report.tti = TtiSummary {
            count: tti.len(),
            p50_ms: micros_to_ms(tti.value_at_quantile(0.50)),
            p95_ms: micros_to_ms(tti.value_at_quantile(0.95)),
            max_ms: micros_to_ms(tti.max()),
        };
        self.metrics.gauge(names::TTI_P50_MS, report.tti.p50_ms);
        self.metrics.gauge(names::TTI_P95_MS, report.tti.p95_ms);
        report.produced.sort_by(|a, b| a.path.cmp(&b.path));
        report.failed.sort_by(|a, b| a.path.cmp(&b.path));
        report.not_started.sort();
        report.finished_at = Utc::now();

        info!(
            run_id = %report.run_id,
            completed = report.completed(),
            escalated = report.escalated(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            not_started = report.not_started.len(),
            interrupted = report.interrupted,
            skipped = report.skipped.len(),
            cost = report.total_cost,
            tti_p50_ms = report.tti.p50_ms,
            tti_p95_ms = report.tti.p95_ms,
            "Pipeline run finished"
        );
        Ok(report)
    }

    async fn drive_document(
        &self,
        doc: Result<RawDocument, PipelineError>,
        ctx: &StageContext,
    ) -> Outcome {
        let raw = match doc {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Vault could not deliver a note");
                return Outcome::VaultError(e.to_string());
            }
        };
        if ctx.is_cancelled() {
            return Outcome::NotStarted(raw.path);
        }
        let entered = Instant::now();
        let item = WorkItem::scan(raw, &self.config.model_id);
        if !item.document.has_content() {
            debug!(path = %item.path(), "Skipping empty note");
            return Outcome::Skipped(item.document.path);
        }
        match self.drive(item, ctx).await {
            Ok(item) => Outcome::Done {
                item,
                tti: entered.elapsed(),
            },
            Err((item, failure)) => Outcome::Failed { item, failure },
        }
    }

    /// Run the remaining stages of one item in order.
    async fn drive(
        &self,
        mut item: WorkItem,
        ctx: &StageContext,
    ) -> Result<WorkItem, (WorkItem, StageFailure)> {
        while let Some(name) = item.state.next_stage() {
            if ctx.is_cancelled() {
                return Err(fail(item, StageFailure::cancelled(name)));
            }
            let Some(stage) = self.stages.get(name) else {
                return Err(fail(item, StageFailure::new(name, "no stage registered")));
            };

            let snapshot = item.clone();
            let started = Instant::now();
            item = match tokio::time::timeout(self.config.stage_timeout, stage.run(item, ctx)).await {
                Ok(Ok(mut next)) => {
                    if let Err(failure) = next.complete(name) {
                        return Err(fail(next, failure));
                    }
                    next
                }
                Ok(Err(failure)) => return Err(fail(snapshot, failure)),
                Err(_) => {
                    let failure = StageFailure::timeout(
                        name,
                        format!("timed out after {:?}", self.config.stage_timeout),
                    );
                    return Err(fail(snapshot, failure));
                }
            };
            debug!(
                item = %item.id,
                path = %item.path(),
                stage = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage complete"
            );
        }
        match item.state {
            ItemState::Produced => Ok(item),
            _ => {
                let failure = StageFailure::new(StageName::Produce, "item did not reach produced");
                Err(fail(item, failure))
            }
        }
    }
}

fn fail(mut item: WorkItem, failure: StageFailure) -> (WorkItem, StageFailure) {
    if failure.kind == FailureKind::Cancelled {
        debug!(path = %item.path(), stage = %failure.stage, "Item cancelled");
    } else {
        warn!(path = %item.path(), stage = %failure.stage, reason = %failure.reason, "Item failed");
    }
    item.fail(&failure);
    (item, failure)
}

fn tally(report: &mut RunReport, item: &WorkItem) {
    report.total_cost += item.cost_spent;
    for decision in &item.decisions {
        report.routing.add(decision.path);
    }
}

fn prune_missing(index: &VectorIndex, seen: &HashSet<String>) -> Result<Vec<String>, PipelineError> {
    let mut pruned: Vec<String> = index
        .sources()
        .into_iter()
        .filter(|path| !seen.contains(path))
        .collect();
    pruned.sort();
    for path in &pruned {
        let removed = index.remove_source(path)?;
        info!(path = %path, removed, "Pruned entries for missing note");
    }
    Ok(pruned)
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}
