//! Command implementations for vault-insight.
//!
//! - run: one pipeline pass over a vault
//! - schedule: maintenance jobs and recurring runs until Ctrl-C
//! - cache / index / review: inspection and maintenance

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use insight_pipeline::{RunReport, VaultSource};
use insight_router::EscalationQueue;
use insight_scheduler::{
    register_maintenance_jobs, register_vault_run, MaintenanceTargets, SchedulerConfig,
    SchedulerService,
};
use insight_types::{names, Settings};
use insight_vector::VectorError;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::App;
use crate::cli::{CacheCommands, IndexCommands, ReviewCommands};
use crate::vault::DirVault;

const DEFAULT_OUT_DIR: &str = ".insights";

fn out_dir(vault: &Path, out: Option<&Path>) -> PathBuf {
    out.map(Path::to_path_buf)
        .unwrap_or_else(|| vault.join(DEFAULT_OUT_DIR))
}

/// Cancel `token` on Ctrl-C. The listener stops when the handle is aborted.
fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, finishing in-flight work...");
            token.cancel();
        }
    })
}

/// Run the pipeline once over `vault`.
pub async fn run_once(app: &App, vault: &Path, out: Option<&Path>) -> Result<RunReport> {
    let out = out_dir(vault, out);
    let source = DirVault::new(vault);
    let pipeline = app.pipeline(&out);

    let cancel = CancellationToken::new();
    let listener = cancel_on_ctrl_c(cancel.clone());
    let report = pipeline.run(&source as &dyn VaultSource, cancel).await;
    listener.abort();
    let report = report.context("Pipeline run failed")?;

    if let Err(e) = app.embeddings.flush() {
        warn!(error = %e, "Failed to flush embedding access times");
    }
    info!(out = %out.display(), "Artifacts written");
    Ok(report)
}

/// Human-readable run summary.
pub fn format_report(report: &RunReport) -> String {
    let mut text = String::new();
    if report.interrupted {
        let _ = writeln!(text, "Run {} (interrupted, partial results)", report.run_id);
    } else {
        let _ = writeln!(text, "Run {}", report.run_id);
    }
    let _ = writeln!(
        text,
        "  produced: {} ({} awaiting review)",
        report.produced.len(),
        report.escalated()
    );
    let _ = writeln!(text, "  failed: {}", report.failed.len());
    if !report.cancelled.is_empty() {
        let _ = writeln!(text, "  cancelled: {}", report.cancelled.len());
    }
    if !report.not_started.is_empty() {
        let _ = writeln!(text, "  not started: {}", report.not_started.len());
    }
    if !report.skipped.is_empty() {
        let _ = writeln!(text, "  skipped (empty): {}", report.skipped.len());
    }
    if !report.pruned.is_empty() {
        let _ = writeln!(text, "  pruned: {}", report.pruned.len());
    }
    let _ = writeln!(
        text,
        "  routing: {} decisions, {:.0}% cached, {:.0}% escalated",
        report.routing.decisions,
        report.routing.cache_hit_rate() * 100.0,
        report.routing.escalation_rate() * 100.0
    );
    let _ = writeln!(text, "  cost: ${:.4}", report.total_cost);
    let _ = writeln!(
        text,
        "  time to insight: p50 {:.1}ms, p95 {:.1}ms",
        report.tti.p50_ms, report.tti.p95_ms
    );
    for failed in &report.failed {
        let _ = writeln!(text, "  ! {} [{}] {}", failed.path, failed.stage, failed.reason);
    }
    for error in &report.vault_errors {
        let _ = writeln!(text, "  ! vault: {}", error);
    }
    text
}

/// Print a report, as JSON when asked.
pub fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", format_report(report));
    }
    Ok(())
}

/// Run maintenance and, if configured, recurring vault runs until Ctrl-C.
pub async fn run_scheduled(app: App, vault: &Path, out: Option<&Path>) -> Result<()> {
    let settings = app.settings.scheduler.clone();
    let mut scheduler = SchedulerService::new(SchedulerConfig::from_settings(&settings))
        .await
        .context("Failed to create scheduler")?;

    register_maintenance_jobs(
        &scheduler,
        MaintenanceTargets {
            responses: Arc::clone(&app.responses),
            embeddings: Arc::clone(&app.embeddings),
            index: Arc::clone(&app.index),
            metrics: Arc::clone(&app.metrics),
        },
        &settings,
    )
    .await
    .context("Failed to register maintenance jobs")?;

    let pipeline = Arc::new(app.pipeline(&out_dir(vault, out)));
    let source: Arc<dyn VaultSource> = Arc::new(DirVault::new(vault));
    register_vault_run(&scheduler, pipeline, source, &settings)
        .await
        .context("Failed to register vault run")?;

    scheduler.start().await.context("Failed to start scheduler")?;
    println!("Scheduler running; press Ctrl+C to stop");
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    let registry = scheduler.registry();
    scheduler.shutdown().await.context("Scheduler shutdown failed")?;
    for status in registry.get_all_status() {
        info!(
            job = %status.job_name,
            runs = status.run_count,
            errors = status.error_count,
            "Job summary"
        );
    }
    app.embeddings.flush().context("Failed to flush embedding cache")?;
    Ok(())
}

/// Effective settings, as they would appear in a config file.
pub fn render_config(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to render configuration")
}

pub fn handle_cache(app: &App, command: CacheCommands) -> Result<()> {
    match command {
        CacheCommands::Stats => {
            let embeddings = app.embeddings.stats();
            let responses = app.responses.stats();
            println!("Embedding cache:");
            println!("  entries: {}", embeddings.entries);
            println!(
                "  bytes: {} / {}",
                embeddings.bytes, embeddings.capacity_bytes
            );
            println!(
                "  hits: {}  misses: {}  computed: {}  evicted: {}",
                embeddings.hits, embeddings.misses, embeddings.computations, embeddings.evictions
            );
            println!("Response cache:");
            println!("  entries: {}", responses.entries);
            println!(
                "  hit rate: {:.1}%  expired purged: {}  evicted: {}",
                responses.hit_rate * 100.0,
                responses.expired_purged,
                responses.evictions
            );
        }
        CacheCommands::Sweep => {
            let removed = app.responses.sweep().context("Sweep failed")?;
            println!("Removed {} expired responses", removed);
        }
        CacheCommands::Evict { model } => {
            let removed = app
                .embeddings
                .evict(|record| record.model_id == model)
                .context("Eviction failed")?;
            println!("Evicted {} embeddings computed by {}", removed, model);
        }
    }
    Ok(())
}

pub fn handle_index(app: &App, command: IndexCommands) -> Result<()> {
    match command {
        IndexCommands::Stats => {
            let stats = app.index.stats();
            println!("Vector index:");
            println!("  live entries: {}", stats.live_entries);
            println!(
                "  tombstones: {} ({:.1}%)",
                stats.tombstones,
                stats.tombstone_ratio() * 100.0
            );
            println!("  dimension: {}", stats.dimension);
            println!("  generation: {}", stats.generation);
        }
        IndexCommands::Compact { force } => {
            let compacted = if force {
                app.index.compact().context("Compaction failed")?;
                true
            } else {
                app.index.maybe_compact().context("Compaction failed")?
            };
            if compacted {
                app.metrics.counter(names::INDEX_COMPACTIONS, 1);
                println!("Index compacted");
            } else {
                println!("Tombstone ratio below threshold; nothing to do");
            }
        }
        IndexCommands::Recall { samples, k } => {
            let queries = app.index.sample_vectors(samples);
            match app.index.verify_recall(&queries, k) {
                Ok(recall) => println!(
                    "recall@{}: {:.3} over {} queries (floor {:.2})",
                    k,
                    recall,
                    queries.len(),
                    app.index.config().recall_floor
                ),
                Err(VectorError::RecallBelowFloor { recall, floor }) => {
                    anyhow::bail!("recall@{} is {:.3}, below the floor of {:.2}", k, recall, floor)
                }
                Err(e) => return Err(e).context("Recall measurement failed"),
            }
        }
    }
    Ok(())
}

pub async fn handle_review(app: &App, command: ReviewCommands) -> Result<()> {
    match command {
        ReviewCommands::List => {
            let pending = app.escalations.pending().context("Failed to read escalations")?;
            if pending.is_empty() {
                println!("Nothing awaiting review");
            }
            for escalation in pending {
                let headline = escalation.prompt.lines().find(|l| l.starts_with("Note:"));
                println!(
                    "{}  {}  {}  {}",
                    escalation.id,
                    escalation.created_at.format("%Y-%m-%d %H:%M"),
                    escalation.reason,
                    headline.unwrap_or(escalation.item_id.as_str())
                );
            }
        }
        ReviewCommands::Resolve { id, answer } => {
            let escalation = app
                .router
                .resolve_escalation(&id, &answer)
                .await
                .with_context(|| format!("Failed to resolve {}", id))?;
            println!(
                "Resolved {} for item {}; the answer now serves similar prompts",
                escalation.id, escalation.item_id
            );
        }
    }
    Ok(())
}
