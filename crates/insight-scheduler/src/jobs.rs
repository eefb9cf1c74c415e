//! Background jobs for a running vault-insight daemon.
//!
//! - response cache sweep: drop expired semantic cache entries
//! - embedding flush: persist batched last-access times
//! - index compaction: rebuild the vector index once tombstones pile up
//! - vault run: push every note through the pipeline

use std::sync::Arc;
use std::time::Duration;

use insight_cache::SemanticCache;
use insight_embeddings::EmbeddingCache;
use insight_pipeline::{Pipeline, VaultSource};
use insight_types::{names, MetricsSink, SchedulerSettings};
use insight_vector::VectorIndex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::overlap::OverlapPolicy;
use crate::scheduler::{JobOptions, SchedulerService};
use crate::SchedulerError;

pub const RESPONSE_SWEEP_JOB: &str = "response-cache-sweep";
pub const EMBEDDING_FLUSH_JOB: &str = "embedding-flush";
pub const INDEX_COMPACTION_JOB: &str = "index-compaction";
pub const VAULT_RUN_JOB: &str = "vault-run";

const MAINTENANCE_TIMEOUT: Duration = Duration::from_secs(300);

/// Stores the maintenance jobs act on.
#[derive(Clone)]
pub struct MaintenanceTargets {
    pub responses: Arc<SemanticCache>,
    pub embeddings: Arc<EmbeddingCache>,
    pub index: Arc<VectorIndex>,
    pub metrics: Arc<dyn MetricsSink>,
}

pub fn sweep_responses(cache: &SemanticCache) -> Result<String, String> {
    let removed = cache.sweep().map_err(|e| e.to_string())?;
    Ok(format!("removed={}", removed))
}

pub fn flush_embeddings(cache: &EmbeddingCache) -> Result<String, String> {
    let written = cache.flush().map_err(|e| e.to_string())?;
    Ok(format!("written={}", written))
}

pub fn compact_index(index: &VectorIndex, metrics: &dyn MetricsSink) -> Result<String, String> {
    let compacted = index.maybe_compact().map_err(|e| e.to_string())?;
    if compacted {
        metrics.counter(names::INDEX_COMPACTIONS, 1);
    }
    Ok(format!("compacted={}", compacted))
}

/// One full pipeline run, stopped early if `shutdown` fires.
pub async fn run_vault(
    pipeline: &Pipeline,
    vault: &dyn VaultSource,
    shutdown: &CancellationToken,
) -> Result<String, String> {
    let report = pipeline
        .run(vault, shutdown.child_token())
        .await
        .map_err(|e| e.to_string())?;
    Ok(format!(
        "produced={} escalated={} failed={} cancelled={} not_started={}",
        report.produced.len(),
        report.escalated(),
        report.failed.len(),
        report.cancelled.len(),
        report.not_started.len()
    ))
}

/// Register sweep, flush and compaction on their configured schedules.
pub async fn register_maintenance_jobs(
    scheduler: &SchedulerService,
    targets: MaintenanceTargets,
    settings: &SchedulerSettings,
) -> Result<(), SchedulerError> {
    let options = JobOptions::default().with_timeout(MAINTENANCE_TIMEOUT);

    let responses = Arc::clone(&targets.responses);
    scheduler
        .register_job(RESPONSE_SWEEP_JOB, &settings.sweep_cron, options.clone(), move |_token| {
            let responses = Arc::clone(&responses);
            async move { sweep_responses(&responses) }
        })
        .await?;

    let embeddings = Arc::clone(&targets.embeddings);
    scheduler
        .register_job(EMBEDDING_FLUSH_JOB, &settings.flush_cron, options.clone(), move |_token| {
            let embeddings = Arc::clone(&embeddings);
            async move { flush_embeddings(&embeddings) }
        })
        .await?;

    let index = Arc::clone(&targets.index);
    let metrics = Arc::clone(&targets.metrics);
    scheduler
        .register_job(INDEX_COMPACTION_JOB, &settings.compaction_cron, options, move |_token| {
            let index = Arc::clone(&index);
            let metrics = Arc::clone(&metrics);
            async move { compact_index(&index, metrics.as_ref()) }
        })
        .await?;

    info!("Maintenance jobs registered");
    Ok(())
}

/// Register the recurring vault run. Does nothing when `settings.run_cron` is unset.
///
/// Runs never overlap; a firing during a long run is skipped.
pub async fn register_vault_run(
    scheduler: &SchedulerService,
    pipeline: Arc<Pipeline>,
    vault: Arc<dyn VaultSource>,
    settings: &SchedulerSettings,
) -> Result<bool, SchedulerError> {
    let Some(cron) = settings.run_cron.as_deref() else {
        info!("Recurring vault run disabled");
        return Ok(false);
    };
    let options = JobOptions {
        overlap: OverlapPolicy::Skip,
        ..JobOptions::default()
    };
    scheduler
        .register_job(VAULT_RUN_JOB, cron, options, move |token| {
            let pipeline = Arc::clone(&pipeline);
            let vault = Arc::clone(&vault);
            async move { run_vault(&pipeline, vault.as_ref(), &token).await }
        })
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulerConfig;
    use insight_cache::SemanticCacheConfig;
    use insight_embeddings::{EmbeddingModel, HashEmbedder};
    use insight_storage::{KvStore, MemoryStore};
    use insight_types::{fingerprint, InMemoryMetrics};
    use insight_vector::{IndexConfig, IndexEntry};

    const DIM: usize = 32;

    struct Stores {
        embeddings: Arc<EmbeddingCache>,
        index: Arc<VectorIndex>,
        responses: Arc<SemanticCache>,
        metrics: Arc<InMemoryMetrics>,
    }

    fn stores() -> Stores {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedder::new(DIM));
        let embeddings = Arc::new(EmbeddingCache::open(Arc::clone(&store), 1 << 20).unwrap());
        let index = Arc::new(VectorIndex::open(Arc::clone(&store), IndexConfig::new(DIM)).unwrap());
        let metrics = Arc::new(InMemoryMetrics::new());
        let responses = Arc::new(
            SemanticCache::open(
                store,
                Arc::clone(&embeddings),
                Arc::clone(&index),
                embedder,
                metrics.clone(),
                SemanticCacheConfig::default(),
            )
            .unwrap(),
        );
        Stores {
            embeddings,
            index,
            responses,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_responses() {
        let s = stores();
        s.responses
            .store("what is ownership", "a set of rules", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        s.responses
            .store("what is borrowing", "references", None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sweep_responses(&s.responses).unwrap(), "removed=1");
        assert_eq!(s.responses.len(), 1);
    }

    #[test]
    fn test_compaction_counts_metric() {
        let s = stores();
        for i in 0..5 {
            let text = format!("note {}", i);
            let fp = fingerprint(&text, "feature-hash-v1");
            let mut vector = vec![0.0; DIM];
            vector[i] = 1.0;
            s.index
                .insert(IndexEntry::chunk(fp, "feature-hash-v1", format!("{}.md", i), 0), &vector)
                .unwrap();
        }
        assert_eq!(compact_index(&s.index, s.metrics.as_ref()).unwrap(), "compacted=false");

        for i in 0..3 {
            s.index.remove_source(&format!("{}.md", i)).unwrap();
        }
        assert_eq!(compact_index(&s.index, s.metrics.as_ref()).unwrap(), "compacted=true");
        assert_eq!(s.metrics.counter_value(names::INDEX_COMPACTIONS), 1);
        assert_eq!(s.index.len(), 2);
    }

    #[test]
    fn test_flush_with_nothing_pending() {
        let s = stores();
        assert_eq!(flush_embeddings(&s.embeddings).unwrap(), "written=0");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_maintenance_jobs() {
        let s = stores();
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        let targets = MaintenanceTargets {
            responses: s.responses,
            embeddings: s.embeddings,
            index: s.index,
            metrics: s.metrics,
        };

        register_maintenance_jobs(&scheduler, targets, &SchedulerSettings::default())
            .await
            .unwrap();

        let registry = scheduler.registry();
        assert!(registry.is_registered(RESPONSE_SWEEP_JOB));
        assert!(registry.is_registered(EMBEDDING_FLUSH_JOB));
        assert!(registry.is_registered(INDEX_COMPACTION_JOB));
        assert_eq!(registry.job_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_maintenance_rejects_bad_cron() {
        let s = stores();
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        let targets = MaintenanceTargets {
            responses: s.responses,
            embeddings: s.embeddings,
            index: s.index,
            metrics: s.metrics,
        };
        let settings = SchedulerSettings {
            flush_cron: "whenever".to_string(),
            ..Default::default()
        };

        let result = register_maintenance_jobs(&scheduler, targets, &settings).await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron(_))));
    }
}
