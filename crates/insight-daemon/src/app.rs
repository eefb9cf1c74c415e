//! Wiring stores, caches, router and pipeline from `Settings`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use insight_cache::{SemanticCache, SemanticCacheConfig};
use insight_embeddings::{CandleEmbedder, EmbeddingCache, EmbeddingModel, HashEmbedder, ModelFiles};
use insight_pipeline::{JsonDirSink, Pipeline, PipelineConfig, StageDeps, StageSet};
use insight_router::{
    CommandProvider, CostBudget, CostRouter, InvocationParams, KvEscalationQueue, ModelProvider,
    ProviderError, RouterConfig, RouterDeps,
};
use insight_storage::{KvStore, RocksStore};
use insight_types::{EmbedderKind, MetricsSink, Settings, TracingMetrics};
use insight_vector::{IndexConfig, VectorIndex};
use tracing::{info, warn};

/// Stands in when no provider command is configured. Never answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineProvider;

#[async_trait]
impl ModelProvider for OfflineProvider {
    fn name(&self) -> &str {
        "offline"
    }

    async fn invoke(
        &self,
        _prompt: &str,
        _model_id: &str,
        _params: &InvocationParams,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

/// Everything a command needs, opened once.
pub struct App {
    pub settings: Settings,
    pub store: Arc<dyn KvStore>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub embeddings: Arc<EmbeddingCache>,
    pub index: Arc<VectorIndex>,
    pub responses: Arc<SemanticCache>,
    pub escalations: Arc<KvEscalationQueue>,
    pub router: Arc<CostRouter>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl App {
    /// Open RocksDB at the configured path and load the configured embedder.
    pub fn open(settings: Settings) -> Result<Self> {
        let db_path = settings.expanded_db_path();
        std::fs::create_dir_all(&db_path).context("Failed to create database directory")?;
        info!(path = %db_path.display(), "Opening storage");
        let store: Arc<dyn KvStore> =
            Arc::new(RocksStore::open(&db_path).context("Failed to open storage")?);
        let embedder = load_embedder(&settings)?;
        Self::with_parts(settings, store, embedder, Arc::new(TracingMetrics))
    }

    pub fn with_parts(
        settings: Settings,
        store: Arc<dyn KvStore>,
        embedder: Arc<dyn EmbeddingModel>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let embeddings = Arc::new(
            EmbeddingCache::open(Arc::clone(&store), settings.cache.cache_capacity_bytes)
                .context("Failed to open embedding cache")?,
        );
        let index = Arc::new(
            VectorIndex::open(
                Arc::clone(&store),
                IndexConfig::from_settings(embedder.dimension(), &settings.index),
            )
            .context("Failed to open vector index")?,
        );
        let responses = Arc::new(
            SemanticCache::open(
                Arc::clone(&store),
                Arc::clone(&embeddings),
                Arc::clone(&index),
                Arc::clone(&embedder),
                Arc::clone(&metrics),
                SemanticCacheConfig::from_settings(&settings.cache),
            )
            .context("Failed to open response cache")?,
        );
        let escalations = Arc::new(KvEscalationQueue::new(Arc::clone(&store)));

        let (provider, budget): (Arc<dyn ModelProvider>, f64) =
            match CommandProvider::from_settings(&settings.provider) {
                Some(provider) => (Arc::new(provider), settings.router.cost_budget),
                None => {
                    warn!("No provider command configured; every analysis goes to review");
                    (Arc::new(OfflineProvider), 0.0)
                }
            };
        let router = Arc::new(CostRouter::new(
            RouterDeps {
                cache: Arc::clone(&responses),
                embeddings: Arc::clone(&embeddings),
                embedder: Arc::clone(&embedder),
                index: Arc::clone(&index),
                provider,
                budget: Arc::new(CostBudget::new(budget)),
                escalations: escalations.clone(),
                metrics: Arc::clone(&metrics),
            },
            RouterConfig::from_settings(
                &settings.router,
                &settings.provider,
                &settings.pipeline.analysis_model,
            ),
        ));

        Ok(Self {
            settings,
            store,
            embedder,
            embeddings,
            index,
            responses,
            escalations,
            router,
            metrics,
        })
    }

    /// A pipeline writing artifacts into `out`.
    pub fn pipeline(&self, out: &Path) -> Pipeline {
        let stages = StageSet::standard(
            StageDeps {
                embeddings: Arc::clone(&self.embeddings),
                embedder: Arc::clone(&self.embedder),
                index: Arc::clone(&self.index),
                router: Arc::clone(&self.router),
                sink: Arc::new(JsonDirSink::new(out)),
            },
            &self.settings.pipeline,
        );
        Pipeline::new(
            stages,
            PipelineConfig::from_settings(&self.settings.pipeline, self.embedder.model_id()),
            Arc::clone(&self.metrics),
        )
        .pruning(Arc::clone(&self.index))
    }
}

/// The hashing embedder fingerprints under its own model id so its vectors
/// never mix with a real model's.
fn load_embedder(settings: &Settings) -> Result<Arc<dyn EmbeddingModel>> {
    let embedder: Arc<dyn EmbeddingModel> = match settings.embedder {
        EmbedderKind::Hash => Arc::new(HashEmbedder::new(settings.embedding_dimension)),
        EmbedderKind::Candle => Arc::new(
            CandleEmbedder::load(&ModelFiles::default(), &settings.model_id)
                .context("Failed to load embedding model")?,
        ),
    };
    if embedder.dimension() != settings.embedding_dimension {
        anyhow::bail!(
            "Embedder {} produces {} dimensions, configured embedding_dimension is {}",
            embedder.model_id(),
            embedder.dimension(),
            settings.embedding_dimension
        );
    }
    info!(model = embedder.model_id(), dimension = embedder.dimension(), "Embedder ready");
    Ok(embedder)
}

/// In-memory app on the hashing embedder.
#[cfg(test)]
pub(crate) fn memory_app(settings: Settings) -> App {
    let embedder: Arc<dyn EmbeddingModel> =
        Arc::new(HashEmbedder::new(settings.embedding_dimension));
    App::with_parts(
        settings,
        Arc::new(insight_storage::MemoryStore::new()),
        embedder,
        Arc::new(insight_types::NoopMetrics),
    )
    .unwrap()
}

#[cfg(test)]
pub(crate) fn hash_settings() -> Settings {
    Settings {
        embedder: EmbedderKind::Hash,
        embedding_dimension: 64,
        ..Settings::default()
    }
}
