//! Fully wired in-memory pipeline for tests.

use std::sync::Arc;
use std::time::Duration;

use insight_cache::{SemanticCache, SemanticCacheConfig};
use insight_embeddings::{EmbeddingCache, EmbeddingModel, HashEmbedder};
use insight_router::{
    CostBudget, CostRouter, KvEscalationQueue, MockProvider, RouterConfig, RouterDeps,
};
use insight_storage::{KvStore, MemoryStore};
use insight_types::{InMemoryMetrics, PipelineSettings};
use insight_vector::{IndexConfig, VectorIndex};

use crate::engine::{Pipeline, PipelineConfig};
use crate::sink::MemorySink;
use crate::stages::{StageDeps, StageSet};

pub(crate) const DIM: usize = 64;

pub(crate) struct Harness {
    pub embeddings: Arc<EmbeddingCache>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub index: Arc<VectorIndex>,
    pub router: Arc<CostRouter>,
    pub provider: Arc<MockProvider>,
    pub escalations: Arc<KvEscalationQueue>,
    pub metrics: Arc<InMemoryMetrics>,
    pub sink: Arc<MemorySink>,
}

impl Harness {
    /// Every note with budget left goes to the model.
    pub fn new(budget: f64) -> Self {
        Self::with_router(budget, MockProvider::new(), Self::router_config())
    }

    /// Accepts any confidence and retries quickly.
    pub fn router_config() -> RouterConfig {
        RouterConfig {
            confidence_threshold: 0.0,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(500),
            ..RouterConfig::default()
        }
    }

    pub fn with_router(budget: f64, provider: MockProvider, config: RouterConfig) -> Self {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedder::new(DIM));
        let embeddings = Arc::new(EmbeddingCache::open(Arc::clone(&store), 1 << 20).unwrap());
        let index = Arc::new(VectorIndex::open(Arc::clone(&store), IndexConfig::new(DIM)).unwrap());
        let metrics = Arc::new(InMemoryMetrics::new());
        let cache = Arc::new(
            SemanticCache::open(
                Arc::clone(&store),
                Arc::clone(&embeddings),
                Arc::clone(&index),
                Arc::clone(&embedder),
                metrics.clone(),
                SemanticCacheConfig::default(),
            )
            .unwrap(),
        );
        let provider = Arc::new(provider);
        let escalations = Arc::new(KvEscalationQueue::new(store));
        let router = Arc::new(CostRouter::new(
            RouterDeps {
                cache,
                embeddings: Arc::clone(&embeddings),
                embedder: Arc::clone(&embedder),
                index: Arc::clone(&index),
                provider: provider.clone(),
                budget: Arc::new(CostBudget::new(budget)),
                escalations: escalations.clone(),
                metrics: metrics.clone(),
            },
            config,
        ));
        Self {
            embeddings,
            embedder,
            index,
            router,
            provider,
            escalations,
            metrics,
            sink: Arc::new(MemorySink::new()),
        }
    }

    pub fn stages(&self) -> StageSet {
        StageSet::standard(
            StageDeps {
                embeddings: Arc::clone(&self.embeddings),
                embedder: Arc::clone(&self.embedder),
                index: Arc::clone(&self.index),
                router: Arc::clone(&self.router),
                sink: self.sink.clone(),
            },
            &PipelineSettings::default(),
        )
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::from_settings(&PipelineSettings::default(), self.embedder.model_id())
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.stages(), self.config(), self.metrics.clone())
    }
}
