//! End-to-end test infrastructure for vault-insight.
//!
//! Wires every component over a temporary RocksDB directory, with the
//! hashing embedder and a scripted model provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use insight_cache::{SemanticCache, SemanticCacheConfig};
use insight_embeddings::{EmbeddingCache, EmbeddingModel, HashEmbedder};
use insight_pipeline::{
    ArtifactSink, MemorySink, Pipeline, PipelineConfig, StageDeps, StageSet,
};
use insight_router::{
    CostBudget, CostRouter, KvEscalationQueue, MockProvider, RouterConfig, RouterDeps,
};
use insight_storage::{KvStore, RocksStore};
use insight_types::{InMemoryMetrics, PipelineSettings, RawDocument};
use insight_vector::{IndexConfig, VectorIndex};

pub const DIM: usize = 64;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub store: Arc<dyn KvStore>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub embeddings: Arc<EmbeddingCache>,
    pub index: Arc<VectorIndex>,
    pub responses: Arc<SemanticCache>,
    pub provider: Arc<MockProvider>,
    pub budget: Arc<CostBudget>,
    pub escalations: Arc<KvEscalationQueue>,
    pub router: Arc<CostRouter>,
    pub metrics: Arc<InMemoryMetrics>,
    pub sink: Arc<MemorySink>,
}

impl TestHarness {
    /// Harness whose router calls the model whenever budget remains.
    pub fn new(budget: f64) -> Self {
        Self::with_provider(budget, MockProvider::new())
    }

    pub fn with_provider(budget: f64, provider: MockProvider) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let store: Arc<dyn KvStore> =
            Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open test storage"));
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedder::new(DIM));
        let embeddings = Arc::new(
            EmbeddingCache::open(Arc::clone(&store), 1 << 24).expect("Failed to open embedding cache"),
        );
        let index = Arc::new(
            VectorIndex::open(Arc::clone(&store), IndexConfig::new(DIM))
                .expect("Failed to open vector index"),
        );
        let metrics = Arc::new(InMemoryMetrics::new());
        let responses = Arc::new(
            SemanticCache::open(
                Arc::clone(&store),
                Arc::clone(&embeddings),
                Arc::clone(&index),
                Arc::clone(&embedder),
                metrics.clone(),
                SemanticCacheConfig::default(),
            )
            .expect("Failed to open response cache"),
        );
        let provider = Arc::new(provider);
        let budget = Arc::new(CostBudget::new(budget));
        let escalations = Arc::new(KvEscalationQueue::new(Arc::clone(&store)));
        let router = Arc::new(CostRouter::new(
            RouterDeps {
                cache: Arc::clone(&responses),
                embeddings: Arc::clone(&embeddings),
                embedder: Arc::clone(&embedder),
                index: Arc::clone(&index),
                provider: provider.clone(),
                budget: Arc::clone(&budget),
                escalations: escalations.clone(),
                metrics: metrics.clone(),
            },
            RouterConfig {
                confidence_threshold: 0.0,
                initial_backoff: Duration::from_millis(1),
                timeout: Duration::from_secs(1),
                ..RouterConfig::default()
            },
        ));

        Self {
            _temp_dir: temp_dir,
            store,
            embedder,
            embeddings,
            index,
            responses,
            provider,
            budget,
            escalations,
            router,
            metrics,
            sink: Arc::new(MemorySink::new()),
        }
    }

    pub fn stages_with_sink(&self, sink: Arc<dyn ArtifactSink>) -> StageSet {
        StageSet::standard(
            StageDeps {
                embeddings: Arc::clone(&self.embeddings),
                embedder: Arc::clone(&self.embedder),
                index: Arc::clone(&self.index),
                router: Arc::clone(&self.router),
                sink,
            },
            &PipelineSettings::default(),
        )
    }

    /// Pipeline writing into the in-memory sink, pruning deleted notes.
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(self.stages_with_sink(self.sink.clone()))
    }

    pub fn pipeline_with(&self, stages: StageSet) -> Pipeline {
        Pipeline::new(
            stages,
            PipelineConfig::from_settings(&PipelineSettings::default(), self.embedder.model_id()),
            self.metrics.clone(),
        )
        .pruning(Arc::clone(&self.index))
    }
}

/// A note last modified at a fixed instant.
pub fn note(path: &str, content: &str) -> RawDocument {
    let modified = Utc
        .with_ymd_and_hms(2024, 1, 29, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    RawDocument::new(path, content, modified)
}
