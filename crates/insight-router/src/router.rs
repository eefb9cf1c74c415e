//! The cost router.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use insight_cache::SemanticCache;
use insight_embeddings::{EmbeddingCache, EmbeddingModel};
use insight_types::{names, MetricsSink, ProviderSettings, RouterSettings};
use insight_vector::{EntryKind, SearchFilter, VectorIndex};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::budget::CostBudget;
use crate::confidence::neighbor_confidence;
use crate::error::{ProviderError, RouterError};
use crate::escalation::{Escalation, EscalationQueue, EscalationReason};
use crate::provider::{InvocationParams, ModelProvider};
use crate::tier::{estimate_complexity, ModelTier, TierPolicy};

/// Which path a decision took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPath {
    CacheHit,
    ModelCall,
    HumanEscalation,
}

/// Immutable audit record of one routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub item_id: String,
    pub path: RoutingPath,
    /// Similarity for cache hits, neighbor confidence otherwise
    pub rationale_score: f32,
    pub explanation: String,
    /// Provider model, for model calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// What the caller gets back.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Answer { text: String, cost: f64 },
    Escalated { escalation_id: String, reason: EscalationReason },
}

impl RouteOutcome {
    pub fn answer(&self) -> Option<&str> {
        match self {
            RouteOutcome::Answer { text, .. } => Some(text),
            RouteOutcome::Escalated { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    pub decision: RoutingDecision,
    pub outcome: RouteOutcome,
}

/// Nature of the work behind a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Pattern work a model handles well: tagging, summaries, linking
    #[default]
    Routine,
    /// Judgement calls and personal reflection; always goes to a person
    HumanFirst,
}

/// One model-dependent step to route.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub item_id: String,
    /// Text sent to the provider
    pub prompt: String,
    /// Key for the semantic cache and context search; defaults to `prompt`
    pub query: Option<String>,
    /// Overrides the configured confidence threshold
    pub required_confidence: Option<f32>,
    /// Restricts which indexed chunks count as supporting context
    pub context_filter: SearchFilter,
    pub task: TaskKind,
    /// Difficulty in [0, 1] used for tier selection; estimated from the
    /// prompt when unset
    pub complexity: Option<f32>,
    pub params: InvocationParams,
}

impl RouteRequest {
    pub fn new(item_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            prompt: prompt.into(),
            query: None,
            required_confidence: None,
            context_filter: SearchFilter::kind(EntryKind::Chunk),
            task: TaskKind::Routine,
            complexity: None,
            params: InvocationParams::default(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn cache_key(&self) -> &str {
        self.query.as_deref().unwrap_or(&self.prompt)
    }

    pub fn with_required_confidence(mut self, confidence: f32) -> Self {
        self.required_confidence = Some(confidence);
        self
    }

    pub fn with_context_filter(mut self, filter: SearchFilter) -> Self {
        self.context_filter = filter;
        self
    }

    pub fn with_task(mut self, task: TaskKind) -> Self {
        self.task = task;
        self
    }

    pub fn with_complexity(mut self, complexity: f32) -> Self {
        self.complexity = Some(complexity.clamp(0.0, 1.0));
        self
    }

    fn complexity(&self) -> f32 {
        self.complexity
            .unwrap_or_else(|| estimate_complexity(&self.prompt, 0))
    }

    pub fn with_params(mut self, params: InvocationParams) -> Self {
        self.params = params;
        self
    }
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Provider models and their per-call costs
    pub tiers: TierPolicy,
    pub confidence_threshold: f32,
    /// Neighbors consulted for confidence
    pub context_k: usize,
    /// Bound on each provider attempt
    pub timeout: Duration,
    /// Attempts after the first
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// TTL for answers cached after model calls; `None` uses the cache default
    pub answer_ttl: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from_settings(
            &RouterSettings::default(),
            &ProviderSettings::default(),
            "default",
        )
    }
}

impl RouterConfig {
    pub fn from_settings(
        router: &RouterSettings,
        provider: &ProviderSettings,
        model_id: &str,
    ) -> Self {
        Self {
            tiers: TierPolicy::from_settings(router, model_id),
            confidence_threshold: router.confidence_threshold,
            context_k: router.context_k.max(1),
            timeout: Duration::from_secs(provider.timeout_secs),
            max_retries: provider.max_retries,
            initial_backoff: Duration::from_millis(provider.initial_backoff_ms),
            answer_ttl: None,
        }
    }
}

/// Collaborators the router needs.
pub struct RouterDeps {
    pub cache: Arc<SemanticCache>,
    pub embeddings: Arc<EmbeddingCache>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub index: Arc<VectorIndex>,
    pub provider: Arc<dyn ModelProvider>,
    pub budget: Arc<CostBudget>,
    pub escalations: Arc<dyn EscalationQueue>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// Router statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    pub decisions: u64,
    pub cache_hits: u64,
    pub model_calls: u64,
    pub escalations: u64,
    pub escalation_rate: f64,
    pub cost_spent: f64,
    pub budget_remaining: f64,
}

/// Routes model-dependent steps by cost and confidence.
pub struct CostRouter {
    deps: RouterDeps,
    config: RouterConfig,
    decisions: AtomicU64,
    cache_hits: AtomicU64,
    model_calls: AtomicU64,
    escalations: AtomicU64,
}

impl CostRouter {
    pub fn new(deps: RouterDeps, config: RouterConfig) -> Self {
        Self {
            deps,
            config,
            decisions: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            model_calls: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn budget(&self) -> &Arc<CostBudget> {
        &self.deps.budget
    }

    pub fn escalations(&self) -> &Arc<dyn EscalationQueue> {
        &self.deps.escalations
    }

    /// Route one request.
    ///
    /// The semantic cache is consulted before anything else, so a cached
    /// answer is served even when the budget is exhausted or the task is
    /// human-first, at no cost. Every request that misses the cache escalates once the budget is
    /// exhausted.
    ///
    /// Fails with `RouterError::Cancelled` only if `cancel` fired before a
    /// model call started; a call already in flight completes and is cached.
    /// If the returned future is dropped mid-call, the reserved cost is
    /// refunded and the request escalates as abandoned.
    pub async fn route(
        &self,
        request: &RouteRequest,
        cancel: &CancellationToken,
    ) -> Result<Routed, RouterError> {
        if let Some(hit) = self.deps.cache.lookup(request.cache_key()).await? {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.decided(
                request,
                RoutingPath::CacheHit,
                hit.similarity,
                format!("cached answer at similarity {:.3}", hit.similarity),
                RouteOutcome::Answer {
                    text: hit.answer,
                    cost: 0.0,
                },
            ));
        }

        if request.task == TaskKind::HumanFirst {
            return self.escalate(request, EscalationReason::HumanFirst, 0.0);
        }
        if self.deps.budget.is_exhausted() {
            return self.escalate(request, EscalationReason::BudgetExhausted, 0.0);
        }

        let confidence = self.confidence(request).await?;
        let required = request
            .required_confidence
            .unwrap_or(self.config.confidence_threshold);
        if confidence < required {
            return self.escalate(
                request,
                EscalationReason::LowConfidence {
                    confidence,
                    required,
                },
                confidence,
            );
        }

        if cancel.is_cancelled() {
            return Err(RouterError::Cancelled);
        }
        let complexity = request.complexity();
        let (tier, choice) = self
            .config
            .tiers
            .select(complexity, self.deps.budget.remaining());
        let tier = tier.clone();
        let cost = tier.cost;
        if !self.deps.budget.try_spend(cost) {
            return self.escalate(request, EscalationReason::BudgetExhausted, confidence);
        }
        debug!(item = %request.item_id, model = %tier.model_id, cost, complexity, choice = ?choice, "Selected model tier");

        let mut reservation = Reservation {
            router: self,
            request,
            cost,
            confidence,
            armed: true,
        };
        let result = self.invoke_with_retry(request, &tier, cancel).await;
        reservation.armed = false;

        match result {
            Ok(answer) => {
                self.model_calls.fetch_add(1, Ordering::Relaxed);
                self.deps.metrics.counter(names::MODEL_CALLS, 1);
                self.report_budget();
                self.deps
                    .cache
                    .store(request.cache_key(), &answer, self.config.answer_ttl)
                    .await?;
                let mut routed = self.decided(
                    request,
                    RoutingPath::ModelCall,
                    confidence,
                    format!(
                        "confidence {confidence:.3} met {required:.3}; {} at ${cost:.4} ({choice:?})",
                        tier.model_id
                    ),
                    RouteOutcome::Answer { text: answer, cost },
                );
                routed.decision.model_id = Some(tier.model_id);
                Ok(routed)
            }
            Err(ProviderError::Cancelled) => {
                self.deps.budget.refund(cost);
                Err(RouterError::Cancelled)
            }
            Err(e) => {
                self.deps.budget.refund(cost);
                self.escalate(
                    request,
                    EscalationReason::ProviderFailed {
                        error: e.to_string(),
                    },
                    confidence,
                )
            }
        }
    }

    /// Record a human answer and write it back into the semantic cache.
    pub async fn resolve_escalation(
        &self,
        id: &str,
        answer: &str,
    ) -> Result<Escalation, RouterError> {
        let escalation = self.deps.escalations.resolve(id, answer)?;
        self.deps
            .cache
            .store(escalation.cache_key(), answer, None)
            .await?;
        Ok(escalation)
    }

    async fn confidence(&self, request: &RouteRequest) -> Result<f32, RouterError> {
        let embedded = self
            .deps
            .embeddings
            .get_or_embed(request.cache_key(), &self.deps.embedder)
            .await?;
        let hits = self.deps.index.search(
            &embedded.record.vector,
            self.config.context_k,
            &request.context_filter,
        )?;
        let vectors: Vec<(f32, Arc<[f32]>)> = hits
            .iter()
            .filter_map(|hit| self.deps.index.vector(hit.vector_id).map(|v| (hit.score, v)))
            .collect();
        let neighbors: Vec<(f32, &[f32])> = vectors.iter().map(|(s, v)| (*s, &v[..])).collect();
        let confidence = neighbor_confidence(&neighbors);
        debug!(item = %request.item_id, neighbors = neighbors.len(), confidence, "Estimated confidence");
        Ok(confidence)
    }

    async fn invoke_with_retry(
        &self,
        request: &RouteRequest,
        tier: &ModelTier,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let mut backoff = ExponentialBackoff {
            current_interval: self.config.initial_backoff,
            initial_interval: self.config.initial_backoff,
            max_elapsed_time: None,
            ..Default::default()
        };
        let max_attempts = self.config.max_retries + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(item = %request.item_id, attempt = attempts, provider = self.deps.provider.name(), "Invoking model");

            let call = self
                .deps
                .provider
                .invoke(&request.prompt, &tier.model_id, &request.params);
            let result = match tokio::time::timeout(self.config.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.config.timeout)),
            };

            let e = match result {
                Ok(answer) => return Ok(answer),
                Err(e) => e,
            };
            if attempts >= max_attempts {
                error!(item = %request.item_id, error = %e, attempts, "Max retries exceeded");
                return Err(e);
            }
            let Some(delay) = backoff.next_backoff() else {
                error!(item = %request.item_id, error = %e, "Backoff exhausted");
                return Err(e);
            };
            warn!(
                item = %request.item_id,
                error = %e,
                retry_in_ms = delay.as_millis() as u64,
                "Model call failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn escalate(
        &self,
        request: &RouteRequest,
        reason: EscalationReason,
        confidence: f32,
    ) -> Result<Routed, RouterError> {
        let escalation = Escalation::new(
            request.item_id.clone(),
            request.prompt.clone(),
            reason.clone(),
            confidence,
        )
        .with_query(request.query.clone());
        let escalation_id = escalation.id.clone();
        self.deps.escalations.enqueue(escalation)?;
        self.escalations.fetch_add(1, Ordering::Relaxed);
        self.deps.metrics.counter(names::ESCALATIONS, 1);
        let explanation = reason.to_string();
        Ok(self.decided(
            request,
            RoutingPath::HumanEscalation,
            confidence,
            explanation,
            RouteOutcome::Escalated {
                escalation_id,
                reason,
            },
        ))
    }

    fn decided(
        &self,
        request: &RouteRequest,
        path: RoutingPath,
        rationale_score: f32,
        explanation: String,
        outcome: RouteOutcome,
    ) -> Routed {
        let decisions = self.decisions.fetch_add(1, Ordering::Relaxed) + 1;
        let escalations = self.escalations.load(Ordering::Relaxed);
        self.deps
            .metrics
            .gauge(names::ESCALATION_RATE, escalations as f64 / decisions as f64);
        debug!(item = %request.item_id, path = ?path, rationale_score, %explanation, "Routed");
        Routed {
            decision: RoutingDecision {
                item_id: request.item_id.clone(),
                path,
                rationale_score,
                explanation,
                model_id: None,
                decided_at: Utc::now(),
            },
            outcome,
        }
    }

    fn report_budget(&self) {
        self.deps
            .metrics
            .gauge(names::COST_SPENT, self.deps.budget.spent());
        self.deps
            .metrics
            .gauge(names::BUDGET_REMAINING, self.deps.budget.remaining());
    }

    pub fn stats(&self) -> RouterStats {
        let decisions = self.decisions.load(Ordering::Relaxed);
        let escalations = self.escalations.load(Ordering::Relaxed);
        RouterStats {
            decisions,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            model_calls: self.model_calls.load(Ordering::Relaxed),
            escalations,
            escalation_rate: if decisions == 0 {
                0.0
            } else {
                escalations as f64 / decisions as f64
            },
            cost_spent: self.deps.budget.spent(),
            budget_remaining: self.deps.budget.remaining(),
        }
    }
}

/// Budget held for a model call in flight.
///
/// Dropped while still armed means the caller abandoned the call, usually
/// because a stage deadline fired: the cost goes back to the budget and a
/// person is asked instead.
struct Reservation<'a> {
    router: &'a CostRouter,
    request: &'a RouteRequest,
    cost: f64,
    confidence: f32,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.router.deps.budget.refund(self.cost);
        self.router.report_budget();
        warn!(item = %self.request.item_id, cost = self.cost, "Model call abandoned, escalating");
        if let Err(e) = self
            .router
            .escalate(self.request, EscalationReason::Abandoned, self.confidence)
        {
            error!(item = %self.request.item_id, error = %e, "Failed to escalate abandoned call");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::KvEscalationQueue;
    use crate::provider::MockProvider;
    use crate::tier::ModelTier;
    use insight_cache::SemanticCacheConfig;
    use insight_embeddings::HashEmbedder;
    use insight_storage::{KvStore, MemoryStore};
    use insight_types::{fingerprint, InMemoryMetrics};
    use insight_vector::{IndexConfig, IndexEntry};

    const DIM: usize = 64;

    struct Harness {
        router: CostRouter,
        provider: Arc<MockProvider>,
        metrics: Arc<InMemoryMetrics>,
        index: Arc<VectorIndex>,
        embeddings: Arc<EmbeddingCache>,
        embedder: Arc<dyn EmbeddingModel>,
    }

    fn harness(budget: f64, provider: MockProvider, config: RouterConfig) -> Harness {
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
        let router = CostRouter::new(
            RouterDeps {
                cache,
                embeddings: Arc::clone(&embeddings),
                embedder: Arc::clone(&embedder),
                index: Arc::clone(&index),
                provider: provider.clone(),
                budget: Arc::new(CostBudget::new(budget)),
                escalations: Arc::new(KvEscalationQueue::new(store)),
                metrics: metrics.clone(),
            },
            config,
        );
        Harness {
            router,
            provider,
            metrics,
            index,
            embeddings,
            embedder,
        }
    }

    fn fast_config() -> RouterConfig {
        RouterConfig {
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
            ..RouterConfig::default()
        }
    }

    impl Harness {
        /// Index a note chunk so prompts about it have supporting context.
        async fn index_chunk(&self, path: &str, text: &str) {
            let lookup = self.embeddings.get_or_embed(text, &self.embedder).await.unwrap();
            self.index
                .insert(
                    IndexEntry::chunk(fingerprint(text, self.embedder.model_id()), self.embedder.model_id(), path, 0),
                    &lookup.record.vector,
                )
                .unwrap();
        }
    }

    const NOTE: &str = "rust ownership borrowing lifetimes";

    #[tokio::test]
    async fn test_model_call_then_cache_hit() {
        let h = harness(1.0, MockProvider::new(), fast_config());
        h.index_chunk("rust.md", NOTE).await;
        let cancel = CancellationToken::new();
        let request = RouteRequest::new("item-1", NOTE);

        let first = h.router.route(&request, &cancel).await.unwrap();
        assert_eq!(first.decision.path, RoutingPath::ModelCall);
        assert_eq!(h.provider.calls(), 1);

        let second = h.router.route(&request, &cancel).await.unwrap();
        assert_eq!(second.decision.path, RoutingPath::CacheHit);
        assert_eq!(second.outcome.answer(), first.outcome.answer());
        assert_eq!(h.provider.calls(), 1);
        assert!((h.router.budget().spent() - 0.01).abs() < 1e-9);
        assert_eq!(h.metrics.counter_value(names::MODEL_CALLS), 1);
    }

    #[tokio::test]
    async fn test_no_context_escalates_for_low_confidence() {
        let h = harness(1.0, MockProvider::new(), fast_config());
        let routed = h
            .router
            .route(&RouteRequest::new("item-1", "unrelated question"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(routed.decision.path, RoutingPath::HumanEscalation);
        assert!(matches!(
            routed.outcome,
            RouteOutcome::Escalated {
                reason: EscalationReason::LowConfidence { .. },
                ..
            }
        ));
        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.router.escalations().pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_escalates_every_later_decision() {
        let h = harness(0.02, MockProvider::new(), fast_config());
        h.index_chunk("rust.md", NOTE).await;
        let cancel = CancellationToken::new();

        let mut paths = Vec::new();
        for i in 0..6 {
            let request = RouteRequest::new(format!("item-{i}"), format!("{NOTE} variant {i}"))
                .with_required_confidence(0.0);
            paths.push(h.router.route(&request, &cancel).await.unwrap().decision.path);
        }
        assert_eq!(&paths[..2], &[RoutingPath::ModelCall, RoutingPath::ModelCall]);
        assert!(paths[2..].iter().all(|p| *p == RoutingPath::HumanEscalation));
        assert!(h.router.budget().is_exhausted());
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_retries_then_succeeds() {
        let h = harness(1.0, MockProvider::failing(2), fast_config());
        h.index_chunk("rust.md", NOTE).await;
        let routed = h
            .router
            .route(&RouteRequest::new("item-1", NOTE), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(routed.decision.path, RoutingPath::ModelCall);
        assert_eq!(h.provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_provider_failure_escalates_and_refunds() {
        let config = RouterConfig {
            max_retries: 1,
            ..fast_config()
        };
        let h = harness(1.0, MockProvider::failing(5), config);
        h.index_chunk("rust.md", NOTE).await;
        let routed = h
            .router
            .route(&RouteRequest::new("item-1", NOTE), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(routed.decision.path, RoutingPath::HumanEscalation);
        assert!(matches!(
            routed.outcome,
            RouteOutcome::Escalated {
                reason: EscalationReason::ProviderFailed { .. },
                ..
            }
        ));
        assert_eq!(h.provider.calls(), 2);
        assert_eq!(h.router.budget().spent(), 0.0);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let config = RouterConfig {
            max_retries: 0,
            timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let provider = MockProvider::new().with_delay(Duration::from_secs(5));
        let h = harness(1.0, provider, config);
        h.index_chunk("rust.md", NOTE).await;
        let routed = h
            .router
            .route(&RouteRequest::new("item-1", NOTE), &CancellationToken::new())
            .await
            .unwrap();
        match routed.outcome {
            RouteOutcome::Escalated {
                reason: EscalationReason::ProviderFailed { error },
                ..
            } => assert!(error.contains("timed out")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let h = harness(1.0, MockProvider::new(), fast_config());
        h.index_chunk("rust.md", NOTE).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h
            .router
            .route(&RouteRequest::new("item-1", NOTE), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.router.budget().spent(), 0.0);
    }

    #[tokio::test]
    async fn test_human_first_task_escalates() {
        let h = harness(1.0, MockProvider::new(), fast_config());
        h.index_chunk("rust.md", NOTE).await;
        let routed = h
            .router
            .route(
                &RouteRequest::new("item-1", NOTE).with_task(TaskKind::HumanFirst),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(routed.decision.path, RoutingPath::HumanEscalation);
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolution_written_back_to_cache() {
        let h = harness(0.0, MockProvider::new(), fast_config());
        let cancel = CancellationToken::new();
        let request = RouteRequest::new("item-1", "what did we decide about the launch");

        let routed = h.router.route(&request, &cancel).await.unwrap();
        let RouteOutcome::Escalated { escalation_id, reason } = routed.outcome else {
            panic!("expected escalation");
        };
        assert_eq!(reason, EscalationReason::BudgetExhausted);

        h.router
            .resolve_escalation(&escalation_id, "Launch moved to May.")
            .await
            .unwrap();
        let again = h.router.route(&request, &cancel).await.unwrap();
        assert_eq!(again.decision.path, RoutingPath::CacheHit);
        assert_eq!(again.outcome.answer(), Some("Launch moved to May."));

        let stats = h.router.stats();
        assert_eq!(stats.decisions, 2);
        assert_eq!(stats.escalations, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_served_after_budget_exhausted() {
        let h = harness(0.0, MockProvider::new(), fast_config());
        let request = RouteRequest::new("item-1", NOTE);
        h.router
            .deps
            .cache
            .store(request.cache_key(), "Borrowing is checked at compile time.", None)
            .await
            .unwrap();

        let routed = h.router.route(&request, &CancellationToken::new()).await.unwrap();
        assert_eq!(routed.decision.path, RoutingPath::CacheHit);
        assert_eq!(routed.outcome.answer(), Some("Borrowing is checked at compile time."));
        assert!(h.router.budget().is_exhausted());
        assert_eq!(h.provider.calls(), 0);
        assert!(h.router.escalations().pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_call_refunds_and_escalates() {
        let config = RouterConfig {
            timeout: Duration::from_secs(10),
            ..fast_config()
        };
        let provider = MockProvider::new().with_delay(Duration::from_secs(5));
        let h = harness(1.0, provider, config);
        h.index_chunk("rust.md", NOTE).await;
        let request = RouteRequest::new("item-1", NOTE);
        let cancel = CancellationToken::new();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), h.router.route(&request, &cancel)).await;
        assert!(abandoned.is_err());

        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.router.budget().spent(), 0.0);
        let pending = h.router.escalations().pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].item_id, "item-1");
        assert_eq!(pending[0].reason, EscalationReason::Abandoned);
        assert_eq!(h.router.stats().escalations, 1);
    }

    fn tiered_config(reserve: f64) -> RouterConfig {
        RouterConfig {
            tiers: TierPolicy::new(
                vec![ModelTier::new("local", 0.0, 0.3), ModelTier::new("large", 0.03, 1.0)],
                "unused",
                0.01,
            )
            .with_low_budget_reserve(reserve),
            ..fast_config()
        }
    }

    const GARDEN: &str = "tomatoes compost soil watering";

    #[tokio::test]
    async fn test_complexity_picks_model_tier() {
        let h = harness(1.0, MockProvider::new(), tiered_config(0.0));
        h.index_chunk("rust.md", NOTE).await;
        h.index_chunk("garden.md", GARDEN).await;
        let cancel = CancellationToken::new();

        let hard = RouteRequest::new("item-1", NOTE)
            .with_required_confidence(0.0)
            .with_complexity(0.9);
        let routed = h.router.route(&hard, &cancel).await.unwrap();
        assert_eq!(routed.decision.model_id.as_deref(), Some("large"));
        assert!(routed.outcome.answer().unwrap().starts_with("[large]"));
        assert!((h.router.budget().spent() - 0.03).abs() < 1e-9);

        let easy = RouteRequest::new("item-2", GARDEN)
            .with_required_confidence(0.0)
            .with_complexity(0.1);
        let routed = h.router.route(&easy, &cancel).await.unwrap();
        assert_eq!(routed.decision.model_id.as_deref(), Some("local"));
        assert!(matches!(routed.outcome, RouteOutcome::Answer { cost, .. } if cost == 0.0));
        assert!((h.router.budget().spent() - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_low_budget_downgrades_to_cheapest_tier() {
        let h = harness(0.04, MockProvider::new(), tiered_config(0.05));
        h.index_chunk("rust.md", NOTE).await;
        let request = RouteRequest::new("item-1", NOTE)
            .with_required_confidence(0.0)
            .with_complexity(0.9);

        let routed = h.router.route(&request, &CancellationToken::new()).await.unwrap();
        assert_eq!(routed.decision.path, RoutingPath::ModelCall);
        assert_eq!(routed.decision.model_id.as_deref(), Some("local"));
        assert!(routed.decision.explanation.contains("Downgraded"));
        assert_eq!(h.router.budget().spent(), 0.0);
    }
}
