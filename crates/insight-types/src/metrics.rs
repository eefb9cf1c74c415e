//! Metrics sink.
//!
//! The core emits named counters and gauges; rendering them is the caller's
//! business. `InMemoryMetrics` keeps the latest values for reports and tests,
//! `TracingMetrics` forwards them to the log.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

/// Well-known metric names.
pub mod names {
    pub const EMBEDDINGS_COMPUTED: &str = "embeddings.computed";
    pub const EMBEDDING_CACHE_HITS: &str = "embeddings.cache_hits";
    pub const RESPONSE_CACHE_HITS: &str = "responses.cache_hits";
    pub const RESPONSE_CACHE_MISSES: &str = "responses.cache_misses";
    pub const RESPONSE_CACHE_HIT_RATE: &str = "responses.cache_hit_rate";
    pub const MODEL_CALLS: &str = "router.model_calls";
    pub const ESCALATIONS: &str = "router.escalations";
    pub const ESCALATION_RATE: &str = "router.escalation_rate";
    pub const COST_SPENT: &str = "router.cost_spent";
    pub const BUDGET_REMAINING: &str = "router.budget_remaining";
    pub const TTI_P50_MS: &str = "pipeline.tti_p50_ms";
    pub const TTI_P95_MS: &str = "pipeline.tti_p95_ms";
    pub const ITEMS_COMPLETED: &str = "pipeline.items_completed";
    pub const ITEMS_FAILED: &str = "pipeline.items_failed";
    pub const INDEX_COMPACTIONS: &str = "index.compactions";
}

/// Destination for metric emissions.
pub trait MetricsSink: Send + Sync {
    /// Add `value` to a monotonically increasing counter.
    fn counter(&self, name: &str, value: u64);

    /// Set a gauge to `value`.
    fn gauge(&self, name: &str, value: f64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &str, _value: u64) {}
    fn gauge(&self, _name: &str, _value: f64) {}
}

/// Logs each emission under the `metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn counter(&self, name: &str, value: u64) {
        info!(target: "metrics", metric = name, value, "counter");
    }

    fn gauge(&self, name: &str, value: f64) {
        info!(target: "metrics", metric = name, value, "gauge");
    }
}

/// Keeps counter totals and latest gauge values in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.lock().ok().and_then(|g| g.get(name).copied())
    }
}

impl MetricsSink for InMemoryMetrics {
    fn counter(&self, name: &str, value: u64) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name.to_string()).or_insert(0) += value;
        }
    }

    fn gauge(&self, name: &str, value: f64) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.insert(name.to_string(), value);
        }
    }
}
