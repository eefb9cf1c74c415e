//! Configuration loading for vault-insight.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/vault-insight/config.toml.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

/// Embedding backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Local all-MiniLM-L6-v2 through candle (default)
    #[default]
    Candle,
    /// Deterministic token hashing, no model download
    Hash,
}

/// Embedding cache and semantic response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Minimum cosine similarity for a response-cache hit.
    /// Range: 0.0-1.0, higher = fewer false positives.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Byte budget for cached embedding vectors.
    #[serde(default = "default_cache_capacity_bytes")]
    pub cache_capacity_bytes: u64,

    /// Maximum number of cached responses.
    #[serde(default = "default_response_cache_max_entries")]
    pub response_cache_max_entries: usize,

    /// TTL applied to responses stored without an explicit one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_similarity_threshold() -> f32 {
    0.95
}

fn default_cache_capacity_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_response_cache_max_entries() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            cache_capacity_bytes: default_cache_capacity_bytes(),
            response_cache_max_entries: default_response_cache_max_entries(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Minimum recall@k against exact search.
    #[serde(default = "default_recall_floor")]
    pub recall_floor: f32,

    /// Tombstone ratio that triggers compaction.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,

    /// HNSW connectivity (M)
    #[serde(default = "default_connectivity")]
    pub connectivity: usize,

    /// Expansion factor during insertion (ef_construction)
    #[serde(default = "default_expansion_add")]
    pub expansion_add: usize,

    /// Expansion factor during search (ef_search)
    #[serde(default = "default_expansion_search")]
    pub expansion_search: usize,

    /// Initial capacity; grows on demand.
    #[serde(default = "default_index_capacity")]
    pub capacity: usize,
}

fn default_recall_floor() -> f32 {
    0.95
}

fn default_compaction_threshold() -> f32 {
    0.2
}

fn default_connectivity() -> usize {
    16
}

fn default_expansion_add() -> usize {
    128
}

fn default_expansion_search() -> usize {
    64
}

fn default_index_capacity() -> usize {
    10_000
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            recall_floor: default_recall_floor(),
            compaction_threshold: default_compaction_threshold(),
            connectivity: default_connectivity(),
            expansion_add: default_expansion_add(),
            expansion_search: default_expansion_search(),
            capacity: default_index_capacity(),
        }
    }
}

/// Cost router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Total spend allowed per run, in dollars.
    #[serde(default = "default_cost_budget")]
    pub cost_budget: f64,

    /// Cost charged per model call, in dollars.
    #[serde(default = "default_model_call_cost")]
    pub model_call_cost: f64,

    /// Minimum neighbor-agreement confidence before a model call is made.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Number of neighbors consulted for confidence.
    #[serde(default = "default_context_k")]
    pub context_k: usize,

    /// Provider models by cost. Empty means one tier built from
    /// `pipeline.analysis_model` and `model_call_cost`.
    #[serde(default)]
    pub tiers: Vec<ModelTierSettings>,

    /// Once the remaining budget falls below this, calls use the cheapest tier.
    #[serde(default = "default_low_budget_reserve")]
    pub low_budget_reserve: f64,
}

/// One provider model and what it costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTierSettings {
    pub model_id: String,

    /// Dollars per call.
    pub cost: f64,

    /// Hardest task (0.0-1.0) this model is trusted with.
    #[serde(default = "default_max_complexity")]
    pub max_complexity: f32,
}

fn default_max_complexity() -> f32 {
    1.0
}

fn default_low_budget_reserve() -> f64 {
    0.05
}

fn default_cost_budget() -> f64 {
    5.0
}

fn default_model_call_cost() -> f64 {
    0.01
}

fn default_confidence_threshold() -> f32 {
    0.3
}

fn default_context_k() -> usize {
    5
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            cost_budget: default_cost_budget(),
            model_call_cost: default_model_call_cost(),
            confidence_threshold: default_confidence_threshold(),
            context_k: default_context_k(),
            tiers: Vec::new(),
            low_budget_reserve: default_low_budget_reserve(),
        }
    }
}

/// Pipeline engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Maximum number of work items in flight.
    #[serde(default = "default_parallelism_limit")]
    pub parallelism_limit: usize,

    /// Upper bound on refine iterations per item.
    #[serde(default = "default_refine_max_iterations")]
    pub refine_max_iterations: u32,

    /// Refine stops once confidence reaches this value.
    #[serde(default = "default_refine_target_confidence")]
    pub refine_target_confidence: f32,

    /// Timeout for a single stage of a single item.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Soft size limit when packing paragraphs into chunks.
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,

    /// Model id passed to the provider for analysis prompts.
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,

    /// Notes longer than this are summarized part by part before analysis.
    #[serde(default = "default_summary_chunk_chars")]
    pub summary_chunk_chars: usize,
}

fn default_parallelism_limit() -> usize {
    4
}

fn default_refine_max_iterations() -> u32 {
    3
}

fn default_refine_target_confidence() -> f32 {
    0.85
}

fn default_stage_timeout_secs() -> u64 {
    300
}

fn default_chunk_max_chars() -> usize {
    1500
}

fn default_analysis_model() -> String {
    "default".to_string()
}

fn default_summary_chunk_chars() -> usize {
    4000
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            parallelism_limit: default_parallelism_limit(),
            refine_max_iterations: default_refine_max_iterations(),
            refine_target_confidence: default_refine_target_confidence(),
            stage_timeout_secs: default_stage_timeout_secs(),
            chunk_max_chars: default_chunk_max_chars(),
            analysis_model: default_analysis_model(),
            summary_chunk_chars: default_summary_chunk_chars(),
        }
    }
}

impl PipelineSettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Model provider settings.
///
/// The provider is an external command: the prompt is written to its stdin
/// and the answer read from its stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Executable to run; `None` means no model calls are possible.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Timeout per attempt.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

impl ProviderSettings {
    /// Longest one routed call can take: every attempt timing out plus the
    /// upper end of each randomized backoff delay.
    pub fn retry_window(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let mut interval = self.initial_backoff_ms as f64;
        let mut backoff_ms = 0.0;
        for _ in 0..self.max_retries {
            backoff_ms += (interval * 1.5).min(90_000.0);
            interval *= 1.5;
        }
        Duration::from_secs(self.timeout_secs.saturating_mul(attempts))
            + Duration::from_millis(backoff_ms as u64)
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: default_provider_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

/// Maintenance schedule settings (cron expressions, 6 fields with seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// IANA timezone for cron evaluation
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Recurring pipeline run; `None` disables it.
    #[serde(default = "default_run_cron")]
    pub run_cron: Option<String>,

    #[serde(default = "default_sweep_cron")]
    pub sweep_cron: String,

    #[serde(default = "default_flush_cron")]
    pub flush_cron: String,

    #[serde(default = "default_compaction_cron")]
    pub compaction_cron: String,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_run_cron() -> Option<String> {
    Some("0 0 3 * * *".to_string())
}

fn default_sweep_cron() -> String {
    "0 */15 * * * *".to_string()
}

fn default_flush_cron() -> String {
    "0 * * * * *".to_string()
}

fn default_compaction_cron() -> String {
    "0 30 * * * *".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            run_cron: default_run_cron(),
            sweep_cron: default_sweep_cron(),
            flush_cron: default_flush_cron(),
            compaction_cron: default_compaction_cron(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Embedding model identifier; participates in every fingerprint.
    #[serde(default = "default_model_id")]
    pub model_id: String,

    #[serde(default)]
    pub embedder: EmbedderKind,

    /// Vector dimensionality of the configured embedder.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "vault-insight")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_model_id() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            model_id: default_model_id(),
            embedder: EmbedderKind::default(),
            embedding_dimension: default_embedding_dimension(),
            cache: CacheSettings::default(),
            index: IndexSettings::default(),
            router: RouterSettings::default(),
            pipeline: PipelineSettings::default(),
            provider: ProviderSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/vault-insight/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INSIGHT_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, InsightError> {
        let config_dir = ProjectDirs::from("", "", "vault-insight")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| InsightError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| InsightError::Config(e.to_string()))?
            .set_default("model_id", default_model_id())
            .map_err(|e| InsightError::Config(e.to_string()))?
            .set_default("embedding_dimension", default_embedding_dimension() as i64)
            .map_err(|e| InsightError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // INSIGHT_LOG_LEVEL, INSIGHT_CACHE__SIMILARITY_THRESHOLD, ...
        builder = builder.add_source(
            Environment::with_prefix("INSIGHT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| InsightError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| InsightError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values outside their meaningful range.
    pub fn validate(&self) -> Result<(), InsightError> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(InsightError::Config(format!("{name} must be 0.0-1.0, got {v}")))
            }
        };
        unit("cache.similarity_threshold", self.cache.similarity_threshold)?;
        unit("index.recall_floor", self.index.recall_floor)?;
        unit("index.compaction_threshold", self.index.compaction_threshold)?;
        unit("router.confidence_threshold", self.router.confidence_threshold)?;
        unit(
            "pipeline.refine_target_confidence",
            self.pipeline.refine_target_confidence,
        )?;

        if self.embedding_dimension == 0 {
            return Err(InsightError::Config("embedding_dimension must be > 0".into()));
        }
        if self.pipeline.parallelism_limit == 0 {
            return Err(InsightError::Config("pipeline.parallelism_limit must be > 0".into()));
        }
        if self.pipeline.refine_max_iterations == 0 {
            return Err(InsightError::Config(
                "pipeline.refine_max_iterations must be > 0".into(),
            ));
        }
        if self.pipeline.stage_timeout_secs == 0 {
            return Err(InsightError::Config("pipeline.stage_timeout_secs must be > 0".into()));
        }
        let window = self.provider.retry_window();
        if self.pipeline.stage_timeout() <= window {
            return Err(InsightError::Config(format!(
                "pipeline.stage_timeout_secs ({}) must exceed the provider retry window ({}s)",
                self.pipeline.stage_timeout_secs,
                window.as_secs_f64().ceil()
            )));
        }
        if self.pipeline.summary_chunk_chars == 0 {
            return Err(InsightError::Config(
                "pipeline.summary_chunk_chars must be > 0".into(),
            ));
        }
        if self.router.cost_budget < 0.0
            || self.router.model_call_cost < 0.0
            || self.router.low_budget_reserve < 0.0
        {
            return Err(InsightError::Config("router costs must be >= 0".into()));
        }
        for tier in &self.router.tiers {
            if tier.model_id.is_empty() || tier.cost < 0.0 {
                return Err(InsightError::Config(format!(
                    "router tier {:?} needs a model_id and a cost >= 0",
                    tier.model_id
                )));
            }
            unit("router.tiers.max_complexity", tier.max_complexity)?;
        }
        if self.router.context_k == 0 {
            return Err(InsightError::Config("router.context_k must be > 0".into()));
        }
        if self.cache.response_cache_max_entries == 0 {
            return Err(InsightError::Config(
                "cache.response_cache_max_entries must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory.
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(base) = BaseDirs::new() {
                return base.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
