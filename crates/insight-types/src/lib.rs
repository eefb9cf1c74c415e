//! # insight-types
//!
//! Shared domain types for the vault-insight system.
//!
//! This crate defines the data structures every other crate agrees on:
//! - Fingerprints: content-derived cache keys
//! - Documents: fingerprinted vault notes
//! - Settings: layered configuration
//! - Metrics: the sink the core reports counters and gauges to
//!
//! ## Usage
//!
//! ```rust
//! use insight_types::fingerprint;
//!
//! let a = fingerprint("Some note.\n", "all-MiniLM-L6-v2");
//! let b = fingerprint("Some note.   \r\n\r\n", "all-MiniLM-L6-v2");
//! assert_eq!(a, b);
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod metrics;

pub use config::{
    CacheSettings, EmbedderKind, IndexSettings, ModelTierSettings, PipelineSettings,
    ProviderSettings, RouterSettings, SchedulerSettings, Settings,
};
pub use document::{Document, RawDocument};
pub use error::InsightError;
pub use fingerprint::{fingerprint, normalize, Fingerprint};
pub use metrics::{names, InMemoryMetrics, MetricsSink, NoopMetrics, TracingMetrics};
