//! # insight-scheduler
//!
//! Cron scheduling for the vault-insight daemon, built on
//! tokio-cron-scheduler.
//!
//! - timezone-aware cron jobs
//! - overlap control per job
//! - per-job timeouts
//! - status tracking in a shared [`JobRegistry`]
//! - graceful shutdown through a [`CancellationToken`](tokio_util::sync::CancellationToken)
//!
//! With the default `jobs` feature, [`jobs`] wires the cache, index and
//! pipeline maintenance work onto the scheduler.

mod config;
mod error;
mod overlap;
mod registry;
mod scheduler;

#[cfg(feature = "jobs")]
pub mod jobs;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use registry::{JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, JobOptions, SchedulerService};

#[cfg(feature = "jobs")]
pub use jobs::{
    register_maintenance_jobs, register_vault_run, MaintenanceTargets, EMBEDDING_FLUSH_JOB,
    INDEX_COMPACTION_JOB, RESPONSE_SWEEP_JOB, VAULT_RUN_JOB,
};
