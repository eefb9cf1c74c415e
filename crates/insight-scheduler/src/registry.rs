//! Job status tracking.
//!
//! The registry is shared between the scheduler and its callers so the CLI
//! can report when each job last ran and how it went.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobResult {
    Success,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    /// Free-form summary of the last successful run, e.g. "removed=3".
    pub last_summary: Option<String>,
    pub run_count: u64,
    pub error_count: u64,
    pub is_running: bool,
}

impl JobStatus {
    fn new(job_name: &str, cron_expr: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            cron_expr: cron_expr.to_string(),
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            last_summary: None,
            run_count: 0,
            error_count: 0,
            is_running: false,
        }
    }
}

/// Thread-safe map of job name to [`JobStatus`].
///
/// Updates for unknown jobs are ignored.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false if the name is already taken.
    pub fn register(&self, job_name: &str, cron_expr: &str) -> bool {
        let mut jobs = self.write();
        if jobs.contains_key(job_name) {
            return false;
        }
        jobs.insert(job_name.to_string(), JobStatus::new(job_name, cron_expr));
        true
    }

    pub fn record_start(&self, job_name: &str) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.is_running = true;
            status.last_run = Some(Utc::now());
        }
    }

    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        self.record_complete_with_summary(job_name, result, duration_ms, None);
    }

    pub fn record_complete_with_summary(
        &self,
        job_name: &str,
        result: JobResult,
        duration_ms: u64,
        summary: Option<String>,
    ) {
        let mut jobs = self.write();
        let Some(status) = jobs.get_mut(job_name) else {
            return;
        };
        if matches!(result, JobResult::Skipped(_)) {
            // A skipped firing leaves the running run's state alone.
            status.last_result = Some(result);
            status.run_count += 1;
            return;
        }
        status.is_running = false;
        status.last_duration_ms = Some(duration_ms);
        if matches!(result, JobResult::Failed(_)) {
            status.error_count += 1;
        }
        if summary.is_some() {
            status.last_summary = summary;
        }
        status.last_result = Some(result);
        status.run_count += 1;
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.read().get(job_name).cloned()
    }

    /// All jobs, sorted by name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.read()
            .get(job_name)
            .map(|s| s.is_running)
            .unwrap_or(false)
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.read().contains_key(job_name)
    }

    pub fn running_count(&self) -> usize {
        self.read().values().filter(|s| s.is_running).count()
    }

    pub fn job_count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = JobRegistry::new();
        assert!(registry.register("cache-sweep", "0 */15 * * * *"));

        let status = registry.get_status("cache-sweep").unwrap();
        assert_eq!(status.cron_expr, "0 */15 * * * *");
        assert_eq!(status.run_count, 0);
        assert!(!status.is_running);
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let registry = JobRegistry::new();
        assert!(registry.register("cache-sweep", "0 * * * * *"));
        assert!(!registry.register("cache-sweep", "0 0 * * * *"));
        assert_eq!(
            registry.get_status("cache-sweep").unwrap().cron_expr,
            "0 * * * * *"
        );
    }

    #[test]
    fn test_success_records_duration_and_summary() {
        let registry = JobRegistry::new();
        registry.register("index-compaction", "0 30 * * * *");
        registry.record_start("index-compaction");
        assert!(registry.is_running("index-compaction"));

        registry.record_complete_with_summary(
            "index-compaction",
            JobResult::Success,
            120,
            Some("compacted=true".into()),
        );

        let status = registry.get_status("index-compaction").unwrap();
        assert!(!status.is_running);
        assert!(status.last_run.is_some());
        assert_eq!(status.last_duration_ms, Some(120));
        assert_eq!(status.last_summary.as_deref(), Some("compacted=true"));
        assert_eq!(status.run_count, 1);
        assert_eq!(status.error_count, 0);
    }

    #[test]
    fn test_failure_counts_as_error() {
        let registry = JobRegistry::new();
        registry.register("embedding-flush", "0 * * * * *");
        registry.record_start("embedding-flush");
        registry.record_complete("embedding-flush", JobResult::Failed("disk full".into()), 5);

        let status = registry.get_status("embedding-flush").unwrap();
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_result, Some(JobResult::Failed("disk full".into())));
    }

    #[test]
    fn test_skip_keeps_running_state() {
        let registry = JobRegistry::new();
        registry.register("vault-run", "0 0 3 * * *");
        registry.record_start("vault-run");
        registry.record_complete("vault-run", JobResult::Skipped("overlap".into()), 0);

        let status = registry.get_status("vault-run").unwrap();
        assert!(status.is_running);
        assert_eq!(status.error_count, 0);
        assert_eq!(registry.running_count(), 1);
    }

    #[test]
    fn test_unknown_job_is_ignored() {
        let registry = JobRegistry::new();
        registry.record_start("unknown");
        registry.record_complete("unknown", JobResult::Success, 1);
        assert!(registry.get_status("unknown").is_none());
        assert!(!registry.is_running("unknown"));
        assert_eq!(registry.job_count(), 0);
    }

    #[test]
    fn test_all_status_sorted() {
        let registry = JobRegistry::new();
        registry.register("b", "0 * * * * *");
        registry.register("a", "0 * * * * *");
        let names: Vec<_> = registry
            .get_all_status()
            .into_iter()
            .map(|s| s.job_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
