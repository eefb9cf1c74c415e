//! Scheduler service wrapper around tokio-cron-scheduler.
//!
//! Every registered job goes through the same path: overlap check,
//! status bookkeeping in the [`JobRegistry`], an optional timeout, and a
//! clone of the shutdown token so long runs can stop early.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::registry::{JobRegistry, JobResult};
use crate::{SchedulerConfig, SchedulerError};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Check a 6-field cron expression (sec min hour day-of-month month day-of-week).
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))
}

/// How a registered job runs.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// IANA timezone; `None` uses the scheduler default.
    pub timezone: Option<String>,
    pub overlap: OverlapPolicy,
    /// Runs longer than this are abandoned and recorded as failed.
    pub timeout: Option<Duration>,
}

impl JobOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

/// Run one firing of a job and record its outcome.
///
/// `Ok` carries a short summary of what the run did.
pub(crate) async fn execute<Fut>(
    name: &str,
    registry: &JobRegistry,
    guard: &OverlapGuard,
    timeout: Option<Duration>,
    run: Fut,
) -> JobResult
where
    Fut: Future<Output = Result<String, String>>,
{
    let Some(_slot) = guard.try_acquire() else {
        warn!(job = %name, "Previous run still active, skipping");
        let result = JobResult::Skipped("previous run still active".to_string());
        registry.record_complete(name, result.clone(), 0);
        return result;
    };

    registry.record_start(name);
    info!(job = %name, "Job started");
    let start = Instant::now();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(outcome) => outcome,
            Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
        },
        None => run.await,
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(summary) => {
            info!(job = %name, duration_ms, summary = %summary, "Job completed");
            registry.record_complete_with_summary(name, JobResult::Success, duration_ms, Some(summary));
            JobResult::Success
        }
        Err(reason) => {
            warn!(job = %name, duration_ms, error = %reason, "Job failed");
            let result = JobResult::Failed(reason);
            registry.record_complete(name, result.clone(), duration_ms);
            result
        }
    }
}

/// Lifecycle owner for the cron scheduler and its jobs.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl SchedulerService {
    /// Create a stopped scheduler. Call [`start`](Self::start) to begin firing jobs.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.parse_timezone()?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            registry: Arc::new(JobRegistry::new()),
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.scheduler.start().await?;
        info!(jobs = self.registry.job_count(), "Scheduler started");
        Ok(())
    }

    /// Cancel the shutdown token, wait for running jobs up to the configured
    /// timeout, then stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }
        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let deadline = Instant::now() + self.config.shutdown_timeout();
        while self.registry.running_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
        let still_running = self.registry.running_count();
        if still_running > 0 {
            warn!(still_running, "Shutdown timeout reached with jobs still running");
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a cron job.
    ///
    /// `job_fn` receives the shutdown token and returns a summary on
    /// success or a reason on failure.
    pub async fn register_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        options: JobOptions,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let tz: Tz = match options.timezone.as_deref() {
            Some(tz_str) => Self::parse_timezone(tz_str)?,
            None => self.config.parse_timezone()?,
        };
        validate_cron_expression(cron_expr)?;
        if !self.registry.register(name, cron_expr) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }

        let job_name = name.to_string();
        let registry = Arc::clone(&self.registry);
        let guard = OverlapGuard::new(options.overlap);
        let timeout = options.timeout;
        let shutdown_token = self.shutdown_token.clone();

        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let name = job_name.clone();
            let registry = Arc::clone(&registry);
            let guard = guard.clone();
            let token = shutdown_token.clone();
            let job_fn = job_fn.clone();

            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                execute(&name, &registry, &guard, timeout, job_fn(token)).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        info!(
            job = %name,
            uuid = %uuid,
            cron = %cron_expr,
            timezone = %tz.name(),
            overlap = ?options.overlap,
            "Job registered"
        );
        Ok(uuid)
    }

    pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
        tz_str
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(tz_str.to_string()))
    }
}
