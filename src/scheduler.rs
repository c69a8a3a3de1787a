//! Periodic orchestration runs.
//!
//! [`RunScheduler`] wraps `tokio-cron-scheduler` and triggers one
//! [`Orchestrator`] run of a fixed plan per tick, each with a fresh run
//! timestamp. A tick that fires while the previous run is still going is
//! skipped, so run timestamps stay monotonic per table.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::collector::PlanRow;
use crate::orchestrator::{Orchestrator, RunReport};

/// Minimum interval between runs.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Cron expression failed to parse.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    /// Underlying job scheduler failed.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// When orchestration runs fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between runs, at least [`MIN_INTERVAL`].
    Interval(Duration),

    /// 6-field cron expression: `sec min hour day month weekday`.
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule, clamped to [`MIN_INTERVAL`].
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule, validating the expression.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, SchedulerError> {
        let expr = expr.as_ref().trim();
        cron::Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::Cron(expr.to_string()))
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {}", humantime::format_duration(*d)),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

/// Shared state of the scheduled job.
struct RunState {
    orchestrator: Orchestrator,
    plan: Vec<PlanRow>,
    running: Mutex<()>,
    last_report: RwLock<Option<RunReport>>,
}

/// Scheduler that runs one plan on a schedule.
pub struct RunScheduler {
    scheduler: JobScheduler,
    schedule: Schedule,
    job_id: uuid::Uuid,
    state: Arc<RunState>,
}

impl std::fmt::Debug for RunScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunScheduler")
            .field("schedule", &self.schedule)
            .field("job_id", &self.job_id)
            .field("plan_rows", &self.state.plan.len())
            .finish_non_exhaustive()
    }
}

impl RunScheduler {
    /// Create a scheduler and register the run job. Call [`start`](Self::start)
    /// to begin firing.
    pub async fn new(
        orchestrator: Orchestrator,
        plan: Vec<PlanRow>,
        schedule: Schedule,
    ) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        let state = Arc::new(RunState {
            orchestrator,
            plan,
            running: Mutex::new(()),
            last_report: RwLock::new(None),
        });
        let job = create_job(&schedule, Arc::clone(&state))?;
        let job_id = scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        tracing::info!(job_id = %job_id, schedule = %schedule, rows = state.plan.len(), "Run job registered");
        Ok(Self {
            scheduler,
            schedule,
            job_id,
            state,
        })
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;
        tracing::info!(schedule = %self.schedule, "Run scheduler started");
        Ok(())
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Report of the most recent completed run.
    pub async fn last_report(&self) -> Option<RunReport> {
        self.state.last_report.read().await.clone()
    }

    /// Gracefully shutdown the scheduler with default timeout.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with custom timeout. A timeout is logged, not an error.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), SchedulerError> {
        let result = tokio::time::timeout(timeout, async {
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::Scheduler(e.to_string()))
        })
        .await;

        match result {
            Ok(Ok(())) => {
                tracing::info!("Run scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Run scheduler shutdown failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(timeout = ?timeout, "Run scheduler shutdown timed out");
                Ok(())
            }
        }
    }
}

fn create_job(schedule: &Schedule, state: Arc<RunState>) -> Result<Job, SchedulerError> {
    let callback = move |_: uuid::Uuid, _: JobScheduler| {
        let state = Arc::clone(&state);
        Box::pin(async move { run_once(&state).await })
            as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    };

    match schedule {
        Schedule::Interval(d) => Job::new_repeated_async(*d, callback),
        Schedule::Cron(expr) => Job::new_cron_job_async(expr.as_str(), callback),
    }
    .map_err(|e| SchedulerError::Scheduler(e.to_string()))
}

/// Execute one scheduled run and keep its report.
async fn run_once(state: &RunState) {
    let Ok(_guard) = state.running.try_lock() else {
        tracing::warn!("Previous run still in progress, skipping tick");
        return;
    };

    let timestamp = Utc::now();
    match state.orchestrator.run(&state.plan, timestamp).await {
        Ok(report) => {
            tracing::info!(
                run_id = %report.run_id,
                succeeded = report.succeeded(),
                skipped = report.skipped(),
                failed = report.failed(),
                cancelled = report.cancelled(),
                "Scheduled run finished"
            );
            *state.last_report.write().await = Some(report);
        }
        Err(e) => tracing::error!(error = %e, "Scheduled run aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorDefinition, CollectorRegistry, FnCollector};
    use crate::record;
    use crate::storage::{IN_MEMORY_PATH, StorageBuilder};

    #[test]
    fn test_schedule_interval_clamped() {
        assert_eq!(
            Schedule::interval(Duration::from_millis(100)),
            Schedule::Interval(MIN_INTERVAL)
        );
        assert_eq!(
            Schedule::interval(Duration::from_secs(30)),
            Schedule::Interval(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_schedule_cron_validation() {
        assert_eq!(
            Schedule::cron("0 */5 * * * *").unwrap(),
            Schedule::Cron("0 */5 * * * *".to_string())
        );
        let err = Schedule::cron("not a cron").unwrap_err();
        assert!(err.to_string().contains("invalid cron"));
    }

    #[test]
    fn test_schedule_display() {
        assert_eq!(
            Schedule::interval(Duration::from_secs(900)).to_string(),
            "every 15m"
        );
        assert_eq!(
            Schedule::cron("0 0 * * * *").unwrap().to_string(),
            "cron: 0 0 * * * *"
        );
    }

    #[tokio::test]
    async fn test_scheduler_runs_plan() {
        let handles = StorageBuilder::new(IN_MEMORY_PATH).build().unwrap();
        let mut registry = CollectorRegistry::new();
        registry
            .register(CollectorDefinition::new(
                "bigip",
                "vip_availability",
                FnCollector::new(|group: String, _| async move {
                    Ok(vec![record! { "device" => group, "vip" => "web" }])
                }),
            ))
            .unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            handles.writer.clone(),
            handles.admin.clone(),
        );
        let plan = vec![PlanRow::new("bigip", "lb_dc1", "vip_availability")];

        let scheduler =
            RunScheduler::new(orchestrator, plan, Schedule::interval(Duration::from_secs(1)))
                .await
                .unwrap();
        scheduler.start().await.unwrap();

        let mut report = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            report = scheduler.last_report().await;
            if report.is_some() {
                break;
            }
        }
        scheduler.shutdown().await.unwrap();

        let report = report.expect("scheduled run never finished");
        assert_eq!(report.succeeded(), 1);
        assert!(
            handles
                .reader
                .table_exists("bigip_vip_availability")
                .unwrap()
        );
        handles.shutdown().unwrap();
    }
}
