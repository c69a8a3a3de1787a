//! Plan execution with per-row failure isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use uuid::Uuid;

use crate::collector::{CollectorError, CollectorRegistry, PlanRow};
use crate::orchestrator::{Outcome, RowOutcome, RunReport};
use crate::storage::{SnapshotWriter, StorageAdmin, StorageError};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The store did not answer the liveness probe before the run.
    #[error("snapshot store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),
}

/// Run options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorOptions {
    /// Device groups collected at once; 1 runs the plan strictly in order.
    pub max_concurrency: usize,
    /// Timeout per collector call unless the definition declares its own.
    #[serde(with = "humantime_serde")]
    pub collector_timeout: Option<Duration>,
    /// After this long, rows not yet started are reported as cancelled.
    #[serde(with = "humantime_serde")]
    pub run_timeout: Option<Duration>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            collector_timeout: None,
            run_timeout: None,
        }
    }
}

/// Collection orchestrator.
///
/// Resolves, invokes and writes each plan row; one failing row never aborts
/// the others.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<CollectorRegistry>,
    writer: SnapshotWriter,
    admin: StorageAdmin,
    options: OrchestratorOptions,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("collectors", &self.registry.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CollectorRegistry>,
        writer: SnapshotWriter,
        admin: StorageAdmin,
    ) -> Self {
        Self {
            registry,
            writer,
            admin,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<CollectorRegistry> {
        &self.registry
    }

    /// Run a plan to completion.
    pub async fn run(
        &self,
        plan: &[PlanRow],
        timestamp: DateTime<Utc>,
    ) -> Result<RunReport, OrchestratorError> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run_with_cancel(plan, timestamp, cancel_rx).await
    }

    /// Run a plan; once `cancel` turns true no further rows start.
    ///
    /// In-flight collectors run to completion and their writes stay atomic.
    pub async fn run_with_cancel(
        &self,
        plan: &[PlanRow],
        timestamp: DateTime<Utc>,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, OrchestratorError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        self.admin
            .ping()
            .await
            .map_err(OrchestratorError::StoreUnavailable)?;

        tracing::info!(
            run_id = %run_id,
            rows = plan.len(),
            timestamp = %timestamp,
            max_concurrency = self.options.max_concurrency,
            "Run started"
        );

        let deadline = self.options.run_timeout.map(|t| Instant::now() + t);
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));

        let mut handles = Vec::new();
        for indices in self.partition(plan) {
            let rows: Vec<(usize, PlanRow)> =
                indices.iter().map(|&i| (i, plan[i].clone())).collect();
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                this.run_group(rows, timestamp, cancel, deadline).await
            });
            handles.push((indices, handle));
        }

        let mut slots: Vec<Option<Outcome>> = vec![None; plan.len()];
        for (indices, handle) in handles {
            match handle.await {
                Ok(results) => {
                    for (idx, outcome) in results {
                        slots[idx] = Some(outcome);
                    }
                }
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Collector task aborted");
                    for idx in indices {
                        slots[idx].get_or_insert_with(|| Outcome::CollectionFailure {
                            error: format!("collector task aborted: {e}"),
                        });
                    }
                }
            }
        }

        let outcomes = plan
            .iter()
            .zip(slots)
            .map(|(row, outcome)| RowOutcome {
                row: row.clone(),
                outcome: outcome.unwrap_or(Outcome::Cancelled),
            })
            .collect();

        let report = RunReport {
            run_id,
            timestamp,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        tracing::info!(
            run_id = %run_id,
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "Run finished"
        );
        Ok(report)
    }

    /// Split plan indices into sequential groups.
    ///
    /// Sequential mode keeps the whole plan in one group; otherwise rows are
    /// grouped by device group in first-seen order.
    fn partition(&self, plan: &[PlanRow]) -> Vec<Vec<usize>> {
        if plan.is_empty() {
            return Vec::new();
        }
        if self.options.max_concurrency <= 1 {
            return vec![(0..plan.len()).collect()];
        }

        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (idx, row) in plan.iter().enumerate() {
            let slot = *positions.entry(row.device_group.as_str()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(idx);
        }
        groups
    }

    async fn run_group(
        &self,
        rows: Vec<(usize, PlanRow)>,
        timestamp: DateTime<Utc>,
        cancel: watch::Receiver<bool>,
        deadline: Option<Instant>,
    ) -> Vec<(usize, Outcome)> {
        let mut results = Vec::with_capacity(rows.len());
        for (idx, row) in rows {
            let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
            let outcome = if *cancel.borrow() || timed_out {
                tracing::debug!(row = %row, timed_out, "Row cancelled");
                Outcome::Cancelled
            } else {
                self.execute_row(&row, timestamp).await
            };
            results.push((idx, outcome));
        }
        results
    }

    /// Resolve, collect and write one plan row.
    async fn execute_row(&self, row: &PlanRow, timestamp: DateTime<Utc>) -> Outcome {
        let definition = match self.registry.resolve(&row.platform, &row.collector) {
            Ok(definition) => definition,
            Err(e) => {
                tracing::warn!(row = %row, error = %e, "Plan row could not be resolved");
                return Outcome::PlanResolutionFailure {
                    error: e.to_string(),
                };
            }
        };

        let start = Instant::now();
        let invocation = definition.invoke(&row.device_group, timestamp);
        let result = match definition.timeout().or(self.options.collector_timeout) {
            Some(limit) => tokio::time::timeout(limit, invocation)
                .await
                .unwrap_or(Err(CollectorError::Timeout(limit))),
            None => invocation.await,
        };
        let duration_ms = start.elapsed().as_millis();

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(
                    collector = %row.collector,
                    device_group = %row.device_group,
                    duration_ms,
                    error = %e,
                    "Collection failed"
                );
                return Outcome::CollectionFailure {
                    error: e.to_string(),
                };
            }
        };

        let table = definition.table().to_string();
        if rows.is_empty() {
            tracing::info!(
                collector = %row.collector,
                device_group = %row.device_group,
                table = %table,
                "Collector returned no rows, skipping write"
            );
            return Outcome::NoDataSkipped { table };
        }

        match self
            .writer
            .write(&table, rows, timestamp, definition.write_mode())
            .await
        {
            Ok(summary) => {
                tracing::debug!(
                    collector = %row.collector,
                    device_group = %row.device_group,
                    table = %summary.table,
                    rows = summary.rows,
                    duration_ms,
                    "Collection written"
                );
                Outcome::Written {
                    table: summary.table,
                    rows: summary.rows,
                }
            }
            Err(e) => {
                tracing::error!(
                    collector = %row.collector,
                    device_group = %row.device_group,
                    table = %table,
                    error = %e,
                    "Write failed"
                );
                Outcome::WriteError {
                    table,
                    error: e.to_string(),
                }
            }
        }
    }
}
