//! Per-row outcomes and the run report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use uuid::Uuid;

use crate::collector::PlanRow;

/// Outcome of one plan row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Rows were committed as (part of) a new generation.
    Written { table: String, rows: usize },
    /// Collector returned no rows; nothing was written.
    NoDataSkipped { table: String },
    /// Collector could not be resolved from the registry.
    PlanResolutionFailure { error: String },
    /// Collector failed or timed out.
    CollectionFailure { error: String },
    /// Store rejected or failed the write.
    WriteError { table: String, error: String },
    /// Row never started because the run was cancelled or timed out.
    Cancelled,
}

/// Coarse classification of an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Skip,
    Failure,
    Cancelled,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Written { .. } => OutcomeKind::Success,
            Self::NoDataSkipped { .. } => OutcomeKind::Skip,
            Self::PlanResolutionFailure { .. }
            | Self::CollectionFailure { .. }
            | Self::WriteError { .. } => OutcomeKind::Failure,
            Self::Cancelled => OutcomeKind::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind() == OutcomeKind::Success
    }

    pub fn is_failure(&self) -> bool {
        self.kind() == OutcomeKind::Failure
    }
}

/// One plan row with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowOutcome {
    #[serde(flatten)]
    pub row: PlanRow,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Result of one orchestration run, outcomes in plan order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Run timestamp stamped on every written row.
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<RowOutcome>,
}

impl RunReport {
    fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.kind() == kind)
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(OutcomeKind::Success)
    }

    pub fn skipped(&self) -> usize {
        self.count(OutcomeKind::Skip)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeKind::Failure)
    }

    pub fn cancelled(&self) -> usize {
        self.count(OutcomeKind::Cancelled)
    }

    /// No failures and nothing cancelled.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.cancelled() == 0
    }
}
