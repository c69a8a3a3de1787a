//! Drift output types.
//!
//! Records are plain data: computed on demand, never persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::CellValue;

/// How a resource moved between two generations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Transition {
    /// Key present only in the newer generation.
    Appeared,
    /// Key present only in the older generation.
    Disappeared,
    /// Key in both, monitored value differs.
    Changed,
}

/// One detected difference for one resource key and field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffRecord {
    /// Values of the resource key columns, in key order.
    pub key: Vec<CellValue>,
    /// Changed field; `None` when the table has no monitored columns.
    pub field: Option<String>,
    /// Value in the older generation (`Null` when absent).
    pub previous: CellValue,
    /// Value in the newer generation (`Null` when absent).
    pub current: CellValue,
    pub transition: Transition,
}

/// Parameters of one diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRequest {
    pub table: String,
    pub resource_key: Vec<String>,
    /// Monitored columns; all non-key columns when `None`.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl DiffRequest {
    pub fn new<I, S>(table: impl Into<String>, resource_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            resource_key: resource_key.into_iter().map(Into::into).collect(),
            columns: None,
        }
    }

    /// Restrict the diff to these columns.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Diff of the two newest generations of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub table: String,
    pub resource_key: Vec<String>,
    /// Timestamp of the older compared generation.
    pub previous: Option<DateTime<Utc>>,
    /// Timestamp of the newer compared generation.
    pub current: Option<DateTime<Utc>>,
    /// Records sorted by (key, field).
    pub records: Vec<DiffRecord>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records with the given transition.
    pub fn count(&self, transition: Transition) -> usize {
        self.records
            .iter()
            .filter(|r| r.transition == transition)
            .count()
    }
}
