//! Named, reusable diff definitions.

use serde::{Deserialize, Serialize};

use crate::collector::CollectorRegistry;
use crate::drift::engine::{DriftEngine, DriftError};
use crate::drift::model::{DiffRequest, DriftReport};

/// A saved diff: table, resource key and optional monitored columns.
///
/// An omitted `resource_key` is filled from the collector writing the table,
/// see [`Validator::with_default_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub resource_key: Vec<String>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Validator {
    pub fn new<I, S>(name: impl Into<String>, table: impl Into<String>, resource_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            resource_key: resource_key.into_iter().map(Into::into).collect(),
            columns: None,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Use the key declared for the table in `registry` when none is set.
    pub fn with_default_key(mut self, registry: &CollectorRegistry) -> Self {
        if self.resource_key.is_empty()
            && let Some(key) = registry.resource_key_for(&self.table)
        {
            self.resource_key = key.to_vec();
        }
        self
    }

    pub fn request(&self) -> DiffRequest {
        DiffRequest {
            table: self.table.clone(),
            resource_key: self.resource_key.clone(),
            columns: self.columns.clone(),
        }
    }

    pub fn run(&self, engine: &DriftEngine) -> Result<DriftReport, DriftError> {
        engine.diff_with(&self.request())
    }
}

/// Result of one validator; exactly one of `report` and `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub validator: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DriftReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The diff ran and found at least one record.
    pub fn has_drift(&self) -> bool {
        self.report.as_ref().is_some_and(|r| !r.is_empty())
    }
}

/// Run every validator; a failing validator does not stop the others.
pub fn run_validators(engine: &DriftEngine, validators: &[Validator]) -> Vec<ValidationResult> {
    validators
        .iter()
        .map(|validator| {
            let (report, error) = match validator.run(engine) {
                Ok(report) => {
                    tracing::info!(
                        validator = %validator.name,
                        table = %validator.table,
                        records = report.records.len(),
                        "Validator finished"
                    );
                    (Some(report), None)
                }
                Err(e) => {
                    tracing::warn!(
                        validator = %validator.name,
                        table = %validator.table,
                        error = %e,
                        "Validator failed"
                    );
                    (None, Some(e.to_string()))
                }
            };
            ValidationResult {
                validator: validator.name.clone(),
                table: validator.table.clone(),
                report,
                error,
            }
        })
        .collect()
}
