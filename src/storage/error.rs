//! Storage-specific error types.
//!
//! All snapshot store operations return [`StorageError`] on failure. The
//! orchestrator reports any error from a write as a failed plan row.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Failed to send command to writer actor.
    #[error("failed to send command to writer actor")]
    ChannelSend,

    /// Writer actor went away before replying.
    #[error("writer actor dropped the reply")]
    ChannelClosed,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (e.g., thread join failure).
    #[error("internal error: {0}")]
    Internal(String),

    /// The table was never written.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// `fail_if_exists` write against an existing table.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// Table or column name that cannot be stored.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A collected row uses the injected timestamp column name.
    #[error("column '{0}' is reserved")]
    ReservedColumn(String),

    /// A write carried no rows.
    #[error("refusing to write an empty generation to '{0}'")]
    EmptyGeneration(String),

    /// Rows of one write do not share one field set.
    #[error("row {row} of '{table}' has a different column set than row 0")]
    InconsistentColumns { table: String, row: usize },

    /// A float cell is NaN or infinite and has no stored form.
    #[error("column '{column}' of '{table}' holds a non-finite float")]
    NonFiniteFloat { table: String, column: String },

    /// Append with a timestamp older than the newest stored generation.
    #[error("timestamp {timestamp} for '{table}' is older than latest generation {latest}")]
    StaleTimestamp {
        table: String,
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}
