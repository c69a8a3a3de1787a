//! Core collector trait, errors and the immutable collector definition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::{Record, StorageError, WriteMode, normalize_table_name};

/// Errors that can occur during collection.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// I/O error while talking to the device or spawning a process.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout elapsed.
    #[error("timeout elapsed after {0:?}")]
    Timeout(Duration),

    /// External command exited unsuccessfully.
    #[error("command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    /// Collector produced output that is not a table of rows.
    #[error("invalid collector output: {0}")]
    InvalidOutput(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Any other failure reported by the collector.
    #[error("{0}")]
    Failed(String),
}

/// Core collector trait.
///
/// A collector captures the state of one device group at one point in time
/// and returns it as rows sharing one field set. How it reaches the devices
/// (SSH, REST, SNMP) is its own business.
///
/// # Returns
///
/// - `Ok(rows)`: The captured table (possibly empty)
/// - `Err(CollectorError)`: The device group could not be collected
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Perform one collection for `device_group` at run `timestamp`.
    async fn collect(
        &self,
        device_group: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Record>, CollectorError>;
}

/// Default target table: `<last dot segment of platform>_<name>`, lower case.
///
/// `cisco.nxos.nxos` + `arp_table` gives `nxos_arp_table`.
pub fn default_table_name(platform: &str, name: &str) -> String {
    let segment = platform.rsplit('.').next().unwrap_or(platform);
    format!("{segment}_{name}").to_ascii_lowercase()
}

/// Immutable description of one registered collector.
#[derive(Clone)]
pub struct CollectorDefinition {
    platform: String,
    name: String,
    table: String,
    write_mode: WriteMode,
    resource_key: Option<Vec<String>>,
    timeout: Option<Duration>,
    depends_on: Vec<String>,
    collector: Arc<dyn Collector>,
}

impl std::fmt::Debug for CollectorDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorDefinition")
            .field("platform", &self.platform)
            .field("name", &self.name)
            .field("table", &self.table)
            .field("write_mode", &self.write_mode)
            .field("resource_key", &self.resource_key)
            .field("timeout", &self.timeout)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

impl CollectorDefinition {
    /// Create a definition writing to the default table in append mode.
    pub fn new(
        platform: impl Into<String>,
        name: impl Into<String>,
        collector: impl Collector,
    ) -> Self {
        Self::from_arc(platform, name, Arc::new(collector))
    }

    /// Create a definition around a shared collector.
    pub fn from_arc(
        platform: impl Into<String>,
        name: impl Into<String>,
        collector: Arc<dyn Collector>,
    ) -> Self {
        let platform = platform.into();
        let name = name.into();
        Self {
            table: default_table_name(&platform, &name),
            platform,
            name,
            write_mode: WriteMode::default(),
            resource_key: None,
            timeout: None,
            depends_on: Vec::new(),
            collector,
        }
    }

    /// Set the target table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set the write mode.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Set the resource key used when diffing the target table.
    pub fn with_resource_key<I, S>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_key = Some(key.into_iter().map(Into::into).collect());
        self
    }

    /// Set the invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the prerequisite collectors (same platform).
    pub fn with_depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    /// Normalize the table name; called once at registration.
    pub(crate) fn validated(mut self) -> Result<Self, StorageError> {
        self.table = normalize_table_name(&self.table)?;
        Ok(self)
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    pub fn resource_key(&self) -> Option<&[String]> {
        self.resource_key.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Invoke the underlying collector.
    pub async fn invoke(
        &self,
        device_group: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Record>, CollectorError> {
        self.collector.collect(device_group, timestamp).await
    }
}
