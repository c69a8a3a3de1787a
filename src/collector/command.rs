//! External command collector.
//!
//! Runs a program per device group and reads its stdout as a JSON array of
//! objects, one object per row.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tokio::process::Command;

use crate::collector::{Collector, CollectorError};
use crate::storage::{CellValue, Record};

/// Placeholder replaced by the device group in arguments.
pub const DEVICE_GROUP_PLACEHOLDER: &str = "{device_group}";

/// Placeholder replaced by the RFC 3339 run timestamp in arguments.
pub const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

/// Longest stderr excerpt kept in a `CommandFailed` error.
const MAX_STDERR_LEN: usize = 512;

/// Collector backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandCollector {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandCollector {
    /// Create from an argv vector (`argv[0]` is the program).
    ///
    /// # Errors
    /// Returns `CollectorError::Config` for an empty argv.
    pub fn new<I, S>(argv: I) -> Result<Self, CollectorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| CollectorError::Config("command must not be empty".to_string()))?;
        Ok(Self {
            program,
            args: argv.collect(),
            env: BTreeMap::new(),
        })
    }

    /// Set extra environment variables for the child process.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders substituted.
    fn render_args(&self, device_group: &str, timestamp: DateTime<Utc>) -> Vec<String> {
        let ts = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.args
            .iter()
            .map(|arg| {
                arg.replace(DEVICE_GROUP_PLACEHOLDER, device_group)
                    .replace(TIMESTAMP_PLACEHOLDER, &ts)
            })
            .collect()
    }
}

#[async_trait]
impl Collector for CommandCollector {
    async fn collect(
        &self,
        device_group: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Record>, CollectorError> {
        let args = self.render_args(device_group, timestamp);
        tracing::debug!(program = %self.program, ?args, device_group, "Running collector command");

        let output = Command::new(&self.program)
            .args(&args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_LEN).collect();
            return Err(CollectorError::CommandFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        parse_rows(&output.stdout)
    }
}

/// Parse a JSON array of objects into records.
///
/// Empty output (only whitespace) is an empty table.
pub fn parse_rows(stdout: &[u8]) -> Result<Vec<Record>, CollectorError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(stdout)
        .map_err(|e| CollectorError::InvalidOutput(format!("stdout is not JSON: {e}")))?;
    let Value::Array(items) = value else {
        return Err(CollectorError::InvalidOutput(
            "expected a JSON array of objects".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, CellValue::from(v)))
                .collect()),
            other => Err(CollectorError::InvalidOutput(format!(
                "row {idx} is not an object: {other}"
            ))),
        })
        .collect()
}
