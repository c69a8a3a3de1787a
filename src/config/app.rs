//! Application configuration structures.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::{CollectorRegistry, Selection};
use crate::drift::Validator;
use crate::orchestrator::OrchestratorOptions;
use crate::scheduler::Schedule;
use crate::storage::StorageBuilder;

use super::collector::{CollectorConfig, build_registry, validate_sections};
use super::validation::{ConfigError, parse_duration};

// =============================================================================
// Constants
// =============================================================================

/// Default database file.
pub const DEFAULT_DB_PATH: &str = "data/netdrift.db";

/// Default interval between scheduled runs (15 minutes).
pub const DEFAULT_RUN_INTERVAL: Duration = Duration::from_secs(15 * 60);

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_channel_capacity() -> usize {
    crate::storage::DEFAULT_CHANNEL_CAPACITY
}

fn default_checkpoint_interval() -> String {
    "30s".to_string()
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "127.0.0.1").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind.parse().map_err(|_| {
            ConfigError::Validation(format!("invalid server bind address: '{}'", self.bind))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Bounded channel capacity of the writer actor (default: 1024).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Checkpoint interval (default: "30s").
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            channel_capacity: default_channel_capacity(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

impl DatabaseConfig {
    /// Storage builder for this configuration.
    pub fn storage_builder(&self) -> Result<StorageBuilder, ConfigError> {
        let interval = parse_duration("database checkpoint_interval", &self.checkpoint_interval)?;
        Ok(StorageBuilder::new(&self.path)
            .channel_capacity(self.channel_capacity)
            .checkpoint_interval(interval))
    }
}

// =============================================================================
// Schedule Configuration
// =============================================================================

/// Run schedule: exactly one of `interval` or `cron`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl ScheduleConfig {
    /// Resolve to a [`Schedule`]; neither field set means [`DEFAULT_RUN_INTERVAL`].
    pub fn to_schedule(&self) -> Result<Schedule, ConfigError> {
        match (&self.interval, &self.cron) {
            (Some(_), Some(_)) => Err(ConfigError::Validation(
                "schedule: cannot specify both interval and cron".to_string(),
            )),
            (Some(interval), None) => {
                parse_duration("schedule interval", interval).map(Schedule::interval)
            }
            (None, Some(expr)) => {
                Schedule::cron(expr).map_err(|e| ConfigError::Validation(e.to_string()))
            }
            (None, None) => Ok(Schedule::interval(DEFAULT_RUN_INTERVAL)),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Orchestrator run options.
    #[serde(default)]
    pub orchestrator: OrchestratorOptions,

    /// Schedule for `serve`.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Command-backed collector definitions.
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,

    /// Work selected for each run.
    #[serde(default)]
    pub plan: Vec<Selection>,

    /// Saved diffs run by `validate`.
    #[serde(default)]
    pub validators: Vec<Validator>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database path cannot be empty".to_string(),
            ));
        }

        if self.database.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "database channel_capacity must be positive".to_string(),
            ));
        }

        self.database.storage_builder()?;

        if self.orchestrator.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "orchestrator max_concurrency must be positive".to_string(),
            ));
        }

        self.schedule.to_schedule()?;
        validate_sections(&self.collectors, &self.plan, &self.validators)
    }

    /// Registry holding every configured collector.
    pub fn registry(&self) -> Result<CollectorRegistry, ConfigError> {
        build_registry(&self.collectors)
    }

    /// Configured validators, omitted keys filled from `registry`.
    pub fn validators_with_default_keys(&self, registry: &CollectorRegistry) -> Vec<Validator> {
        self.validators
            .iter()
            .cloned()
            .map(|validator| validator.with_default_key(registry))
            .collect()
    }
}
