//! Configuration module for netdrift.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database and server settings
//! - Orchestrator options and the run schedule
//! - Command collectors, the run plan and drift validators

mod app;
mod collector;
mod validation;

pub use app::{
    AppConfig, DEFAULT_DB_PATH, DEFAULT_RUN_INTERVAL, DatabaseConfig, ScheduleConfig, ServerConfig,
};
pub use collector::{CollectorConfig, build_registry};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
