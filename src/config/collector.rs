//! Collector, plan and validator configuration.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::{
    CollectorDefinition, CollectorRegistry, CommandCollector, Selection, default_table_name,
};
use crate::drift::Validator;
use crate::storage::{WriteMode, normalize_table_name};

use super::validation::{ConfigError, expand_env_vars};

/// One command-backed collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Platform type, e.g. `bigip` or `vendor.nxos`.
    pub platform: String,

    /// Collector name, unique per platform.
    pub name: String,

    /// Target table (default: `<platform>_<name>`).
    #[serde(default)]
    pub table: Option<String>,

    /// Write mode (default: append).
    #[serde(default)]
    pub mode: WriteMode,

    /// Columns identifying one resource.
    #[serde(default)]
    pub resource_key: Option<Vec<String>>,

    /// Collectors that must run first for the same device group.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Invocation timeout.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Program and arguments; `{device_group}` and `{timestamp}` are substituted
    /// per call, `${VAR}` at load time.
    pub command: Vec<String>,

    /// Extra environment for the program, `${VAR}` expanded.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CollectorConfig {
    /// Effective target table.
    pub fn table_name(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| default_table_name(&self.platform, &self.name))
    }

    /// Validate one collector entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = format!("{}/{}", self.platform, self.name);
        if self.platform.trim().is_empty() || self.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "collector '{id}': platform and name cannot be empty"
            )));
        }
        normalize_table_name(&self.table_name())
            .map_err(|e| ConfigError::Validation(format!("collector '{id}': {e}")))?;
        if self.command.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "collector '{id}': command cannot be empty"
            )));
        }
        if let Some(key) = &self.resource_key
            && key.is_empty()
        {
            return Err(ConfigError::Validation(format!(
                "collector '{id}': resource_key cannot be empty"
            )));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Validation(format!(
                "collector '{id}': timeout must be positive"
            )));
        }
        Ok(())
    }

    /// Build the registry definition, expanding `${VAR}` references.
    pub fn to_definition(&self) -> Result<CollectorDefinition, ConfigError> {
        let argv: Vec<String> = self.command.iter().map(|a| expand_env_vars(a)).collect();
        let env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect();
        let command = CommandCollector::new(argv)
            .map_err(|e| ConfigError::Validation(format!("collector '{}': {e}", self.name)))?
            .with_env(env);

        let mut definition = CollectorDefinition::new(&self.platform, &self.name, command)
            .with_table(self.table_name())
            .with_write_mode(self.mode)
            .with_depends_on(self.depends_on.iter().cloned());
        if let Some(key) = &self.resource_key {
            definition = definition.with_resource_key(key.iter().cloned());
        }
        if let Some(timeout) = self.timeout {
            definition = definition.with_timeout(timeout);
        }
        Ok(definition)
    }
}

/// Validate the collector list and the plan and validator sections that refer
/// to it.
pub(crate) fn validate_sections(
    collectors: &[CollectorConfig],
    plan: &[Selection],
    validators: &[Validator],
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for collector in collectors {
        collector.validate()?;
        if !seen.insert((collector.platform.as_str(), collector.name.as_str())) {
            return Err(ConfigError::Validation(format!(
                "duplicate collector: '{}/{}'",
                collector.platform, collector.name
            )));
        }
    }
    for collector in collectors {
        for dep in &collector.depends_on {
            if !seen.contains(&(collector.platform.as_str(), dep.as_str())) {
                return Err(ConfigError::Validation(format!(
                    "collector '{}/{}' depends on undefined collector '{}'",
                    collector.platform, collector.name, dep
                )));
            }
        }
    }

    for selection in plan {
        if selection.device_groups.is_empty() {
            return Err(ConfigError::Validation(format!(
                "plan entry for platform '{}' has no device groups",
                selection.platform
            )));
        }
        for name in &selection.collectors {
            if !seen.contains(&(selection.platform.as_str(), name.as_str())) {
                return Err(ConfigError::Validation(format!(
                    "plan references undefined collector '{}/{}'",
                    selection.platform, name
                )));
            }
        }
    }

    let mut names = HashSet::new();
    for validator in validators {
        if validator.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "validator name cannot be empty".to_string(),
            ));
        }
        if !names.insert(validator.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate validator name: '{}'",
                validator.name
            )));
        }
        let table = normalize_table_name(&validator.table)
            .map_err(|e| ConfigError::Validation(format!("validator '{}': {e}", validator.name)))?;
        let declared = collectors.iter().any(|collector| {
            collector.resource_key.is_some()
                && normalize_table_name(&collector.table_name()).is_ok_and(|t| t == table)
        });
        if validator.resource_key.is_empty() && !declared {
            return Err(ConfigError::Validation(format!(
                "validator '{}': resource_key is empty and no collector declares one for '{}'",
                validator.name, table
            )));
        }
    }
    Ok(())
}

/// Register every configured collector.
pub fn build_registry(collectors: &[CollectorConfig]) -> Result<CollectorRegistry, ConfigError> {
    let mut registry = CollectorRegistry::new();
    for collector in collectors {
        registry
            .register(collector.to_definition()?)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
    }
    Ok(registry)
}
