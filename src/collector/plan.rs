//! Execution plan building.
//!
//! Selections name a platform, its device groups and the wanted collectors.
//! The builder expands declared prerequisites so each one runs before its
//! dependant within the same device group, and fails before any I/O when a
//! collector is unknown or prerequisites form a cycle.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collector::CollectorRegistry;

/// One unit of work for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanRow {
    /// Platform type.
    pub platform: String,
    /// Device group identifier.
    pub device_group: String,
    /// Collector name.
    pub collector: String,
}

impl PlanRow {
    pub fn new(
        platform: impl Into<String>,
        device_group: impl Into<String>,
        collector: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            device_group: device_group.into(),
            collector: collector.into(),
        }
    }
}

impl std::fmt::Display for PlanRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.platform, self.device_group, self.collector)
    }
}

/// User or config selection of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub platform: String,
    pub device_groups: Vec<String>,
    pub collectors: Vec<String>,
}

/// Errors raised while building a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A selected or prerequisite collector is not registered.
    #[error("unknown collector '{name}' for platform '{platform}'")]
    UnknownCollector { platform: String, name: String },

    /// Prerequisites form a cycle.
    #[error("dependency cycle on platform '{platform}': {}", .chain.join(" -> "))]
    DependencyCycle { platform: String, chain: Vec<String> },
}

/// Builder for an ordered, duplicate-free list of plan rows.
pub struct PlanBuilder<'a> {
    registry: &'a CollectorRegistry,
    selections: Vec<Selection>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(registry: &'a CollectorRegistry) -> Self {
        Self {
            registry,
            selections: Vec::new(),
        }
    }

    /// Add a selection.
    pub fn select<G, C>(mut self, platform: impl Into<String>, device_groups: G, collectors: C) -> Self
    where
        G: IntoIterator,
        G::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        self.selections.push(Selection {
            platform: platform.into(),
            device_groups: device_groups.into_iter().map(Into::into).collect(),
            collectors: collectors.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Add several prepared selections.
    pub fn selections(mut self, selections: impl IntoIterator<Item = Selection>) -> Self {
        self.selections.extend(selections);
        self
    }

    /// Build the plan.
    ///
    /// Rows are grouped by device group in selection order; within a group the
    /// collectors follow prerequisite order.
    pub fn build(self) -> Result<Vec<PlanRow>, PlanError> {
        let mut plan = Vec::new();
        let mut seen = HashSet::new();

        for selection in &self.selections {
            let order = self.execution_order(&selection.platform, &selection.collectors)?;
            for group in &selection.device_groups {
                for name in &order {
                    let row = PlanRow::new(&selection.platform, group, name);
                    if seen.insert(row.clone()) {
                        plan.push(row);
                    }
                }
            }
        }

        tracing::debug!(rows = plan.len(), "Execution plan built");
        Ok(plan)
    }

    /// Collectors of one platform with prerequisites first, without repeats.
    fn execution_order(&self, platform: &str, names: &[String]) -> Result<Vec<String>, PlanError> {
        let mut ordered = Vec::new();
        let mut visiting = Vec::new();
        for name in names {
            self.visit(platform, name, &mut visiting, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        platform: &str,
        name: &str,
        visiting: &mut Vec<String>,
        ordered: &mut Vec<String>,
    ) -> Result<(), PlanError> {
        if ordered.iter().any(|n| n == name) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|n| n == name) {
            let mut chain = visiting[pos..].to_vec();
            chain.push(name.to_string());
            return Err(PlanError::DependencyCycle {
                platform: platform.to_string(),
                chain,
            });
        }

        let definition =
            self.registry
                .resolve(platform, name)
                .map_err(|_| PlanError::UnknownCollector {
                    platform: platform.to_string(),
                    name: name.to_string(),
                })?;

        visiting.push(name.to_string());
        for dependency in definition.depends_on() {
            self.visit(platform, dependency, visiting, ordered)?;
        }
        visiting.pop();
        ordered.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorDefinition, FnCollector};

    fn registry(defs: &[(&str, &str, &[&str])]) -> CollectorRegistry {
        let mut registry = CollectorRegistry::new();
        for (platform, name, deps) in defs {
            registry
                .register(
                    CollectorDefinition::new(
                        *platform,
                        *name,
                        FnCollector::new(|_, _| async { Ok(Vec::new()) }),
                    )
                    .with_depends_on(deps.iter().copied()),
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_plan_groups_by_device_group() {
        let registry = registry(&[
            ("bigip", "vip_availability", &[]),
            ("bigip", "pool_availability", &[]),
        ]);
        let plan = PlanBuilder::new(&registry)
            .select("bigip", ["lb_dc1", "lb_dc2"], ["vip_availability", "pool_availability"])
            .build()
            .unwrap();

        let rendered: Vec<String> = plan.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "bigip/lb_dc1/vip_availability",
                "bigip/lb_dc1/pool_availability",
                "bigip/lb_dc2/vip_availability",
                "bigip/lb_dc2/pool_availability",
            ]
        );
    }

    #[test]
    fn test_dependencies_run_first_once() {
        let registry = registry(&[
            ("meraki", "organizations", &[]),
            ("meraki", "org_networks", &["organizations"]),
            ("meraki", "network_devices", &["org_networks", "organizations"]),
        ]);
        let plan = PlanBuilder::new(&registry)
            .select("meraki", ["cloud"], ["network_devices", "organizations"])
            .build()
            .unwrap();

        let names: Vec<&str> = plan.iter().map(|r| r.collector.as_str()).collect();
        assert_eq!(names, vec!["organizations", "org_networks", "network_devices"]);
    }

    #[test]
    fn test_unknown_collector_fails_fast() {
        let registry = registry(&[("bigip", "arp_table", &["missing"])]);
        let err = PlanBuilder::new(&registry)
            .select("bigip", ["lb"], ["arp_table"])
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownCollector { ref name, .. } if name == "missing"));

        let err = PlanBuilder::new(&registry)
            .select("cisco.ios.ios", ["access"], ["arp_table"])
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownCollector { .. }));
    }

    #[test]
    fn test_dependency_cycle_detected() {
        let registry = registry(&[
            ("nxos", "a", &["b"]),
            ("nxos", "b", &["c"]),
            ("nxos", "c", &["a"]),
        ]);
        let err = PlanBuilder::new(&registry)
            .select("nxos", ["core"], ["a"])
            .build()
            .unwrap_err();
        match err {
            PlanError::DependencyCycle { chain, .. } => assert_eq!(chain, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_rows_removed() {
        let registry = registry(&[("ios", "cam_table", &[])]);
        let plan = PlanBuilder::new(&registry)
            .select("ios", ["access", "access"], ["cam_table"])
            .select("ios", ["access"], ["cam_table"])
            .build()
            .unwrap();
        assert_eq!(plan, vec![PlanRow::new("ios", "access", "cam_table")]);
    }
}
