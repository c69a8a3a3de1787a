//! netdrift - Network State Snapshots and Drift Detection
//!
//! Collects the operational state of network devices into timestamped
//! snapshot tables and reports what changed between the two most recent
//! snapshots of each table. It can be used as a library or run as the
//! standalone `netdrift` executable.
//!
//! # Architecture
//!
//! - **Collectors**: Per-platform collectors behind a (platform, name) registry
//! - **Orchestrator**: Runs a plan of collectors, isolating per-row failures
//! - **Storage**: DuckDB snapshot store with append/replace/fail-if-exists writes
//! - **Drift**: Key-aligned diffs of the two newest generations of a table
//! - **Presentation**: CLI, scheduler and a read-only REST API
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use netdrift::collector::{CollectorDefinition, CollectorRegistry, FnCollector, PlanBuilder};
//! use netdrift::{DriftEngine, IN_MEMORY_PATH, Orchestrator, StorageBuilder, record};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = StorageBuilder::new(IN_MEMORY_PATH).build()?;
//!
//! let mut registry = CollectorRegistry::new();
//! registry.register(CollectorDefinition::new(
//!     "bigip",
//!     "pool_members",
//!     FnCollector::new(|group, _ts| async move {
//!         Ok(vec![record! { "device" => group, "member" => "10.0.0.1", "status" => "up" }])
//!     }),
//! ))?;
//! let plan = PlanBuilder::new(&registry)
//!     .select("bigip", ["lb_dc1"], ["pool_members"])
//!     .build()?;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(registry),
//!     handles.writer.clone(),
//!     handles.admin.clone(),
//! );
//! let t1 = Utc::now();
//! orchestrator.run(&plan, t1).await?;
//! orchestrator.run(&plan, t1 + Duration::minutes(15)).await?;
//!
//! let drift = DriftEngine::new(handles.reader.clone());
//! assert!(drift.diff("bigip_pool_members", ["device", "member"])?.is_empty());
//! # handles.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod drift;
pub mod orchestrator;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use collector::{
    Collector, CollectorDefinition, CollectorError, CollectorRegistry, PlanBuilder, PlanRow,
};
pub use drift::{DiffRecord, DriftEngine, DriftError, DriftReport, Transition, Validator};
pub use orchestrator::{Orchestrator, OrchestratorError, Outcome, RunReport};
pub use scheduler::{RunScheduler, Schedule};
pub use storage::{
    CellValue, IN_MEMORY_PATH, Record, SnapshotReader, SnapshotWriter, StorageAdmin,
    StorageBuilder, StorageError, StorageHandles, WriteMode,
};
