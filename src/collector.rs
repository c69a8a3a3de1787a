//! Collector Layer
//!
//! Collectors capture one device group's state at one run timestamp and hand
//! back rows; the orchestrator decides where those rows go.
//!
//! # Architecture
//!
//! - [`Collector`]: Core trait for implementing data collectors
//! - [`CollectorDefinition`]: Immutable (platform, name, table, write mode, ...) entry
//! - [`CollectorRegistry`]: (platform, name) lookup table
//! - [`PlanBuilder`]: Turns selections into ordered [`PlanRow`]s
//! - [`CommandCollector`] / [`FnCollector`]: Built-in collectors
//!
//! # Example
//!
//! ```rust
//! use netdrift::collector::{CollectorDefinition, CollectorRegistry, FnCollector, PlanBuilder};
//! use netdrift::{record, WriteMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = CollectorRegistry::new();
//! registry.register(
//!     CollectorDefinition::new(
//!         "bigip",
//!         "vip_availability",
//!         FnCollector::new(|group, _ts| async move {
//!             Ok(vec![record! { "device_group" => group, "vip" => "web", "status" => "available" }])
//!         }),
//!     )
//!     .with_write_mode(WriteMode::Append)
//!     .with_resource_key(["device_group", "vip"]),
//! )?;
//!
//! let plan = PlanBuilder::new(&registry)
//!     .select("bigip", ["lb_dc1"], ["vip_availability"])
//!     .build()?;
//! assert_eq!(plan.len(), 1);
//! # Ok(())
//! # }
//! ```

mod command;
mod function;
mod plan;
mod registry;
mod traits;

pub use command::{CommandCollector, DEVICE_GROUP_PLACEHOLDER, TIMESTAMP_PLACEHOLDER, parse_rows};
pub use function::FnCollector;
pub use plan::{PlanBuilder, PlanError, PlanRow, Selection};
pub use registry::{CollectorRegistry, RegistryError};
pub use traits::{Collector, CollectorDefinition, CollectorError, default_table_name};
