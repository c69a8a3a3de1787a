//! Collection Orchestrator
//!
//! Executes an ordered plan of (platform, device group, collector) rows against
//! one run timestamp and writes each result through the snapshot store.
//!
//! - [`Orchestrator`]: Runs plans, sequentially or one task per device group
//! - [`RunReport`]: Per-row [`Outcome`]s in plan order

mod report;
mod runner;

pub use report::{Outcome, OutcomeKind, RowOutcome, RunReport};
pub use runner::{Orchestrator, OrchestratorError, OrchestratorOptions};
