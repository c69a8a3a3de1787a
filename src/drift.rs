//! Drift Detection
//!
//! Compares the two newest generations of a snapshot table, aligning rows by a
//! caller-chosen resource key. Output is sorted by (key, field) so repeated
//! diffs over unchanged data are identical.
//!
//! - [`DriftEngine`]: Computes [`DiffRecord`]s
//! - [`Validator`]: Named diff definitions, run in bulk by [`run_validators`]

mod engine;
mod model;
mod validator;

pub use engine::{DriftEngine, DriftError};
pub use model::{DiffRecord, DiffRequest, DriftReport, Transition};
pub use validator::{ValidationResult, Validator, run_validators};
