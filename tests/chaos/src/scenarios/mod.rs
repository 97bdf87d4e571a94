//! Scenarios, grouped by what they stress.
//!
//! - `matrix` - matrix order, per-case metrics and reports
//! - `cancellation` - one and two stop requests
//! - `condition` - condition lifecycle faults
//! - `worker` - worker CRUD faults and cleanup of leftovers

pub mod cancellation;
pub mod condition;
pub mod matrix;
pub mod worker;
