//! # chaosperf-scenarios
//!
//! End-to-end scenarios for chaosperf.
//!
//! The full test flow runs against an in-memory cluster that can inject
//! failures:
//! - Condition lifecycle faults (rejected, slow, never injected, never gone)
//! - Resource API faults (failed creates, failed verbs, failed lists)
//! - Stop requests during a run
//! - Leftovers from interrupted earlier runs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod harness;

pub mod scenarios;
