//! # perf-types
//!
//! Identity and label types shared by the chaosperf crates.
//!
//! - [`Latency`], [`Percent`], [`TestCaseId`] - One point of the test matrix
//! - [`Verb`] - API request verbs, including the aggregate `all` bucket
//! - [`WorkerId`], [`WorkerLabels`], [`ResourceKind`] - Worker identity and ownership labels
//! - [`JobCount`] - Bounded or unbounded number of cycles per worker
//! - [`TypesError`] - Parse and validation errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod labels;
mod verb;

pub use error::TypesError;
pub use ids::{JobCount, Latency, Percent, TestCaseId, WorkerId};
pub use labels::{ResourceKind, WorkerLabels, APP_LABEL, WORKER_ID_LABEL};
pub use verb::Verb;
