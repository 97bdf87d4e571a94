//! # perf-core
//!
//! Load-and-chaos test flow for a Kubernetes-style resource API.
//!
//! For every (latency, percent) pair of the test matrix the flow:
//! - sweeps leftovers from earlier runs ([`pool::WorkerPool::cleanup_all`])
//! - creates a fault-injection condition and waits for it to be injected ([`condition`])
//! - fans out N workers running CRUD cycles ([`worker`], [`pool`])
//! - snapshots per-verb success rate and latency quantiles ([`metrics`])
//! - drains, deletes the condition and sweeps again
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐  create/delete  ┌──────────────────┐
//!            │   TestFlow   │────────────────►│  ConditionAgent  │──► ConditionApi
//!            └──────┬───────┘                 └──────────────────┘
//!          run_all  │ cleanup_all
//!            ┌──────▼───────┐
//!            │  WorkerPool  │── JoinSet ──► Worker × N ──► ResourceApi
//!            └──────────────┘                   │
//!                                               ▼ record
//!                                         ┌────────────┐ snapshot ┌───────────┐
//!                                         │ Aggregator │─────────►│ Reporters │
//!                                         └────────────┘          └───────────┘
//! ```
//!
//! Stop handling is two-stage, see [`shutdown::Shutdown`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod backoff;
pub mod condition;
pub mod config;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod pool;
pub mod report;
pub mod shutdown;
pub mod worker;

pub use condition::{ConditionAgent, ConditionTemplate};
pub use config::Config;
pub use error::{ApiError, ConditionError, FlowError, PoolError, ReportError};
pub use flow::{FlowSettings, TestFlow};
pub use metrics::{Aggregator, MetricsSink, OperationRecord, Snapshot};
pub use pool::WorkerPool;
pub use shutdown::{Escalation, Shutdown};
pub use worker::{Worker, WorkloadTemplate};
