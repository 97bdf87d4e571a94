//! Consumers of per-case snapshots.
//!
//! The flow hands every [`CaseReport`] to each registered [`Reporter`] right
//! after the run phase, and the [`FlowReport`] once the matrix is over.
//! Reporter errors are logged by the flow and never stop it.

mod csv;
mod summary;

pub use self::csv::CsvExporter;
pub use self::summary::SummaryPrinter;

use crate::error::ReportError;
use crate::metrics::Snapshot;
use chrono::{DateTime, Local};
use perf_types::{JobCount, TestCaseId};

/// Metrics and timing of one finished test case.
#[derive(Debug, Clone)]
pub struct CaseReport {
    /// Test case.
    pub test_case: TestCaseId,
    /// Metrics taken right after the run phase.
    pub snapshot: Snapshot,
    /// Run phase start.
    pub started_at: DateTime<Local>,
    /// Run phase end.
    pub finished_at: DateTime<Local>,
    /// Workers in the pool.
    pub workers: u32,
    /// Jobs per worker.
    pub jobs: JobCount,
}

/// Every case of one matrix run.
#[derive(Debug, Clone)]
pub struct FlowReport {
    /// Matrix start.
    pub started_at: DateTime<Local>,
    /// Matrix end.
    pub finished_at: DateTime<Local>,
    /// Finished cases, in run order.
    pub cases: Vec<CaseReport>,
    /// A stop request ended the matrix early.
    pub interrupted: bool,
    /// Workers in the pool.
    pub workers: u32,
    /// Jobs per worker.
    pub jobs: JobCount,
}

/// Receives snapshots while the matrix runs.
pub trait Reporter: Send {
    /// Called once per finished test case.
    fn on_case(&mut self, case: &CaseReport) -> Result<(), ReportError>;

    /// Called once after the last test case.
    fn on_finish(&mut self, _report: &FlowReport) -> Result<(), ReportError> {
        Ok(())
    }
}

/// Human-readable duration between two instants, e.g. `1m 5.250s`.
pub(crate) fn format_elapsed(start: DateTime<Local>, end: DateTime<Local>) -> String {
    let elapsed = (end - start).to_std().unwrap_or_default();
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    if secs >= 60 {
        format!("{}m {}.{:03}s", secs / 60, secs % 60, millis)
    } else {
        format!("{secs}.{millis:03}s")
    }
}
