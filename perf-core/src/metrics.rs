//! Per-operation metrics keyed by (verb, test case).
//!
//! Workers write [`OperationRecord`]s concurrently; the orchestrator reads a
//! [`Snapshot`] per test case. Every record also lands in the [`Verb::All`]
//! bucket, so `all.total` is always the sum of the per-verb totals.
//!
//! Latencies go into a bounded quantile sketch per series, so memory stays
//! flat however long a run lasts. Quantiles carry at most
//! [`SKETCH_RELATIVE_ERROR`] relative error.

use dashmap::DashMap;
use metrics_util::Summary;
use perf_types::{TestCaseId, Verb};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of one API request issued by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationRecord {
    /// Request verb.
    pub verb: Verb,
    /// Whether the request succeeded.
    pub success: bool,
    /// Wall-clock time of the request.
    pub latency: Duration,
    /// Test case the request ran under.
    pub test_case: TestCaseId,
}

/// Write side used by workers, read side used by the orchestrator.
pub trait MetricsSink: Send + Sync {
    /// Add one record.
    fn record(&self, record: OperationRecord);

    /// Counts and latency quantiles of one test case, per reported verb.
    fn snapshot(&self, test_case: &TestCaseId) -> Snapshot;
}

/// A latency quantile in per-mille, e.g. 950 for P95.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantile(u16);

impl Quantile {
    /// Create a quantile from per-mille (0–1000).
    pub const fn per_mille(value: u16) -> Self {
        Self(value)
    }

    /// Quantile as a fraction.
    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / 1000.0
    }

    /// Estimate from a sketch, kept inside the observed range.
    fn estimate(&self, summary: &Summary) -> Option<Duration> {
        if summary.is_empty() {
            return None;
        }
        let seconds = summary
            .quantile(self.as_f64())?
            .clamp(summary.min(), summary.max());
        Duration::try_from_secs_f64(seconds.max(0.0)).ok()
    }
}

impl fmt::Display for Quantile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 10 == 0 {
            write!(f, "P{}", self.0 / 10)
        } else {
            write!(f, "P{}.{}", self.0 / 10, self.0 % 10)
        }
    }
}

/// Quantiles reported for every verb.
pub const QUANTILES: [Quantile; 7] = [
    Quantile::per_mille(100),
    Quantile::per_mille(250),
    Quantile::per_mille(500),
    Quantile::per_mille(750),
    Quantile::per_mille(900),
    Quantile::per_mille(950),
    Quantile::per_mille(990),
];

/// One quantile of a latency distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantileValue {
    /// Which quantile.
    pub quantile: Quantile,
    /// Observed latency, or `None` without samples.
    pub latency: Option<Duration>,
}

/// Counts and latency quantiles of one verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerbStats {
    /// Verb these stats belong to.
    pub verb: Verb,
    /// Requests issued.
    pub total: u64,
    /// Requests that succeeded.
    pub successful: u64,
    /// Latency quantiles, in [`QUANTILES`] order.
    pub quantiles: Vec<QuantileValue>,
}

impl VerbStats {
    fn empty(verb: Verb) -> Self {
        Self {
            verb,
            total: 0,
            successful: 0,
            quantiles: QUANTILES
                .iter()
                .map(|&quantile| QuantileValue {
                    quantile,
                    latency: None,
                })
                .collect(),
        }
    }

    /// Share of successful requests, or `None` without requests.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.successful as f64 / self.total as f64)
    }

    /// Requests that failed.
    pub fn failed(&self) -> u64 {
        self.total - self.successful
    }

    /// Latency at `quantile`, if it was computed and there were samples.
    pub fn latency_at(&self, quantile: Quantile) -> Option<Duration> {
        self.quantiles
            .iter()
            .find(|q| q.quantile == quantile)
            .and_then(|q| q.latency)
    }
}

/// Metrics of one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Test case the snapshot belongs to.
    pub test_case: TestCaseId,
    /// One entry per [`Verb::REPORTED`] verb, in that order.
    pub verbs: Vec<VerbStats>,
}

impl Snapshot {
    /// Stats of one verb.
    pub fn verb(&self, verb: Verb) -> Option<&VerbStats> {
        self.verbs.iter().find(|stats| stats.verb == verb)
    }

    /// Stats of the aggregate bucket.
    pub fn all(&self) -> Option<&VerbStats> {
        self.verb(Verb::All)
    }
}

/// Relative accuracy of reported latency quantiles.
pub const SKETCH_RELATIVE_ERROR: f64 = 0.01;

/// Bucket cap of one latency sketch; at 1% accuracy this spans ~9 decades.
const SKETCH_MAX_BUCKETS: u32 = 1024;

/// Latencies below this many seconds count as zero.
const SKETCH_MIN_SECONDS: f64 = 1.0e-9;

/// Counters and latency sketch of one (verb, test case) series.
struct Series {
    total: AtomicU64,
    successful: AtomicU64,
    latencies: Mutex<Summary>,
}

impl Default for Series {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            latencies: Mutex::new(Summary::new(
                SKETCH_RELATIVE_ERROR,
                SKETCH_MAX_BUCKETS,
                SKETCH_MIN_SECONDS,
            )),
        }
    }
}

impl fmt::Debug for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Series")
            .field("total", &self.total)
            .field("successful", &self.successful)
            .finish_non_exhaustive()
    }
}

impl Series {
    fn observe(&self, success: bool, latency: Duration) {
        // `total` is bumped before `successful` and read after it, so a
        // concurrent snapshot never sees more successes than requests.
        self.total.fetch_add(1, Ordering::SeqCst);
        if success {
            self.successful.fetch_add(1, Ordering::SeqCst);
        }
        self.latencies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add(latency.as_secs_f64());
    }

    /// Approximate bytes held by the latency sketch.
    fn sketch_size(&self) -> usize {
        self.latencies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .estimated_size()
    }

    fn stats(&self, verb: Verb) -> VerbStats {
        let successful = self.successful.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);

        let latencies = self.latencies.lock().unwrap_or_else(|e| e.into_inner());

        VerbStats {
            verb,
            total,
            successful,
            quantiles: QUANTILES
                .iter()
                .map(|&quantile| QuantileValue {
                    quantile,
                    latency: quantile.estimate(&latencies),
                })
                .collect(),
        }
    }
}

/// In-process metrics store.
///
/// Constructed by the caller and shared as `Arc<Aggregator>`; there is no
/// process-global registry.
#[derive(Debug, Default)]
pub struct Aggregator {
    series: DashMap<(Verb, TestCaseId), Arc<Series>>,
}

impl Aggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    fn series(&self, verb: Verb, test_case: TestCaseId) -> Arc<Series> {
        // Clone out of the map so the shard lock is released before sampling.
        self.series
            .entry((verb, test_case))
            .or_default()
            .value()
            .clone()
    }

    /// Test cases with at least one record, in matrix order.
    pub fn test_cases(&self) -> Vec<TestCaseId> {
        let mut cases: Vec<TestCaseId> = self.series.iter().map(|entry| entry.key().1).collect();
        cases.sort();
        cases.dedup();
        cases
    }
}

impl MetricsSink for Aggregator {
    fn record(&self, record: OperationRecord) {
        self.series(record.verb, record.test_case)
            .observe(record.success, record.latency);
        if record.verb != Verb::All {
            self.series(Verb::All, record.test_case)
                .observe(record.success, record.latency);
        }
    }

    fn snapshot(&self, test_case: &TestCaseId) -> Snapshot {
        let verbs = Verb::REPORTED
            .iter()
            .map(|&verb| {
                let series = self
                    .series
                    .get(&(verb, *test_case))
                    .map(|entry| entry.value().clone());
                match series {
                    Some(series) => series.stats(verb),
                    None => VerbStats::empty(verb),
                }
            })
            .collect();
        Snapshot {
            test_case: *test_case,
            verbs,
        }
    }
}
