//! Scenario harness: a test flow wired to an in-memory cluster.
//!
//! Builds the same pieces the binary builds (condition agent, worker pool,
//! aggregator, reporters) with a shared [`MockCluster`] standing in for both
//! API servers, and collects the state the assertions need.

use perf_core::api::MockCluster;
use perf_core::report::{CaseReport, FlowReport, Reporter};
use perf_core::{
    Aggregator, ConditionAgent, ConditionTemplate, FlowSettings, MetricsSink, ReportError,
    Snapshot, TestFlow, Worker, WorkerPool, WorkloadTemplate,
};
use perf_types::{JobCount, Latency, Percent, ResourceKind, TestCaseId, WorkerId, WorkerLabels};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The condition template shipped with the binary.
const CONDITION_TEMPLATE: &str = include_str!("../../../templates/iochaos.json");

/// Namespace workers create deployments in.
pub const NAMESPACE: &str = "perf";

/// Reporter that remembers which cases were reported.
#[derive(Debug, Clone, Default)]
pub struct CaseLog {
    cases: Arc<Mutex<Vec<TestCaseId>>>,
    finished: Arc<Mutex<Option<FlowReport>>>,
}

impl CaseLog {
    /// Reported cases, in order.
    pub fn cases(&self) -> Vec<TestCaseId> {
        self.cases.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The final report, if the flow got that far.
    pub fn finished(&self) -> Option<FlowReport> {
        self.finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Reporter for CaseLog {
    fn on_case(&mut self, case: &CaseReport) -> Result<(), ReportError> {
        self.cases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(case.test_case);
        Ok(())
    }

    fn on_finish(&mut self, report: &FlowReport) -> Result<(), ReportError> {
        *self.finished.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        Ok(())
    }
}

/// One scenario: matrix, fleet size and the cluster they run against.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Shared in-memory cluster; use its knobs to inject failures.
    pub cluster: MockCluster,
    /// Metrics every worker records into.
    pub sink: Arc<Aggregator>,
    /// Matrix and fleet size.
    pub settings: FlowSettings,
    /// Deployment template of the workers.
    pub workload: Arc<WorkloadTemplate>,
    /// Condition poll interval.
    pub poll_interval: Duration,
    /// Condition poll timeout.
    pub poll_timeout: Duration,
}

impl Scenario {
    /// A scenario over `latencies` (ms) × `percents` with no drain.
    pub fn new(latencies: &[u64], percents: &[u8], workers: u32, jobs: JobCount) -> Self {
        let latencies: Vec<Latency> = latencies.iter().copied().map(Latency::from_millis).collect();
        let percents: Vec<Percent> = percents
            .iter()
            .filter_map(|&p| Percent::new(p).ok())
            .collect();
        Self {
            cluster: MockCluster::new(),
            sink: Arc::new(Aggregator::new()),
            settings: FlowSettings {
                matrix: FlowSettings::matrix(&latencies, &percents),
                jobs,
                workers,
                drain: Duration::ZERO,
            },
            workload: Arc::new(WorkloadTemplate {
                app: "nginx".into(),
                image: "nginx:1.14.2".into(),
                replicas: 3,
                namespace: NAMESPACE.into(),
            }),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(60),
        }
    }

    /// Wait this long between each run and its condition delete.
    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.settings.drain = drain;
        self
    }

    /// Change the condition poll interval and timeout.
    pub fn with_polls(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    /// The shipped condition template, defaulting to the `chaos` namespace.
    pub fn condition_template() -> ConditionTemplate {
        let manifest: serde_json::Value = match serde_json::from_str(CONDITION_TEMPLATE) {
            Ok(manifest) => manifest,
            Err(e) => panic!("shipped condition template is not JSON: {e}"),
        };
        match ConditionTemplate::from_value(manifest, "chaos") {
            Ok(template) => template,
            Err(e) => panic!("shipped condition template is invalid: {e}"),
        }
    }

    /// Condition agent talking to the mock cluster.
    pub fn agent(&self) -> ConditionAgent {
        ConditionAgent::new(
            Arc::new(self.cluster.clone()),
            Self::condition_template(),
            self.poll_interval,
            self.poll_timeout,
        )
    }

    /// A single worker outside of any pool.
    pub fn worker(&self, id: u32) -> Worker {
        Worker::new(
            WorkerId(id),
            Arc::new(self.cluster.clone()),
            self.sink.clone(),
            self.workload.clone(),
        )
    }

    /// Worker pool of `settings.workers` workers.
    pub fn pool(&self) -> WorkerPool {
        let cluster = self.cluster.clone();
        let sink: Arc<dyn MetricsSink> = self.sink.clone();
        let workload = self.workload.clone();
        WorkerPool::new(self.settings.workers, move |id| {
            Worker::new(id, Arc::new(cluster.clone()), sink.clone(), workload.clone())
        })
    }

    /// The full flow, reporting into `log`.
    pub fn flow(&self, log: &CaseLog) -> TestFlow {
        tracing::debug!(
            cases = self.settings.matrix.len(),
            workers = self.settings.workers,
            jobs = %self.settings.jobs,
            "building scenario flow"
        );
        TestFlow::new(
            self.settings.clone(),
            self.agent(),
            self.pool(),
            self.sink.clone(),
        )
        .with_reporter(log.clone())
    }

    /// Objects left per worker selector, deployments and pods together.
    pub fn leftovers(&self) -> BTreeMap<String, usize> {
        (0..self.settings.workers)
            .map(|id| {
                let labels = WorkerLabels::new(self.workload.app.clone(), WorkerId(id));
                let selector = labels.selector();
                let count = ResourceKind::CLEANUP_ORDER
                    .iter()
                    .map(|&kind| self.cluster.resources_matching(kind, &selector).len())
                    .sum();
                (selector, count)
            })
            .collect()
    }

    /// Snapshots of every matrix case, in run order.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.settings
            .matrix
            .iter()
            .map(|case| self.sink.snapshot(case))
            .collect()
    }
}
