//! Test-flow orchestrator.
//!
//! Walks the (percent, latency) matrix one test case at a time:
//!
//! ```text
//! PreCleanup → ConditionCreate → Run → Snapshot → Drain → ConditionDelete → PostCleanup
//! ```
//!
//! Only `Run` watches the run token. Every teardown stage watches the process
//! token, so a first stop request still leaves the cluster clean.

use crate::condition::ConditionAgent;
use crate::config::Config;
use crate::error::FlowError;
use crate::metrics::MetricsSink;
use crate::pool::WorkerPool;
use crate::report::{CaseReport, FlowReport, Reporter};
use crate::shutdown::Shutdown;
use chrono::Local;
use perf_types::{JobCount, Latency, Percent, TestCaseId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the flow runs, independent of the clients it runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    /// Test cases in run order.
    pub matrix: Vec<TestCaseId>,
    /// Cycles per worker per test case.
    pub jobs: JobCount,
    /// Workers in the pool.
    pub workers: u32,
    /// Wait between the run phase and the condition delete.
    pub drain: Duration,
}

impl FlowSettings {
    /// Settings from a validated config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            matrix: Self::matrix(&config.flow.latencies, &config.flow.percents),
            jobs: config.workload.jobs_per_worker,
            workers: config.workload.workers,
            drain: config.flow.drain(),
        }
    }

    /// Percents ascending in the outer loop, latencies ascending inside.
    pub fn matrix(latencies: &[Latency], percents: &[Percent]) -> Vec<TestCaseId> {
        let mut latencies = latencies.to_vec();
        latencies.sort();
        latencies.dedup();
        let mut percents = percents.to_vec();
        percents.sort();
        percents.dedup();

        percents
            .iter()
            .flat_map(|&percent| {
                latencies
                    .iter()
                    .map(move |&latency| TestCaseId::new(latency, percent))
            })
            .collect()
    }
}

/// Sequences test cases over a condition agent and a worker pool.
pub struct TestFlow {
    settings: FlowSettings,
    agent: ConditionAgent,
    pool: WorkerPool,
    sink: Arc<dyn MetricsSink>,
    reporters: Vec<Box<dyn Reporter>>,
}

impl std::fmt::Debug for TestFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestFlow")
            .field("settings", &self.settings)
            .field("pool", &self.pool)
            .field("reporters", &self.reporters.len())
            .finish_non_exhaustive()
    }
}

impl TestFlow {
    /// Create a flow. The pool's workers must record into `sink`.
    pub fn new(
        settings: FlowSettings,
        agent: ConditionAgent,
        pool: WorkerPool,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            settings,
            agent,
            pool,
            sink,
            reporters: Vec::new(),
        }
    }

    /// Add a reporter; reporters are called in the order they were added.
    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    /// Settings the flow runs with.
    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Run the whole matrix.
    ///
    /// Stops early, without error, when the run token fires. Returns an error
    /// when a condition could not be created or deleted; teardown of that
    /// test case has run by then.
    pub async fn run(&mut self, shutdown: &Shutdown) -> Result<FlowReport, FlowError> {
        let started_at = Local::now();
        let total = self.settings.matrix.len();
        tracing::info!(
            cases = total,
            workers = self.settings.workers,
            jobs = %self.settings.jobs,
            "test flow started"
        );

        let mut cases = Vec::with_capacity(total);
        let mut interrupted = false;
        for (index, test_case) in self.settings.matrix.clone().into_iter().enumerate() {
            if shutdown.is_stopping() {
                tracing::info!(
                    remaining = total - index,
                    "stop requested, skipping remaining test cases"
                );
                interrupted = true;
                break;
            }
            tracing::info!(test_case = %test_case, "running test case {}/{}", index + 1, total);
            let case = self.run_case(test_case, shutdown).await?;
            cases.push(case);
        }
        // A stop during the last case cut its run phase short.
        interrupted |= shutdown.is_stopping();

        let report = FlowReport {
            started_at,
            finished_at: Local::now(),
            cases,
            interrupted,
            workers: self.settings.workers,
            jobs: self.settings.jobs,
        };
        for reporter in &mut self.reporters {
            if let Err(e) = reporter.on_finish(&report) {
                tracing::error!(error = %e, "reporter failed to finish");
            }
        }
        tracing::info!(
            start = %report.started_at,
            end = %report.finished_at,
            duration = %crate::report::format_elapsed(report.started_at, report.finished_at),
            cases = report.cases.len(),
            interrupted,
            "test flow finished"
        );
        Ok(report)
    }

    async fn run_case(
        &mut self,
        test_case: TestCaseId,
        shutdown: &Shutdown,
    ) -> Result<CaseReport, FlowError> {
        let process = shutdown.process_token();

        self.sweep("pre-cleanup", process).await;

        let spec = self.agent.instantiate(test_case);
        if let Err(source) = self.agent.create(process, &spec).await {
            tracing::error!(test_case = %test_case, error = %source, "failed to create condition");
            let primary = FlowError::ConditionCreate { test_case, source };
            let delete = self.agent.delete(process, &spec).await.err();
            self.sweep("post-cleanup", process).await;
            return Err(FlowError::chain(primary, delete));
        }

        let started_at = Local::now();
        match self
            .pool
            .run_all(self.settings.jobs, test_case, shutdown.run_token())
            .await
        {
            Ok(summary) => tracing::info!(
                test_case = %test_case,
                cycles = summary.total_cycles(),
                "run phase finished"
            ),
            Err(e) => tracing::error!(test_case = %test_case, error = %e, "run phase failed"),
        }
        let finished_at = Local::now();

        let report = CaseReport {
            test_case,
            snapshot: self.sink.snapshot(&test_case),
            started_at,
            finished_at,
            workers: self.settings.workers,
            jobs: self.settings.jobs,
        };
        for reporter in &mut self.reporters {
            if let Err(e) = reporter.on_case(&report) {
                tracing::warn!(test_case = %test_case, error = %e, "reporter failed");
            }
        }

        if !self.settings.drain.is_zero() {
            tracing::info!(
                test_case = %test_case,
                drain = ?self.settings.drain,
                "draining before condition delete"
            );
            tokio::select! {
                _ = process.cancelled() => {}
                _ = tokio::time::sleep(self.settings.drain) => {}
            }
        }

        let deleted = self.agent.delete(process, &spec).await;
        self.sweep("post-cleanup", process).await;
        deleted.map_err(|source| {
            tracing::error!(test_case = %test_case, error = %source, "failed to delete condition");
            FlowError::ConditionDelete { test_case, source }
        })?;

        Ok(report)
    }

    /// Sweep leftovers; failures are logged and never escalated.
    async fn sweep(&mut self, stage: &'static str, cancel: &CancellationToken) {
        match self.pool.cleanup_all(cancel).await {
            Ok(summary) if summary.is_clean() => {
                tracing::debug!(stage, deleted = summary.deleted(), "cleanup complete")
            }
            Ok(summary) => {
                tracing::warn!(stage, deleted = summary.deleted(), "cleanup left objects behind")
            }
            Err(e) => tracing::error!(stage, error = %e, "cleanup failed"),
        }
    }
}
