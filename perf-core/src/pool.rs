//! Fan-out/fan-in of workers for the run and cleanup phases.
//!
//! Each phase moves every worker into its own task and collects them back at
//! a barrier. A panicking task does not break the barrier: the lost worker is
//! rebuilt from its id and the panic is reported after every task returned.

use crate::error::PoolError;
use crate::worker::{CleanupOutcome, Worker};
use perf_types::{JobCount, TestCaseId, WorkerId};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Builds the worker for an id; used at startup and to replace a worker
/// whose task panicked.
pub type WorkerFactory = Arc<dyn Fn(WorkerId) -> Worker + Send + Sync>;

/// Completed cycles per worker of one run phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Completed cycles, by worker.
    pub completed: BTreeMap<WorkerId, u64>,
}

impl RunSummary {
    /// Cycles completed by all workers together.
    pub fn total_cycles(&self) -> u64 {
        self.completed.values().sum()
    }
}

/// Cleanup outcome per worker of one cleanup phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Outcome, by worker.
    pub outcomes: BTreeMap<WorkerId, CleanupOutcome>,
}

impl CleanupSummary {
    /// Every worker finished its sweep without failures.
    pub fn is_clean(&self) -> bool {
        self.outcomes.values().all(CleanupOutcome::is_clean)
    }

    /// Objects deleted by all workers together.
    pub fn deleted(&self) -> usize {
        self.outcomes.values().map(|o| o.deleted).sum()
    }
}

/// Owns the workers between phases.
pub struct WorkerPool {
    workers: Vec<Worker>,
    factory: WorkerFactory,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".into();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into())
}

impl WorkerPool {
    /// Build `count` workers with ids `0..count`.
    pub fn new(count: u32, factory: impl Fn(WorkerId) -> Worker + Send + Sync + 'static) -> Self {
        let factory: WorkerFactory = Arc::new(factory);
        let workers = (0..count).map(|id| factory(WorkerId(id))).collect();
        Self { workers, factory }
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Ids of the parked workers, ascending.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(Worker::id).collect()
    }

    /// Run `jobs` cycles on every worker and wait for all of them.
    pub async fn run_all(
        &mut self,
        jobs: JobCount,
        test_case: TestCaseId,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PoolError> {
        tracing::debug!(workers = self.workers.len(), test_case = %test_case, "run phase started");
        let cancel = cancel.clone();
        let results = self
            .fan_out("run", move |mut worker| {
                let cancel = cancel.clone();
                async move {
                    let completed = worker.run(jobs, test_case, &cancel).await;
                    (worker, completed)
                }
            })
            .await?;

        let summary = RunSummary {
            completed: results.into_iter().collect(),
        };
        tracing::debug!(cycles = summary.total_cycles(), "run phase complete");
        Ok(summary)
    }

    /// Sweep every worker's leftovers and wait for all of them.
    pub async fn cleanup_all(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CleanupSummary, PoolError> {
        tracing::debug!(workers = self.workers.len(), "cleanup phase started");
        let cancel = cancel.clone();
        let results = self
            .fan_out("cleanup", move |mut worker| {
                let cancel = cancel.clone();
                async move {
                    let outcome = worker.cleanup(&cancel).await;
                    (worker, outcome)
                }
            })
            .await?;

        let summary = CleanupSummary {
            outcomes: results.into_iter().collect(),
        };
        tracing::debug!(
            deleted = summary.deleted(),
            clean = summary.is_clean(),
            "cleanup phase complete"
        );
        Ok(summary)
    }

    /// Spawn `job` once per worker and wait for every task.
    async fn fan_out<T, F, Fut>(
        &mut self,
        phase: &'static str,
        job: F,
    ) -> Result<Vec<(WorkerId, T)>, PoolError>
    where
        T: Send + 'static,
        F: Fn(Worker) -> Fut,
        Fut: Future<Output = (Worker, T)> + Send + 'static,
    {
        let expected = self.worker_ids();
        let mut tasks = JoinSet::new();
        for worker in self.workers.drain(..) {
            let id = worker.id();
            let inner = tokio::spawn(job(worker));
            // The outer task only awaits, so it cannot panic and always
            // yields the id back.
            tasks.spawn(async move { (id, inner.await) });
        }

        let mut results = Vec::with_capacity(tasks.len());
        let mut panicked: Vec<(WorkerId, String)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok((worker, value)))) => {
                    results.push((worker.id(), value));
                    self.workers.push(worker);
                }
                Ok((id, Err(e))) => {
                    let message = panic_message(e);
                    tracing::error!(
                        worker = %id,
                        phase,
                        error = %message,
                        "worker task failed, rebuilding worker"
                    );
                    self.workers.push((self.factory)(id));
                    panicked.push((id, message));
                }
                Err(e) => {
                    // The id is lost with the wrapper; `restore` rebuilds it.
                    tracing::error!(phase, error = %e, "worker wrapper task failed");
                }
            }
        }
        self.restore(&expected, phase);
        results.sort_by_key(|(id, _)| *id);

        panicked.sort_by_key(|(id, _)| *id);
        let count = panicked.len();
        match panicked.into_iter().next() {
            Some((worker, message)) => Err(PoolError::WorkerPanicked {
                worker,
                count,
                message,
            }),
            None => Ok(results),
        }
    }

    /// Rebuild every worker of `expected` that did not come back from a
    /// phase. Returns how many were rebuilt.
    fn restore(&mut self, expected: &[WorkerId], phase: &'static str) -> usize {
        let present: BTreeSet<WorkerId> = self.workers.iter().map(Worker::id).collect();
        let missing: Vec<WorkerId> = expected
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect();
        for &id in &missing {
            tracing::error!(worker = %id, phase, "worker did not return, rebuilding worker");
            self.workers.push((self.factory)(id));
        }
        self.workers.sort_by_key(Worker::id);
        missing.len()
    }
}
