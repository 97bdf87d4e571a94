//! A simulated API client running CRUD cycles against deployments.
//!
//! Each cycle is `create → get → update → patch → list → delete` on one
//! deployment. Every request is timed and recorded; failures are downgraded
//! to metrics and the cycle carries on with what it still owns.

use crate::api::{PatchOp, Resource, ResourceApi};
use crate::backoff::{retry_on_error, Backoff};
use crate::config::WorkloadConfig;
use crate::metrics::{MetricsSink, OperationRecord};
use perf_types::{JobCount, ResourceKind, TestCaseId, Verb, WorkerId, WorkerLabels};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shape of the deployments workers create.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadTemplate {
    /// `app` label value and name prefix.
    pub app: String,
    /// Container image.
    pub image: String,
    /// Replica count.
    pub replicas: u32,
    /// Namespace deployments are created in.
    pub namespace: String,
}

impl WorkloadTemplate {
    /// Template from the workload section and the target namespace.
    pub fn from_config(config: &WorkloadConfig, namespace: &str) -> Self {
        Self {
            app: config.app.clone(),
            image: config.image.clone(),
            replicas: config.replicas,
            namespace: namespace.to_string(),
        }
    }

    /// A deployment carrying the worker's labels on the object, its selector
    /// and its pod template.
    pub fn deployment(&self, name: &str, labels: &WorkerLabels) -> Resource {
        let labels = labels.to_map();
        Resource {
            kind: ResourceKind::Deployment,
            name: name.to_string(),
            namespace: self.namespace.clone(),
            labels: labels.clone(),
            annotations: BTreeMap::new(),
            resource_version: None,
            spec: json!({
                "replicas": self.replicas,
                "selector": { "matchLabels": labels },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "containers": [{
                            "name": self.app,
                            "image": self.image,
                            "ports": [{ "containerPort": 80 }]
                        }]
                    }
                }
            }),
        }
    }
}

/// Result of one worker's cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Objects deleted.
    pub deleted: usize,
    /// Deletes that failed for reasons other than "not found".
    pub failed: usize,
    /// Kinds whose listing failed after retries.
    pub list_failures: usize,
    /// The token fired before the sweep finished.
    pub interrupted: bool,
}

impl CleanupOutcome {
    /// Every listed object was removed and nothing was skipped.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.list_failures == 0 && !self.interrupted
    }
}

/// One simulated client identity.
///
/// Driven by a single task at a time; the pool moves it into the task and
/// receives it back.
pub struct Worker {
    id: WorkerId,
    labels: WorkerLabels,
    client: Arc<dyn ResourceApi>,
    sink: Arc<dyn MetricsSink>,
    template: Arc<WorkloadTemplate>,
    owned: Option<Resource>,
    cleanup_retry: Backoff,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("labels", &self.labels)
            .field("owned", &self.owned.as_ref().map(|r| r.name.as_str()))
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Create a worker.
    pub fn new(
        id: WorkerId,
        client: Arc<dyn ResourceApi>,
        sink: Arc<dyn MetricsSink>,
        template: Arc<WorkloadTemplate>,
    ) -> Self {
        Self {
            id,
            labels: WorkerLabels::new(template.app.clone(), id),
            client,
            sink,
            template,
            owned: None,
            cleanup_retry: Backoff::DEFAULT_RETRY,
        }
    }

    /// Worker identity.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Labels stamped on everything this worker creates.
    pub fn labels(&self) -> &WorkerLabels {
        &self.labels
    }

    /// Resource currently owned, if any.
    pub fn owned(&self) -> Option<&Resource> {
        self.owned.as_ref()
    }

    /// Deterministic name of the deployment of one cycle.
    pub fn resource_name(&self, cycle: u64) -> String {
        format!("{}-{}-{}", self.template.app, self.id, cycle)
    }

    fn observe(&self, verb: Verb, success: bool, started: Instant, test_case: TestCaseId) {
        self.sink.record(OperationRecord {
            verb,
            success,
            latency: started.elapsed(),
            test_case,
        });
    }

    /// Run cycles until `jobs` are done or `cancel` fires.
    ///
    /// The token is checked before each cycle; a started cycle always
    /// finishes. Returns the number of completed cycles.
    pub async fn run(
        &mut self,
        jobs: JobCount,
        test_case: TestCaseId,
        cancel: &CancellationToken,
    ) -> u64 {
        tracing::debug!(worker = %self.id, test_case = %test_case, "worker started");
        let mut completed = 0;
        while jobs.allows(completed) {
            if cancel.is_cancelled() {
                tracing::debug!(worker = %self.id, completed, "stop signal received, exiting run");
                break;
            }
            self.run_cycle(completed, test_case).await;
            completed += 1;
            // In-memory clients never suspend; give the token a chance to be seen.
            tokio::task::yield_now().await;
        }
        tracing::debug!(worker = %self.id, completed, "worker done");
        completed
    }

    /// One `create → get → update → patch → list → delete` cycle.
    ///
    /// An existing deployment with the same name is adopted and its create is
    /// not recorded. Without an owned deployment only `list` runs.
    pub async fn run_cycle(&mut self, cycle: u64, test_case: TestCaseId) {
        let desired = self.template.deployment(&self.resource_name(cycle), &self.labels);
        let ns = self.template.namespace.clone();

        let started = Instant::now();
        match self.client.create(&desired).await {
            Ok(created) => {
                self.observe(Verb::Create, true, started, test_case);
                tracing::debug!(
                    worker = %self.id,
                    deployment = %created.name,
                    "created deployment"
                );
                self.owned = Some(created);
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(
                    worker = %self.id,
                    deployment = %desired.name,
                    "deployment already exists, adopting"
                );
                self.owned = Some(desired);
            }
            Err(e) => {
                self.observe(Verb::Create, false, started, test_case);
                tracing::warn!(
                    worker = %self.id,
                    deployment = %desired.name,
                    error = %e,
                    "failed to create deployment"
                );
            }
        }

        if let Some(owned) = self.owned.clone() {
            let started = Instant::now();
            match self.client.get(owned.kind, &ns, &owned.name).await {
                Ok(got) => {
                    self.observe(Verb::Get, true, started, test_case);
                    self.owned = Some(got);
                }
                Err(e) => {
                    self.observe(Verb::Get, false, started, test_case);
                    tracing::warn!(
                        worker = %self.id,
                        deployment = %owned.name,
                        error = %e,
                        "failed to get deployment"
                    );
                }
            }
        }

        if let Some(owned) = self.owned.clone() {
            let mut changed = owned;
            changed.annotations = BTreeMap::from([("updated".to_string(), "true".to_string())]);
            let started = Instant::now();
            match self.client.update(&changed).await {
                Ok(updated) => {
                    self.observe(Verb::Update, true, started, test_case);
                    self.owned = Some(updated);
                }
                Err(e) => {
                    self.observe(Verb::Update, false, started, test_case);
                    tracing::warn!(
                        worker = %self.id,
                        deployment = %changed.name,
                        error = %e,
                        "failed to update deployment"
                    );
                }
            }
        }

        if let Some(owned) = self.owned.clone() {
            let patch = [PatchOp::replace(
                "/metadata/annotations",
                json!({ "patched": "true" }),
            )];
            let started = Instant::now();
            match self.client.patch(owned.kind, &ns, &owned.name, &patch).await {
                Ok(patched) => {
                    self.observe(Verb::Patch, true, started, test_case);
                    self.owned = Some(patched);
                }
                Err(e) => {
                    self.observe(Verb::Patch, false, started, test_case);
                    tracing::warn!(
                        worker = %self.id,
                        deployment = %owned.name,
                        error = %e,
                        "failed to patch deployment"
                    );
                }
            }
        }

        let selector = self.labels.selector();
        let started = Instant::now();
        match self.client.list(ResourceKind::Deployment, &ns, &selector).await {
            Ok(listed) => {
                self.observe(Verb::List, true, started, test_case);
                tracing::debug!(worker = %self.id, count = listed.len(), "listed deployments");
            }
            Err(e) => {
                self.observe(Verb::List, false, started, test_case);
                tracing::warn!(worker = %self.id, error = %e, "failed to list deployments");
            }
        }

        if let Some(owned) = self.owned.take() {
            let started = Instant::now();
            match self.client.delete(owned.kind, &ns, &owned.name).await {
                Ok(()) => {
                    self.observe(Verb::Delete, true, started, test_case);
                    tracing::debug!(
                        worker = %self.id,
                        deployment = %owned.name,
                        "deleted deployment"
                    );
                }
                Err(e) => {
                    // Left for the cleanup sweep, which finds it by label.
                    self.observe(Verb::Delete, false, started, test_case);
                    tracing::warn!(
                        worker = %self.id,
                        deployment = %owned.name,
                        error = %e,
                        "failed to delete deployment"
                    );
                }
            }
        }
    }

    /// Delete every deployment and pod carrying this worker's labels.
    ///
    /// Listing is retried while `cancel` has not fired; "not found" on delete
    /// is ignored. The token is checked between deletes. Nothing here is
    /// recorded as a metric.
    pub async fn cleanup(&mut self, cancel: &CancellationToken) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();
        let ns = self.template.namespace.clone();
        let selector = self.labels.selector();

        for kind in ResourceKind::CLEANUP_ORDER {
            if cancel.is_cancelled() {
                outcome.interrupted = true;
                break;
            }

            let listed = retry_on_error(
                &self.cleanup_retry,
                cancel,
                |_| !cancel.is_cancelled(),
                || self.client.list(kind, &ns, &selector),
            )
            .await;
            let remaining = match listed {
                Ok(remaining) => remaining,
                Err(e) => {
                    outcome.list_failures += 1;
                    tracing::error!(
                        worker = %self.id,
                        kind = %kind,
                        error = %e,
                        "failed to list leftovers for cleanup"
                    );
                    continue;
                }
            };

            if remaining.is_empty() {
                tracing::debug!(worker = %self.id, kind = %kind, "no leftovers");
                continue;
            }
            tracing::debug!(
                worker = %self.id,
                kind = %kind,
                count = remaining.len(),
                "cleaning up leftovers"
            );

            for resource in remaining {
                if cancel.is_cancelled() {
                    tracing::debug!(worker = %self.id, "stop signal received, exiting cleanup");
                    outcome.interrupted = true;
                    return outcome;
                }
                match self.client.delete(kind, &resource.namespace, &resource.name).await {
                    Ok(()) => outcome.deleted += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        outcome.failed += 1;
                        tracing::error!(
                            worker = %self.id,
                            kind = %kind,
                            name = %resource.name,
                            error = %e,
                            "failed to delete leftover"
                        );
                    }
                }
            }
        }

        if outcome.is_clean() {
            self.owned = None;
        }
        outcome
    }
}
