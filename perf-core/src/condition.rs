//! Fault-injection condition lifecycle.
//!
//! The agent instantiates one condition per test case from a JSON template,
//! submits it, and blocks until the API reports every record injected. Delete
//! mirrors this: submit, then block until the object is gone.

use crate::api::{ConditionApi, ConditionSpec};
use crate::backoff::{poll_until, retry_on_error, Backoff, PollError};
use crate::error::{ApiError, ConditionError};
use perf_types::TestCaseId;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Condition object template with a fixed name and namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTemplate {
    manifest: Value,
    name: String,
    namespace: String,
}

impl ConditionTemplate {
    /// Validate a template manifest.
    ///
    /// `metadata.name` and a `spec` object are required. A missing
    /// `metadata.namespace` is filled with `default_namespace`.
    pub fn from_value(
        mut manifest: Value,
        default_namespace: &str,
    ) -> Result<Self, ConditionError> {
        if !manifest.get("spec").is_some_and(Value::is_object) {
            return Err(ConditionError::Template("missing spec object".into()));
        }

        let metadata = manifest
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| ConditionError::Template("missing metadata object".into()))?;

        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConditionError::Template("missing metadata.name".into()))?
            .to_string();

        let namespace = match metadata.get("namespace").and_then(Value::as_str) {
            Some(namespace) if !namespace.is_empty() => namespace.to_string(),
            _ => {
                metadata.insert("namespace".into(), Value::String(default_namespace.into()));
                default_namespace.to_string()
            }
        };

        Ok(Self {
            manifest,
            name,
            namespace,
        })
    }

    /// Load a template from a JSON file.
    pub fn from_file(path: &Path, default_namespace: &str) -> Result<Self, ConditionError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConditionError::Template(format!("failed to read {}: {e}", path.display()))
        })?;
        let manifest: Value = serde_json::from_str(&content).map_err(|e| {
            ConditionError::Template(format!("failed to parse {}: {e}", path.display()))
        })?;
        Self::from_value(manifest, default_namespace)
    }

    /// Name shared by every instantiated condition.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace of every instantiated condition.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Creates and deletes fault-injection conditions and waits for them to settle.
pub struct ConditionAgent {
    client: Arc<dyn ConditionApi>,
    template: ConditionTemplate,
    poll_interval: Duration,
    poll_timeout: Duration,
    backoff: Backoff,
}

impl ConditionAgent {
    /// Create an agent.
    pub fn new(
        client: Arc<dyn ConditionApi>,
        template: ConditionTemplate,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            client,
            template,
            poll_interval,
            poll_timeout,
            backoff: Backoff::DEFAULT_BACKOFF,
        }
    }

    /// Copy the template and fill in `spec.delay` and `spec.percent`.
    pub fn instantiate(&self, test_case: TestCaseId) -> ConditionSpec {
        let mut manifest = self.template.manifest.clone();
        if let Some(spec) = manifest.get_mut("spec").and_then(Value::as_object_mut) {
            spec.insert("delay".into(), Value::String(test_case.latency.to_string()));
            spec.insert("percent".into(), Value::from(test_case.percent.value()));
        }
        ConditionSpec {
            name: self.template.name.clone(),
            namespace: self.template.namespace.clone(),
            test_case,
            manifest,
        }
    }

    /// Submit the condition and wait until every record reports injected.
    ///
    /// An existing object with the same name counts as created. A status
    /// without records is not ready yet.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        spec: &ConditionSpec,
    ) -> Result<(), ConditionError> {
        let name = spec.namespaced_name();
        tracing::debug!(
            condition = %name,
            delay = %spec.delay(),
            percent = %spec.percent(),
            "creating condition"
        );

        retry_on_error(&self.backoff, cancel, ApiError::is_transient, || async {
            match self.client.create(spec).await {
                Err(e) if e.is_already_exists() => {
                    tracing::debug!(condition = %name, "condition already exists");
                    Ok(())
                }
                other => other,
            }
        })
        .await
        .map_err(|source| ConditionError::Create {
            name: name.clone(),
            source,
        })?;

        poll_until(self.poll_interval, self.poll_timeout, cancel, || async {
            match self.client.get(&spec.namespace, &spec.name).await {
                Ok(status) => {
                    let failed = status.failed_records();
                    if failed > 0 {
                        tracing::warn!(
                            condition = %name,
                            failed,
                            "condition records failed to inject"
                        );
                    }
                    status.is_injected()
                }
                Err(e) => {
                    tracing::debug!(condition = %name, error = %e, "condition not readable yet");
                    false
                }
            }
        })
        .await
        .map_err(|e| match e {
            PollError::Timeout => ConditionError::ReadyTimeout {
                name: name.clone(),
                timeout: self.poll_timeout,
            },
            PollError::Cancelled => ConditionError::Cancelled { name: name.clone() },
        })?;

        tracing::info!(condition = %name, "condition injected");
        Ok(())
    }

    /// Submit the delete and wait until the object is gone.
    ///
    /// A missing object counts as deleted.
    pub async fn delete(
        &self,
        cancel: &CancellationToken,
        spec: &ConditionSpec,
    ) -> Result<(), ConditionError> {
        let name = spec.namespaced_name();
        tracing::debug!(condition = %name, "deleting condition");

        retry_on_error(&self.backoff, cancel, ApiError::is_transient, || async {
            match self.client.delete(&spec.namespace, &spec.name).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await
        .map_err(|source| ConditionError::Delete {
            name: name.clone(),
            source,
        })?;

        poll_until(self.poll_interval, self.poll_timeout, cancel, || async {
            matches!(
                self.client.get(&spec.namespace, &spec.name).await,
                Err(e) if e.is_not_found()
            )
        })
        .await
        .map_err(|e| match e {
            PollError::Timeout => ConditionError::GoneTimeout {
                name: name.clone(),
                timeout: self.poll_timeout,
            },
            PollError::Cancelled => ConditionError::Cancelled { name: name.clone() },
        })?;

        tracing::info!(condition = %name, "condition deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTarget;
    use crate::api::MockCluster;
    use perf_types::{Latency, Percent, Verb};
    use serde_json::json;

    fn template() -> ConditionTemplate {
        ConditionTemplate::from_value(
            json!({
                "apiVersion": "chaos-mesh.org/v1alpha1",
                "kind": "IOChaos",
                "metadata": { "name": "io-latency" },
                "spec": { "action": "latency", "mode": "all", "volumePath": "/var/run/etcd" }
            }),
            "chaos",
        )
        .unwrap()
    }

    fn agent(cluster: &MockCluster) -> ConditionAgent {
        ConditionAgent::new(
            Arc::new(cluster.clone()),
            template(),
            Duration::from_secs(2),
            Duration::from_secs(60),
        )
    }

    fn case(ms: u64, percent: u8) -> TestCaseId {
        TestCaseId::new(Latency::from_millis(ms), Percent::new(percent).unwrap())
    }

    #[test]
    fn template_requires_name_and_spec() {
        let err = ConditionTemplate::from_value(json!({ "metadata": {}, "spec": {} }), "chaos");
        assert!(matches!(err, Err(ConditionError::Template(_))));
        let err = ConditionTemplate::from_value(json!({ "metadata": { "name": "a" } }), "chaos");
        assert!(matches!(err, Err(ConditionError::Template(_))));
    }

    #[test]
    fn template_keeps_explicit_namespace() {
        let template = ConditionTemplate::from_value(
            json!({ "metadata": { "name": "a", "namespace": "etcd" }, "spec": {} }),
            "chaos",
        )
        .unwrap();
        assert_eq!(template.namespace(), "etcd");
        assert_eq!(template.name(), "a");
    }

    #[test]
    fn template_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iochaos.json");
        std::fs::write(&path, r#"{"metadata":{"name":"io"},"spec":{}}"#).unwrap();
        let template = ConditionTemplate::from_file(&path, "chaos").unwrap();
        assert_eq!(template.namespace(), "chaos");

        std::fs::write(&path, "not json").unwrap();
        assert!(ConditionTemplate::from_file(&path, "chaos").is_err());
    }

    #[test]
    fn instantiate_fills_delay_and_percent() {
        let cluster = MockCluster::new();
        let spec = agent(&cluster).instantiate(case(20, 30));
        assert_eq!(spec.name, "io-latency");
        assert_eq!(spec.namespace, "chaos");
        assert_eq!(spec.manifest["spec"]["delay"], "20ms");
        assert_eq!(spec.manifest["spec"]["percent"], 30);
        assert_eq!(spec.manifest["spec"]["action"], "latency");
        assert_eq!(spec.manifest["metadata"]["namespace"], "chaos");
    }

    #[tokio::test(start_paused = true)]
    async fn create_twice_yields_one_condition() {
        let cluster = MockCluster::new();
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));
        let cancel = CancellationToken::new();

        agent.create(&cancel, &spec).await.unwrap();
        agent.create(&cancel, &spec).await.unwrap();
        assert_eq!(cluster.condition_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_submit_errors_are_retried() {
        let cluster = MockCluster::new();
        cluster.fail_condition_creates(2);
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));

        agent.create(&CancellationToken::new(), &spec).await.unwrap();
        assert_eq!(cluster.call_count(MockTarget::Condition, Verb::Create), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_submit_is_resolved_by_already_exists() {
        let cluster = MockCluster::new();
        cluster.ambiguous_condition_create();
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));

        agent.create(&CancellationToken::new(), &spec).await.unwrap();
        assert_eq!(cluster.condition_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submit_is_not_retried() {
        let cluster = MockCluster::new();
        cluster.reject_conditions();
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));

        let err = agent.create(&CancellationToken::new(), &spec).await.unwrap_err();
        assert!(matches!(err, ConditionError::Create { .. }));
        assert_eq!(cluster.call_count(MockTarget::Condition, Verb::Create), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_injected() {
        let cluster = MockCluster::new();
        cluster.condition_ready_after(3);
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));

        agent.create(&CancellationToken::new(), &spec).await.unwrap();
        assert_eq!(cluster.call_count(MockTarget::Condition, Verb::Get), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn status_without_records_is_not_ready() {
        let cluster = MockCluster::new();
        cluster.condition_unrecorded_for(2);
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));

        agent.create(&CancellationToken::new(), &spec).await.unwrap();
        // Two empty reads, then the first read with an injected record.
        assert_eq!(cluster.call_count(MockTarget::Condition, Verb::Get), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_injected_times_out() {
        let cluster = MockCluster::new();
        cluster.condition_never_ready();
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));

        let err = agent.create(&CancellationToken::new(), &spec).await.unwrap_err();
        assert!(matches!(
            err,
            ConditionError::ReadyTimeout { timeout, .. } if timeout == Duration::from_secs(60)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_of_missing_condition_succeeds() {
        let cluster = MockCluster::new();
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));

        agent.delete(&CancellationToken::new(), &spec).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn delete_waits_until_gone() {
        let cluster = MockCluster::new();
        cluster.condition_delete_lingers(2);
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));
        let cancel = CancellationToken::new();

        agent.create(&cancel, &spec).await.unwrap();
        agent.delete(&cancel, &spec).await.unwrap();
        assert_eq!(cluster.condition_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_that_never_completes_times_out() {
        let cluster = MockCluster::new();
        cluster.condition_never_gone();
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));
        let cancel = CancellationToken::new();

        agent.create(&cancel, &spec).await.unwrap();
        let err = agent.delete(&cancel, &spec).await.unwrap_err();
        assert!(matches!(err, ConditionError::GoneTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_returns_cancelled() {
        let cluster = MockCluster::new();
        cluster.condition_never_ready();
        let agent = agent(&cluster);
        let spec = agent.instantiate(case(10, 10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = agent.create(&cancel, &spec).await.unwrap_err();
        assert!(matches!(err, ConditionError::Cancelled { .. }));
    }
}
