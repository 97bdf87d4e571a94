//! In-memory cluster for testing.
//!
//! Implements both [`ResourceApi`] and [`ConditionApi`] over shared state,
//! records every call, and lets tests inject failures.

use super::{
    ConditionApi, ConditionPhase, ConditionRecord, ConditionSpec, ConditionStatus, PatchOp,
    Resource, ResourceApi,
};
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use perf_types::{ResourceKind, Verb};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Which API a recorded call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockTarget {
    /// Resource API, for one kind.
    Resource(ResourceKind),
    /// Condition API.
    Condition,
}

/// One recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// API the call went to.
    pub target: MockTarget,
    /// Request verb.
    pub verb: Verb,
    /// Object name, or the label selector for lists.
    pub name: String,
}

type ResourceKey = (ResourceKind, String, String);
type ConditionKey = (String, String);

#[derive(Debug, Default)]
struct MockCondition {
    polls: u32,
    /// Remaining polls before a deleted condition disappears.
    deleting: Option<u32>,
}

/// Mock cluster for testing.
///
/// Cloning shares the underlying state.
#[derive(Debug, Default, Clone)]
pub struct MockCluster {
    inner: Arc<Mutex<MockClusterInner>>,
}

#[derive(Debug, Default)]
struct MockClusterInner {
    resources: BTreeMap<ResourceKey, Resource>,
    conditions: BTreeMap<ConditionKey, MockCondition>,
    next_version: u64,
    calls: Vec<MockCall>,

    op_delay: Option<Duration>,
    spawn_pods: bool,
    resource_create_failures: usize,
    failing_verbs: HashSet<Verb>,
    list_failures: usize,

    condition_create_failures: usize,
    reject_conditions: bool,
    ambiguous_condition_create: bool,
    condition_ready_after: u32,
    condition_never_ready: bool,
    condition_unrecorded_for: u32,
    condition_delete_lingers: u32,
    condition_never_gone: bool,
}

fn server_error(message: &str) -> ApiError {
    ApiError::Status {
        status: 500,
        message: message.to_string(),
    }
}

fn parse_selector(selector: &str) -> Vec<(&str, &str)> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

fn matches_selector(resource: &Resource, selector: &str) -> bool {
    parse_selector(selector)
        .into_iter()
        .all(|(key, value)| resource.labels.get(key).map(String::as_str) == Some(value))
}

fn string_map(value: &serde_json::Value) -> ApiResult<BTreeMap<String, String>> {
    let object = value
        .as_object()
        .ok_or_else(|| ApiError::Status {
            status: 422,
            message: "patch value must be an object".into(),
        })?;
    Ok(object
        .iter()
        .map(|(k, v)| {
            let v = v.as_str().map(String::from).unwrap_or_else(|| v.to_string());
            (k.clone(), v)
        })
        .collect())
}

impl MockCluster {
    /// Create an empty mock cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockClusterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a call and return the configured delay.
    fn enter(&self, target: MockTarget, verb: Verb, name: &str) -> Option<Duration> {
        let mut inner = self.lock();
        inner.calls.push(MockCall {
            target,
            verb,
            name: name.to_string(),
        });
        match target {
            MockTarget::Resource(_) => inner.op_delay,
            MockTarget::Condition => None,
        }
    }

    async fn enter_resource(&self, kind: ResourceKind, verb: Verb, name: &str) {
        if let Some(delay) = self.enter(MockTarget::Resource(kind), verb, name) {
            tokio::time::sleep(delay).await;
        }
    }

    // --- knobs ---

    /// Delay every resource call by `delay` after it is recorded.
    pub fn set_op_delay(&self, delay: Duration) {
        self.lock().op_delay = Some(delay);
    }

    /// Create a labelled pod alongside every created deployment.
    pub fn spawn_pods(&self) {
        self.lock().spawn_pods = true;
    }

    /// Fail the next `times` resource creates with a server error.
    pub fn fail_resource_creates(&self, times: usize) {
        self.lock().resource_create_failures = times;
    }

    /// Fail every call of `verb` on the resource API with a server error.
    pub fn fail_verb(&self, verb: Verb) {
        self.lock().failing_verbs.insert(verb);
    }

    /// Fail the next `times` resource lists with a server error.
    pub fn fail_lists(&self, times: usize) {
        self.lock().list_failures = times;
    }

    /// Fail the next `times` condition creates with a transient error.
    pub fn fail_condition_creates(&self, times: usize) {
        self.lock().condition_create_failures = times;
    }

    /// Reject every condition create with a non-transient error.
    pub fn reject_conditions(&self) {
        self.lock().reject_conditions = true;
    }

    /// Store the first created condition but report a timeout to the caller.
    pub fn ambiguous_condition_create(&self) {
        self.lock().ambiguous_condition_create = true;
    }

    /// Report conditions as injected only after `polls` status reads.
    pub fn condition_ready_after(&self, polls: u32) {
        self.lock().condition_ready_after = polls;
    }

    /// Never report conditions as injected.
    pub fn condition_never_ready(&self) {
        self.lock().condition_never_ready = true;
    }

    /// Report an empty record list for the first `polls` status reads, as a
    /// controller does before it has picked a condition up.
    pub fn condition_unrecorded_for(&self, polls: u32) {
        self.lock().condition_unrecorded_for = polls;
    }

    /// Keep deleted conditions visible for `polls` status reads.
    pub fn condition_delete_lingers(&self, polls: u32) {
        self.lock().condition_delete_lingers = polls;
    }

    /// Never let deleted conditions disappear.
    pub fn condition_never_gone(&self) {
        self.lock().condition_never_gone = true;
    }

    /// Store a pre-existing object, as left behind by an earlier run.
    pub fn insert_resource(&self, mut resource: Resource) {
        let mut inner = self.lock();
        inner.next_version += 1;
        resource.resource_version = Some(inner.next_version.to_string());
        let key = (
            resource.kind,
            resource.namespace.clone(),
            resource.name.clone(),
        );
        inner.resources.insert(key, resource);
    }

    // --- inspection ---

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `verb` to `target`.
    pub fn call_count(&self, target: MockTarget, verb: Verb) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.target == target && call.verb == verb)
            .count()
    }

    /// Number of stored objects of every kind.
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    /// Stored objects of `kind` matching an equality label selector.
    pub fn resources_matching(&self, kind: ResourceKind, selector: &str) -> Vec<Resource> {
        self.lock()
            .resources
            .values()
            .filter(|r| r.kind == kind && matches_selector(r, selector))
            .cloned()
            .collect()
    }

    /// Number of condition objects currently stored.
    pub fn condition_count(&self) -> usize {
        self.lock().conditions.len()
    }
}

#[async_trait]
impl ResourceApi for MockCluster {
    async fn create(&self, resource: &Resource) -> ApiResult<Resource> {
        self.enter_resource(resource.kind, Verb::Create, &resource.name)
            .await;
        let mut inner = self.lock();

        if inner.resource_create_failures > 0 {
            inner.resource_create_failures -= 1;
            return Err(server_error("injected create failure"));
        }
        if inner.failing_verbs.contains(&Verb::Create) {
            return Err(server_error("injected create failure"));
        }

        let key = (
            resource.kind,
            resource.namespace.clone(),
            resource.name.clone(),
        );
        if inner.resources.contains_key(&key) {
            return Err(ApiError::AlreadyExists {
                kind: resource.kind.plural().into(),
                name: resource.name.clone(),
            });
        }

        inner.next_version += 1;
        let mut stored = resource.clone();
        stored.resource_version = Some(inner.next_version.to_string());
        inner.resources.insert(key, stored.clone());

        if inner.spawn_pods && resource.kind == ResourceKind::Deployment {
            inner.next_version += 1;
            let pod = Resource {
                kind: ResourceKind::Pod,
                name: format!("{}-pod", resource.name),
                namespace: resource.namespace.clone(),
                labels: resource.labels.clone(),
                annotations: BTreeMap::new(),
                resource_version: Some(inner.next_version.to_string()),
                spec: serde_json::Value::Null,
            };
            let key = (pod.kind, pod.namespace.clone(), pod.name.clone());
            inner.resources.insert(key, pod);
        }

        Ok(stored)
    }

    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> ApiResult<Resource> {
        self.enter_resource(kind, Verb::Get, name).await;
        let inner = self.lock();
        if inner.failing_verbs.contains(&Verb::Get) {
            return Err(server_error("injected get failure"));
        }
        inner
            .resources
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                kind: kind.plural().into(),
                name: name.into(),
            })
    }

    async fn update(&self, resource: &Resource) -> ApiResult<Resource> {
        self.enter_resource(resource.kind, Verb::Update, &resource.name)
            .await;
        let mut inner = self.lock();
        if inner.failing_verbs.contains(&Verb::Update) {
            return Err(server_error("injected update failure"));
        }

        inner.next_version += 1;
        let version = inner.next_version.to_string();
        let key = (
            resource.kind,
            resource.namespace.clone(),
            resource.name.clone(),
        );
        let stored = inner
            .resources
            .get_mut(&key)
            .ok_or_else(|| ApiError::NotFound {
                kind: resource.kind.plural().into(),
                name: resource.name.clone(),
            })?;
        *stored = resource.clone();
        stored.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &[PatchOp],
    ) -> ApiResult<Resource> {
        self.enter_resource(kind, Verb::Patch, name).await;
        let mut inner = self.lock();
        if inner.failing_verbs.contains(&Verb::Patch) {
            return Err(server_error("injected patch failure"));
        }

        inner.next_version += 1;
        let version = inner.next_version.to_string();
        let stored = inner
            .resources
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| ApiError::NotFound {
                kind: kind.plural().into(),
                name: name.into(),
            })?;

        for op in patch {
            match (op.op.as_str(), op.path.as_str()) {
                ("replace", "/metadata/annotations") => stored.annotations = string_map(&op.value)?,
                ("replace", "/metadata/labels") => stored.labels = string_map(&op.value)?,
                ("replace", "/spec") => stored.spec = op.value.clone(),
                (op, path) => {
                    return Err(ApiError::Status {
                        status: 422,
                        message: format!("unsupported patch {op} {path}"),
                    })
                }
            }
        }
        stored.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> ApiResult<Vec<Resource>> {
        self.enter_resource(kind, Verb::List, label_selector).await;
        let mut inner = self.lock();
        if inner.list_failures > 0 {
            inner.list_failures -= 1;
            return Err(server_error("injected list failure"));
        }
        if inner.failing_verbs.contains(&Verb::List) {
            return Err(server_error("injected list failure"));
        }
        Ok(inner
            .resources
            .values()
            .filter(|r| {
                r.kind == kind && r.namespace == namespace && matches_selector(r, label_selector)
            })
            .cloned()
            .collect())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> ApiResult<()> {
        self.enter_resource(kind, Verb::Delete, name).await;
        let mut inner = self.lock();
        if inner.failing_verbs.contains(&Verb::Delete) {
            return Err(server_error("injected delete failure"));
        }
        inner
            .resources
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound {
                kind: kind.plural().into(),
                name: name.into(),
            })
    }
}

#[async_trait]
impl ConditionApi for MockCluster {
    async fn create(&self, spec: &ConditionSpec) -> ApiResult<()> {
        self.enter(MockTarget::Condition, Verb::Create, &spec.name);
        let mut inner = self.lock();

        if inner.reject_conditions {
            return Err(ApiError::Status {
                status: 400,
                message: "injected rejection".into(),
            });
        }
        if inner.condition_create_failures > 0 {
            inner.condition_create_failures -= 1;
            return Err(ApiError::Status {
                status: 503,
                message: "injected unavailability".into(),
            });
        }

        let key = (spec.namespace.clone(), spec.name.clone());
        if inner.conditions.contains_key(&key) {
            return Err(ApiError::AlreadyExists {
                kind: "iochaos".into(),
                name: spec.name.clone(),
            });
        }
        inner.conditions.insert(key, MockCondition::default());

        if inner.ambiguous_condition_create {
            inner.ambiguous_condition_create = false;
            return Err(ApiError::Timeout("injected timeout after commit".into()));
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> ApiResult<ConditionStatus> {
        self.enter(MockTarget::Condition, Verb::Get, name);
        let mut inner = self.lock();
        let ready_after = inner.condition_ready_after;
        let never_ready = inner.condition_never_ready;
        let unrecorded_for = inner.condition_unrecorded_for;
        let never_gone = inner.condition_never_gone;

        let key = (namespace.to_string(), name.to_string());
        let not_found = || ApiError::NotFound {
            kind: "iochaos".into(),
            name: name.into(),
        };
        let condition = inner.conditions.get_mut(&key).ok_or_else(not_found)?;

        if let Some(remaining) = condition.deleting {
            if remaining == 0 && !never_gone {
                inner.conditions.remove(&key);
                return Err(not_found());
            }
            condition.deleting = Some(remaining.saturating_sub(1));
        }

        condition.polls += 1;
        if condition.polls <= unrecorded_for {
            return Ok(ConditionStatus::default());
        }
        let phase = if !never_ready && condition.polls > ready_after {
            ConditionPhase::Injected
        } else {
            ConditionPhase::Pending
        };
        Ok(ConditionStatus {
            records: vec![ConditionRecord {
                id: format!("{namespace}/target-0"),
                phase,
            }],
        })
    }

    async fn delete(&self, namespace: &str, name: &str) -> ApiResult<()> {
        self.enter(MockTarget::Condition, Verb::Delete, name);
        let mut inner = self.lock();
        let lingers = inner.condition_delete_lingers;
        let never_gone = inner.condition_never_gone;
        let key = (namespace.to_string(), name.to_string());

        let condition = inner
            .conditions
            .get_mut(&key)
            .ok_or_else(|| ApiError::NotFound {
                kind: "iochaos".into(),
                name: name.into(),
            })?;
        if lingers == 0 && !never_gone {
            inner.conditions.remove(&key);
        } else if condition.deleting.is_none() {
            condition.deleting = Some(lingers);
        }
        Ok(())
    }
}
