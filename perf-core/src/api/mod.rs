//! Client seams for the resource-management API and the fault-injection API.
//!
//! Workers talk to a [`ResourceApi`]; the condition agent talks to a
//! [`ConditionApi`]. Both surface "already exists" and "not found" as distinct
//! [`ApiError`](crate::error::ApiError) kinds so callers can normalize them.
//!
//! Implementations:
//! - [`KubeClient`] - JSON over HTTPS against a Kubernetes API server
//! - [`MockCluster`] - in-memory cluster with failure injection, for tests

pub mod kube;
pub mod kubeconfig;
pub mod mock;

pub use kube::KubeClient;
pub use kubeconfig::Kubeconfig;
pub use mock::MockCluster;

use crate::error::ApiResult;
use async_trait::async_trait;
use perf_types::{Latency, Percent, ResourceKind, TestCaseId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A namespaced object of the resource API.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Object kind.
    pub kind: ResourceKind,
    /// Object name.
    pub name: String,
    /// Object namespace.
    pub namespace: String,
    /// Metadata labels.
    pub labels: BTreeMap<String, String>,
    /// Metadata annotations.
    pub annotations: BTreeMap<String, String>,
    /// Server-assigned version, if known.
    pub resource_version: Option<String>,
    /// Kind-specific spec.
    pub spec: serde_json::Value,
}

impl Resource {
    /// `namespace/name`, for logs.
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// One operation of an RFC 6902 JSON patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    /// Operation, e.g. `replace`.
    pub op: String,
    /// JSON pointer to the target.
    pub path: String,
    /// New value.
    pub value: serde_json::Value,
}

impl PatchOp {
    /// A `replace` operation.
    pub fn replace(path: &str, value: serde_json::Value) -> Self {
        Self {
            op: "replace".into(),
            path: path.into(),
            value,
        }
    }
}

/// Resource-management API used by workers.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Create an object; [`AlreadyExists`](crate::error::ApiError::AlreadyExists) if taken.
    async fn create(&self, resource: &Resource) -> ApiResult<Resource>;

    /// Fetch an object by name; [`NotFound`](crate::error::ApiError::NotFound) if absent.
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> ApiResult<Resource>;

    /// Replace an object.
    async fn update(&self, resource: &Resource) -> ApiResult<Resource>;

    /// Apply a JSON patch to an object.
    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &[PatchOp],
    ) -> ApiResult<Resource>;

    /// List objects matching an equality label selector such as `app=nginx,workerId=3`.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> ApiResult<Vec<Resource>>;

    /// Delete an object by name; [`NotFound`](crate::error::ApiError::NotFound) if absent.
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> ApiResult<()>;
}

/// A fault-injection condition instantiated for one test case.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionSpec {
    /// Object name.
    pub name: String,
    /// Object namespace.
    pub namespace: String,
    /// Test case this condition belongs to.
    pub test_case: TestCaseId,
    /// Full object manifest, with `spec.delay` and `spec.percent` filled in.
    pub manifest: serde_json::Value,
}

impl ConditionSpec {
    /// Added delay.
    pub fn delay(&self) -> Latency {
        self.test_case.latency
    }

    /// Affected share of requests.
    pub fn percent(&self) -> Percent {
        self.test_case.percent
    }

    /// `namespace/name`, for logs.
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Injection phase of one tracked record of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionPhase {
    /// Not injected yet.
    Pending,
    /// Fault is active for this record.
    Injected,
    /// Injection failed for this record.
    Failed,
}

impl ConditionPhase {
    /// Map a phase string reported by the API.
    pub fn from_api(phase: &str) -> Self {
        match phase {
            "Injected" => ConditionPhase::Injected,
            "Failed" => ConditionPhase::Failed,
            _ => ConditionPhase::Pending,
        }
    }
}

/// One record tracked by a condition's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionRecord {
    /// Record identity, e.g. the targeted pod.
    pub id: String,
    /// Current phase.
    pub phase: ConditionPhase,
}

/// Observed status of a condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionStatus {
    /// Tracked records.
    pub records: Vec<ConditionRecord>,
}

impl ConditionStatus {
    /// Every record is injected, and there is at least one.
    pub fn is_injected(&self) -> bool {
        !self.records.is_empty()
            && self
                .records
                .iter()
                .all(|record| record.phase == ConditionPhase::Injected)
    }

    /// Number of records in the failed phase.
    pub fn failed_records(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.phase == ConditionPhase::Failed)
            .count()
    }
}

/// Fault-injection API used by the condition agent.
#[async_trait]
pub trait ConditionApi: Send + Sync {
    /// Submit a condition; [`AlreadyExists`](crate::error::ApiError::AlreadyExists) if taken.
    async fn create(&self, spec: &ConditionSpec) -> ApiResult<()>;

    /// Fetch a condition's status; [`NotFound`](crate::error::ApiError::NotFound) if absent.
    async fn get(&self, namespace: &str, name: &str) -> ApiResult<ConditionStatus>;

    /// Delete a condition; [`NotFound`](crate::error::ApiError::NotFound) if absent.
    async fn delete(&self, namespace: &str, name: &str) -> ApiResult<()>;
}
