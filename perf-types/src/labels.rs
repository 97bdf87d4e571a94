//! Ownership labels scoping resources to a single worker.

use crate::ids::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label key carrying the application name.
pub const APP_LABEL: &str = "app";

/// Label key carrying the owning worker's id.
pub const WORKER_ID_LABEL: &str = "workerId";

/// Typed `(app, workerId)` label pair.
///
/// The same value stamps resources at creation and builds the selector used to
/// find them again during cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerLabels {
    /// Application name.
    pub app: String,
    /// Owning worker.
    pub worker_id: WorkerId,
}

impl WorkerLabels {
    /// Create the labels for a worker.
    pub fn new(app: impl Into<String>, worker_id: WorkerId) -> Self {
        Self {
            app: app.into(),
            worker_id,
        }
    }

    /// Labels as a key/value map for object metadata.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL.to_string(), self.app.clone()),
            (WORKER_ID_LABEL.to_string(), self.worker_id.to_string()),
        ])
    }

    /// Equality-based label selector, e.g. `app=nginx,workerId=3`.
    pub fn selector(&self) -> String {
        format!(
            "{}={},{}={}",
            APP_LABEL, self.app, WORKER_ID_LABEL, self.worker_id
        )
    }
}

impl fmt::Display for WorkerLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.selector())
    }
}

/// Kinds of resources a worker creates or sweeps during cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// `apps/v1` Deployment, the object workers operate on.
    Deployment,
    /// `v1` Pod, spawned by deployments and swept during cleanup.
    Pod,
}

impl ResourceKind {
    /// Kinds swept during cleanup, owners before the objects they spawn.
    pub const CLEANUP_ORDER: [ResourceKind; 2] = [ResourceKind::Deployment, ResourceKind::Pod];

    /// Lowercase plural name, as used in REST paths.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "deployments",
            ResourceKind::Pod => "pods",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}
