//! Error types for perf-core.

use perf_types::{TestCaseId, WorkerId};
use std::time::Duration;

/// Errors returned by the resource and condition API clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Object already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the object.
        kind: String,
        /// Name of the object.
        name: String,
    },

    /// Object not found.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the object.
        kind: String,
        /// Name of the object.
        name: String,
    },

    /// Request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Could not reach the API server.
    #[error("connection failed: {0}")]
    Connection(String),

    /// API server answered with an error status.
    #[error("api returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// Client could not be built or request could not be encoded.
    #[error("invalid request: {0}")]
    Request(String),
}

impl ApiError {
    /// Whether the object was already there.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ApiError::AlreadyExists { .. })
    }

    /// Whether the object was not there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::Connection(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_connect() {
            ApiError::Connection(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if e.is_builder() {
            ApiError::Request(e.to_string())
        } else {
            // Remaining reqwest failures are mid-flight transport errors.
            ApiError::Connection(e.to_string())
        }
    }
}

/// Errors from the condition lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    /// Template could not be loaded or is malformed.
    #[error("invalid condition template: {0}")]
    Template(String),

    /// Submitting the create request failed.
    #[error("failed creating condition {name}: {source}")]
    Create {
        /// Namespaced name of the condition.
        name: String,
        /// Last API error.
        source: ApiError,
    },

    /// Submitting the delete request failed.
    #[error("failed deleting condition {name}: {source}")]
    Delete {
        /// Namespaced name of the condition.
        name: String,
        /// Last API error.
        source: ApiError,
    },

    /// Condition never reported every record as injected.
    #[error("timed out after {timeout:?} waiting for condition {name} to get ready")]
    ReadyTimeout {
        /// Namespaced name of the condition.
        name: String,
        /// Configured poll timeout.
        timeout: Duration,
    },

    /// Condition still existed when the poll timeout elapsed.
    #[error("timed out after {timeout:?} waiting for condition {name} to be deleted")]
    GoneTimeout {
        /// Namespaced name of the condition.
        name: String,
        /// Configured poll timeout.
        timeout: Duration,
    },

    /// Process token was cancelled while waiting.
    #[error("cancelled while waiting for condition {name}")]
    Cancelled {
        /// Namespaced name of the condition.
        name: String,
    },
}

/// Errors from the worker pool barrier.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// At least one worker task panicked; the barrier still waited for all.
    #[error("worker {worker} panicked ({count} worker task(s) failed): {message}")]
    WorkerPanicked {
        /// First worker whose task failed.
        worker: WorkerId,
        /// Number of failed worker tasks.
        count: usize,
        /// Panic payload or join error.
        message: String,
    },
}

/// Errors that abort the whole test matrix.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Condition could not be created for a test case.
    #[error("test case {test_case}: {source}")]
    ConditionCreate {
        /// Test case being set up.
        test_case: TestCaseId,
        /// Underlying condition error.
        source: ConditionError,
    },

    /// Condition could not be deleted for a test case.
    #[error("test case {test_case}: {source}")]
    ConditionDelete {
        /// Test case being torn down.
        test_case: TestCaseId,
        /// Underlying condition error.
        source: ConditionError,
    },

    /// Condition delete failed while unwinding from an earlier error.
    #[error("{delete}: {primary}")]
    Teardown {
        /// Error that started the unwinding.
        primary: Box<FlowError>,
        /// Delete error raised during the unwinding.
        delete: ConditionError,
    },
}

impl FlowError {
    /// Attach a teardown delete error to a primary error, if there was one.
    pub fn chain(primary: FlowError, delete: Option<ConditionError>) -> FlowError {
        match delete {
            Some(delete) => FlowError::Teardown {
                primary: Box::new(primary),
                delete,
            },
            None => primary,
        }
    }
}

/// Errors from report renderers and exporters.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Writing the report failed.
    #[error("I/O error writing report to {path}: {source}")]
    Io {
        /// Destination path or stream name.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result type alias for API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
