//! Error types for chaosperf identity types.

use thiserror::Error;

/// Errors raised while parsing or validating identity types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// Latency label does not match `^(0ms|[1-9][0-9]*ms)$`
    #[error("{0} is not a valid latency (valid format regex: ^(0ms|[1-9]([0-9]*)ms)$)")]
    InvalidLatency(String),

    /// Percent outside [0, 100] or not an integer
    #[error("{0} is not a valid percent (should be in range [0, 100])")]
    InvalidPercent(String),

    /// Job count is zero or not a number
    #[error("{0} is not a valid job count (expected a positive integer or \"unbounded\")")]
    InvalidJobCount(String),

    /// Unknown API verb
    #[error("unknown verb: {0}")]
    UnknownVerb(String),
}
