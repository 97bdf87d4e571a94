//! Two-stage stop handling.
//!
//! The first stop request cancels the *run* token: workers stop starting new
//! cycles and the flow finishes the current test case, including the
//! condition delete and the cleanup sweep. A second request cancels the
//! *process* token as well, which aborts polls, drains and cleanup.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Exit code used when a second stop request forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

/// What a stop request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Run token cancelled; the current test case winds down.
    Graceful,
    /// Process token cancelled; everything stops.
    Forced,
}

/// Pair of cancellation tokens where the run token is a child of the process
/// token.
#[derive(Debug, Clone)]
pub struct Shutdown {
    process: CancellationToken,
    run: CancellationToken,
    requests: Arc<AtomicU32>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Fresh, uncancelled tokens.
    pub fn new() -> Self {
        let process = CancellationToken::new();
        let run = process.child_token();
        Self {
            process,
            run,
            requests: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Token workers and the matrix loop watch.
    pub fn run_token(&self) -> &CancellationToken {
        &self.run
    }

    /// Token cleanup, polls and drains watch.
    pub fn process_token(&self) -> &CancellationToken {
        &self.process
    }

    /// Handle one stop request.
    pub fn escalate(&self) -> Escalation {
        let previous = self.requests.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            tracing::warn!("stop requested, finishing the current test case (repeat to force)");
            self.run.cancel();
            Escalation::Graceful
        } else {
            tracing::warn!("second stop requested, aborting");
            self.process.cancel();
            Escalation::Forced
        }
    }

    /// Release both tokens once the flow has returned.
    pub fn finish(&self) {
        self.process.cancel();
    }

    /// Whether a stop was requested.
    pub fn is_stopping(&self) -> bool {
        self.run.is_cancelled()
    }
}
