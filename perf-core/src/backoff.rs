//! Bounded retry and fixed-interval polling.
//!
//! Both helpers watch a [`CancellationToken`] while they sleep, so a forced
//! stop never waits out a backoff or a poll timeout.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Exponential backoff with multiplicative jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts.
    pub steps: u32,
    /// Delay after the first failed attempt.
    pub duration: Duration,
    /// Growth factor applied to the delay after every attempt.
    pub factor: f64,
    /// Up to this fraction of the delay is added at random.
    pub jitter: f64,
}

impl Backoff {
    /// Condition submission: 4 attempts, 10ms growing ×5, 10% jitter.
    pub const DEFAULT_BACKOFF: Backoff = Backoff {
        steps: 4,
        duration: Duration::from_millis(10),
        factor: 5.0,
        jitter: 0.1,
    };

    /// Cleanup listing: 5 attempts, flat 10ms, 10% jitter.
    pub const DEFAULT_RETRY: Backoff = Backoff {
        steps: 5,
        duration: Duration::from_millis(10),
        factor: 1.0,
        jitter: 0.1,
    };

    /// `delay` plus a random share of at most `jitter × delay`.
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra: f64 = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, runs out of
/// attempts, or `cancel` fires. The last error is returned on failure.
pub async fn retry_on_error<T, E, F, Fut>(
    backoff: &Backoff,
    cancel: &CancellationToken,
    retriable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = backoff.duration;
    let mut attempt = 1;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= backoff.steps || !retriable(&err) || cancel.is_cancelled() {
            return Err(err);
        }

        tracing::debug!(attempt, error = %err, "retrying after error");
        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = sleep(backoff.jittered(delay)) => {}
        }
        delay = delay.mul_f64(backoff.factor);
        attempt += 1;
    }
}

/// Why a poll stopped without its condition holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// Timeout elapsed.
    #[error("timed out waiting for the condition")]
    Timeout,
    /// Token was cancelled.
    #[error("cancelled while polling")]
    Cancelled,
}

/// Check `done` every `interval` until it returns true.
///
/// The first check happens one interval after the call. At least one check
/// runs even when `timeout` is shorter than `interval`.
pub async fn poll_until<F, Fut>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut done: F,
) -> Result<(), PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = sleep(interval) => {}
        }
        if done().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(PollError::Timeout);
        }
    }
}
