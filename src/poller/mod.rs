//! Cancellable fixed-interval polling.
//!
//! Every wait in a provisioning job goes through [`StatePoller::wait_until`]:
//! sleep one interval, fetch, test the predicate, repeat. The cancellation
//! token is checked before each sleep, raced against the sleep itself, and
//! checked again once the fetch returns. A fetch in flight is never
//! interrupted.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default delay between two status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default deadline for a whole provisioning job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Longest deadline a job may carry. Larger values are refused at
/// submission and clamped by the deadline supervisor.
pub const MAX_JOB_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Interval and deadline applied to one job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollingPolicy {
    /// Delay between two status checks.
    pub interval: Duration,
    /// Time after which the deadline supervisor cancels the job.
    pub timeout: Duration,
}

impl PollingPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Returns a copy with a different timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_JOB_TIMEOUT)
    }
}

/// Returned when the cancellation token fires before the predicate holds.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("polling cancelled")]
pub struct Cancelled;

/// Blocking "wait until" primitive with a fixed interval.
#[derive(Clone, Copy, Debug)]
pub struct StatePoller {
    interval: Duration,
}

impl StatePoller {
    /// Creates a poller that waits `interval` before each fetch.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Returns the configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Re-invokes `fetch` every interval until `predicate` holds for its
    /// value or `cancel` fires.
    ///
    /// Fetch errors are logged and retried at the next interval; only the
    /// cancellation token ends the wait without a value.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] once the token has fired.
    pub async fn wait_until<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut fetch: F,
        predicate: P,
    ) -> Result<T, Cancelled>
    where
        T: std::fmt::Debug,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&T) -> bool,
    {
        let mut attempt: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Cancelled),
                () = sleep(self.interval) => {}
            }

            attempt += 1;
            let fetched = fetch().await;
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            match fetched {
                Ok(value) if predicate(&value) => return Ok(value),
                Ok(value) => debug!(attempt, observed = ?value, "target not reached yet"),
                Err(err) => warn!(attempt, error = %err, "status check failed; retrying"),
            }
        }
    }
}
