//! Per-job deadline enforcement.
//!
//! The supervisor owns one timer task, separate from the worker pool, so a
//! deadline fires even while every worker slot is busy. Jobs are registered
//! through a channel and parked in a [`DelayQueue`] as weak references; a
//! handle nobody holds any more simply expires without effect.

use std::future::poll_fn;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, warn};

use crate::job::{CancelReason, JobHandle, WeakJobHandle};
use crate::poller::MAX_JOB_TIMEOUT;

#[derive(Debug)]
struct Registration {
    handle: WeakJobHandle,
    deadline: Instant,
}

/// Timer service that cancels jobs still live at their deadline.
#[derive(Debug)]
pub struct DeadlineSupervisor {
    registrations: mpsc::UnboundedSender<Registration>,
    stop: CancellationToken,
}

impl DeadlineSupervisor {
    /// Spawns the timer task on `runtime`.
    #[must_use]
    pub fn start(runtime: &Handle) -> Self {
        let (registrations, receiver) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        runtime.spawn(run_timer(receiver, stop.clone()));
        Self {
            registrations,
            stop,
        }
    }

    /// Arms a deadline of `timeout` from now for `handle`. Timeouts above
    /// [`MAX_JOB_TIMEOUT`] are clamped to it.
    ///
    /// Returns `false` when the supervisor has been stopped.
    pub fn watch(&self, handle: &JobHandle, timeout: Duration) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        let clamped = timeout.min(MAX_JOB_TIMEOUT);
        if clamped < timeout {
            warn!(
                job_id = %handle.id(),
                requested_secs = timeout.as_secs(),
                limit_secs = MAX_JOB_TIMEOUT.as_secs(),
                "job timeout clamped"
            );
        }
        let Some(deadline) = Instant::now().checked_add(clamped) else {
            return false;
        };
        let registration = Registration {
            handle: handle.downgrade(),
            deadline,
        };
        self.registrations.send(registration).is_ok()
    }

    /// Stops the timer task. Pending deadlines are dropped.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for DeadlineSupervisor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_timer(
    mut registrations: mpsc::UnboundedReceiver<Registration>,
    stop: CancellationToken,
) {
    let mut deadlines: DelayQueue<WeakJobHandle> = DelayQueue::new();
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            received = registrations.recv() => match received {
                Some(registration) => {
                    // An idle wheel stops advancing; start afresh so the new
                    // deadline stays within the wheel's range.
                    if deadlines.is_empty() {
                        deadlines = DelayQueue::new();
                    }
                    let remaining = registration
                        .deadline
                        .saturating_duration_since(Instant::now())
                        .min(MAX_JOB_TIMEOUT);
                    deadlines.insert(registration.handle, remaining);
                }
                None => break,
            },
            Some(expired) = poll_fn(|cx| deadlines.poll_expired(cx)) => {
                expire(&expired.into_inner());
            }
        }
    }
    debug!(pending = deadlines.len(), "deadline supervisor stopped");
}

fn expire(weak: &WeakJobHandle) {
    let Some(handle) = weak.upgrade() else {
        return;
    };
    if handle.cancel_with(CancelReason::Deadline) {
        warn!(job_id = %handle.id(), phase = %handle.phase(), "job deadline exceeded; cancelled");
    }
}
