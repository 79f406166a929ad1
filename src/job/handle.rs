//! Caller-facing handles for submitted jobs.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{CancelReason, JobError};
use crate::gateway::MachineHandle;

/// Final result of a job.
pub type JobOutcome = Result<MachineHandle, JobError>;

/// Unique identifier assigned to a job at submission.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Externally visible lifecycle state of a job.
///
/// States only move forward; the three terminal states are written exactly
/// once.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum JobState {
    /// Waiting for a free worker slot.
    Pending = 0,
    /// Occupying a worker slot.
    Running = 1,
    /// Machine deployed.
    Done = 2,
    /// Aborted by a gateway failure or by executor shutdown.
    Failed = 3,
    /// Cancelled by the caller or by the deadline supervisor.
    Cancelled = 4,
}

impl JobState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Done,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    /// Returns `true` for `Done`, `Failed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    const fn for_outcome(outcome: &JobOutcome) -> Self {
        match outcome {
            Ok(_) => Self::Done,
            Err(JobError::Cancelled { .. }) => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        })
    }
}

/// Step of the provisioning state machine a job has reached.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum JobPhase {
    /// Not started yet.
    Queued = 0,
    /// Allocation request in flight.
    Allocating = 1,
    /// Polling until the machine reports `Allocated`.
    WaitAllocated = 2,
    /// Ensuring tags exist and attaching the machine.
    Tagging = 3,
    /// Deploy request in flight.
    Deploying = 4,
    /// Polling until the machine reports `Deployed`.
    WaitDeployed = 5,
    /// Machine deployed.
    Done = 6,
}

impl JobPhase {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Queued,
            1 => Self::Allocating,
            2 => Self::WaitAllocated,
            3 => Self::Tagging,
            4 => Self::Deploying,
            5 => Self::WaitDeployed,
            _ => Self::Done,
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Allocating => "allocating",
            Self::WaitAllocated => "waiting for allocation",
            Self::Tagging => "tagging",
            Self::Deploying => "deploying",
            Self::WaitDeployed => "waiting for deployment",
            Self::Done => "done",
        })
    }
}

#[derive(Debug)]
struct JobSlot {
    id: JobId,
    state: AtomicU8,
    phase: AtomicU8,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<JobOutcome>>,
}

/// Future-like handle to a submitted job.
///
/// Clones share the same job. The handle supports waiting for the outcome,
/// non-blocking inspection and cooperative cancellation.
#[derive(Clone, Debug)]
pub struct JobHandle {
    slot: Arc<JobSlot>,
}

impl JobHandle {
    /// Creates a pending handle whose cancellation token is a child of
    /// `parent`.
    pub(crate) fn new(parent: &CancellationToken) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            slot: Arc::new(JobSlot {
                id: JobId::new(),
                state: AtomicU8::new(JobState::Pending as u8),
                phase: AtomicU8::new(JobPhase::Queued as u8),
                cancel: parent.child_token(),
                outcome,
            }),
        }
    }

    /// Returns the job identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.slot.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> JobState {
        JobState::from_u8(self.slot.state.load(Ordering::Acquire))
    }

    /// Returns the last phase the job entered.
    #[must_use]
    pub fn phase(&self) -> JobPhase {
        JobPhase::from_u8(self.slot.phase.load(Ordering::Acquire))
    }

    /// Returns `true` once the job has reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns the outcome without waiting, or `None` while the job is live.
    #[must_use]
    pub fn try_result(&self) -> Option<JobOutcome> {
        self.slot.outcome.borrow().clone()
    }

    /// Waits for the job to finish and returns its outcome.
    ///
    /// Resolves as soon as a terminal state is recorded, including when the
    /// deadline supervisor cancels a job whose worker is still inside a
    /// remote call.
    ///
    /// # Errors
    ///
    /// Returns the [`JobError`] the job ended with.
    pub async fn result(&self) -> JobOutcome {
        let mut receiver = self.slot.outcome.subscribe();
        let Ok(published) = receiver.wait_for(Option::is_some).await else {
            return Err(JobError::Interrupted);
        };
        published
            .as_ref()
            .cloned()
            .unwrap_or_else(|| Err(JobError::Interrupted))
    }

    /// Cancels the job on behalf of the caller.
    ///
    /// Returns `false` when the job had already finished.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::Explicit)
    }

    pub(crate) fn cancel_with(&self, reason: CancelReason) -> bool {
        let cancelled = self.complete(Err(JobError::Cancelled { reason }));
        if cancelled {
            self.slot.cancel.cancel();
        }
        cancelled
    }

    /// Moves the job from `Pending` to `Running`.
    pub(crate) fn start(&self) -> bool {
        self.slot
            .state
            .compare_exchange(
                JobState::Pending as u8,
                JobState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Records the terminal outcome unless another writer got there first.
    pub(crate) fn complete(&self, outcome: JobOutcome) -> bool {
        let target = JobState::for_outcome(&outcome) as u8;
        let won = self
            .slot
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!JobState::from_u8(current).is_terminal()).then_some(target)
            })
            .is_ok();
        if won {
            self.slot.outcome.send_replace(Some(outcome));
        }
        won
    }

    pub(crate) fn set_phase(&self, phase: JobPhase) {
        self.slot.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.slot.cancel
    }

    /// Error reported by a job that observed its cancellation token.
    ///
    /// Whoever cancels a job records the outcome before firing the token, so
    /// the published error wins. A token fired by executor shutdown leaves
    /// no outcome behind and reads as [`JobError::Interrupted`].
    pub(crate) fn cancellation_error(&self) -> JobError {
        match self.try_result() {
            Some(Err(err)) => err,
            Some(Ok(_)) | None => JobError::Interrupted,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakJobHandle {
        WeakJobHandle {
            slot: Arc::downgrade(&self.slot),
        }
    }
}

/// Non-owning reference held by the deadline supervisor.
#[derive(Clone, Debug)]
pub(crate) struct WeakJobHandle {
    slot: Weak<JobSlot>,
}

impl WeakJobHandle {
    pub(crate) fn upgrade(&self) -> Option<JobHandle> {
        self.slot.upgrade().map(|slot| JobHandle { slot })
    }
}
