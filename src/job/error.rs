//! Error types for provisioning jobs.

use std::fmt;

use thiserror::Error;

use crate::gateway::GatewayError;

/// Why a job was cancelled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CancelReason {
    /// The deadline supervisor fired before the job finished.
    Deadline,
    /// The caller cancelled the job.
    Explicit,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Deadline => "deadline exceeded",
            Self::Explicit => "cancelled by caller",
        })
    }
}

/// Errors a provisioning job can end with.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JobError {
    /// The gateway refused or failed the allocation request.
    #[error("failed to allocate {selector}: {source}")]
    AllocationFailed {
        /// Description of the requested machine.
        selector: String,
        /// Gateway failure.
        #[source]
        source: GatewayError,
    },
    /// The gateway refused or failed the deploy request.
    ///
    /// The machine stays allocated; releasing it is up to the caller.
    #[error("failed to deploy machine {system_id}: {source}")]
    DeployFailed {
        /// Machine that was allocated but not deployed.
        system_id: String,
        /// Gateway failure.
        #[source]
        source: GatewayError,
    },
    /// The job was cancelled before it finished.
    #[error("job cancelled: {reason}")]
    Cancelled {
        /// Deadline or explicit cancellation.
        reason: CancelReason,
    },
    /// The executor shut down while the job was live.
    #[error("job interrupted by executor shutdown")]
    Interrupted,
}

impl JobError {
    /// Returns `true` for [`JobError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
