//! Gateway abstraction over the remote machine fleet API.
//!
//! The orchestrator never talks to the network directly. It consumes the
//! logical operations of [`Gateway`], each of which resolves to a value or a
//! [`GatewayError`] sentinel. Implementations convert transport, HTTP and
//! decoding failures into that sentinel before it reaches a job.

use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;

use thiserror::Error;

/// Lifecycle states reported by the remote fleet API.
///
/// The numeric codes follow the MAAS node status table.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MachineStatus {
    /// Enlisted but never commissioned.
    New,
    /// Hardware inventory in progress.
    Commissioning,
    /// Commissioning scripts failed.
    FailedCommissioning,
    /// The machine no longer answers.
    Missing,
    /// Commissioned and free for allocation.
    Ready,
    /// Reserved for a specific use.
    Reserved,
    /// Operating system installed and booted.
    Deployed,
    /// Permanently taken out of service.
    Retired,
    /// Marked broken by an operator.
    Broken,
    /// Operating system installation in progress.
    Deploying,
    /// Reserved for exclusive use by the caller.
    Allocated,
    /// Operating system installation failed.
    FailedDeployment,
    /// Returning to the free pool.
    Releasing,
    /// Release failed.
    FailedReleasing,
    /// Disk wipe in progress.
    DiskErasing,
    /// Disk wipe failed.
    FailedDiskErasing,
    /// Status code this crate does not recognise.
    Unknown(i64),
}

impl MachineStatus {
    /// Maps a remote status code to a [`MachineStatus`].
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            0 => Self::New,
            1 => Self::Commissioning,
            2 => Self::FailedCommissioning,
            3 => Self::Missing,
            4 => Self::Ready,
            5 => Self::Reserved,
            6 => Self::Deployed,
            7 => Self::Retired,
            8 => Self::Broken,
            9 => Self::Deploying,
            10 => Self::Allocated,
            11 => Self::FailedDeployment,
            12 => Self::Releasing,
            13 => Self::FailedReleasing,
            14 => Self::DiskErasing,
            15 => Self::FailedDiskErasing,
            other => Self::Unknown(other),
        }
    }

    /// Returns the remote status code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::New => 0,
            Self::Commissioning => 1,
            Self::FailedCommissioning => 2,
            Self::Missing => 3,
            Self::Ready => 4,
            Self::Reserved => 5,
            Self::Deployed => 6,
            Self::Retired => 7,
            Self::Broken => 8,
            Self::Deploying => 9,
            Self::Allocated => 10,
            Self::FailedDeployment => 11,
            Self::Releasing => 12,
            Self::FailedReleasing => 13,
            Self::DiskErasing => 14,
            Self::FailedDiskErasing => 15,
            Self::Unknown(code) => code,
        }
    }

    /// Returns `true` for the `Failed*` family of statuses.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::FailedCommissioning
                | Self::FailedDeployment
                | Self::FailedReleasing
                | Self::FailedDiskErasing
        )
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::New => "new",
            Self::Commissioning => "commissioning",
            Self::FailedCommissioning => "failed commissioning",
            Self::Missing => "missing",
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::Deployed => "deployed",
            Self::Retired => "retired",
            Self::Broken => "broken",
            Self::Deploying => "deploying",
            Self::Allocated => "allocated",
            Self::FailedDeployment => "failed deployment",
            Self::Releasing => "releasing",
            Self::FailedReleasing => "failed releasing",
            Self::DiskErasing => "disk erasing",
            Self::FailedDiskErasing => "failed disk erasing",
            Self::Unknown(code) => return write!(f, "unknown ({code})"),
        };
        f.write_str(label)
    }
}

/// Snapshot of a remote machine returned by gateway operations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineHandle {
    /// Remote identifier, unique per machine.
    pub system_id: String,
    /// Status reported alongside the snapshot.
    pub status: MachineStatus,
    /// Hostname when the remote API exposes one.
    pub hostname: Option<String>,
}

impl MachineHandle {
    /// Creates a handle without a hostname.
    #[must_use]
    pub fn new(system_id: impl Into<String>, status: MachineStatus) -> Self {
        Self {
            system_id: system_id.into(),
            status,
            hostname: None,
        }
    }
}

/// Named label attachable to machines.
///
/// The name is the identity key: two tags with the same name are the same
/// remote entity regardless of description.
#[derive(Clone, Debug)]
pub struct Tag {
    /// Unique tag name.
    pub name: String,
    /// Free-form description stored as the remote tag comment.
    pub description: String,
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Failure sentinel returned by every gateway operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GatewayError {
    /// The request never produced an HTTP response.
    #[error("transport failure: {message}")]
    Transport {
        /// Description of the connection or timeout failure.
        message: String,
    },
    /// The addressed resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Resource that was addressed (for example `machine m1`).
        resource: String,
    },
    /// The remote API refused the operation.
    #[error("remote API rejected the request with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body returned by the API.
        body: String,
    },
    /// The response could not be decoded.
    #[error("failed to decode response: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },
    /// No machine satisfied the request.
    #[error("no machine available: {message}")]
    Unavailable {
        /// Description of the unmet constraint.
        message: String,
    },
}

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Logical machine lifecycle operations consumed by the orchestrator.
///
/// Implementations are shared read-only across every worker, so they must be
/// `Send + Sync`.
pub trait Gateway: Send + Sync {
    /// Allocates the machine with the given identifier.
    fn allocate_by_id<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, MachineHandle>;

    /// Allocates any machine with at least the requested resources.
    fn allocate_by_resources(&self, cpu_count: u32, memory_mb: u64)
    -> GatewayFuture<'_, MachineHandle>;

    /// Fetches the current status of a machine.
    fn get_status<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, MachineStatus>;

    /// Creates a tag unless one with the same name exists.
    ///
    /// Resolves to `true` when the tag was created and `false` when it was
    /// already present.
    fn create_tag_if_absent<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, bool>;

    /// Attaches a machine to an existing tag.
    fn add_tag_to_machine<'a>(
        &'a self,
        tag_name: &'a str,
        system_id: &'a str,
    ) -> GatewayFuture<'a, ()>;

    /// Starts deploying an operating system onto an allocated machine.
    fn deploy<'a>(
        &'a self,
        system_id: &'a str,
        payload: Option<&'a str>,
    ) -> GatewayFuture<'a, MachineHandle>;

    /// Releases a machine back to the free pool.
    fn release<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, ()>;
}
