//! Core library for the Metalcast provisioning orchestrator.
//!
//! The crate drives bare-metal machines through allocate → tag → deploy on a
//! remote fleet API. Jobs run on a bounded worker pool, wait for each status
//! transition with a cancellable poller and are cancelled by a deadline
//! supervisor when they overrun. [`MaasGateway`] talks to a MAAS region
//! controller; [`test_support::MemoryGateway`] stands in for it in tests.

pub mod config;
pub mod executor;
pub mod gateway;
pub mod job;
pub mod maas;
pub mod orchestrator;
pub mod payload;
pub mod poller;
pub mod request;
pub mod supervisor;
pub mod test_support;

pub use config::{ConfigError, MaasConfig, OrchestratorConfig};
pub use executor::{ExecutorError, JobExecutor};
pub use gateway::{Gateway, GatewayError, GatewayFuture, MachineHandle, MachineStatus, Tag};
pub use job::{
    CancelReason, JobError, JobHandle, JobId, JobOutcome, JobPhase, JobState, ProvisioningJob,
};
pub use maas::{MaasError, MaasGateway};
pub use orchestrator::{OrchestratorError, ProvisioningOrchestrator};
pub use payload::{PayloadError, PayloadSource, resolve_boot_payload};
pub use poller::{Cancelled, MAX_JOB_TIMEOUT, PollingPolicy, StatePoller};
pub use request::{
    INSTANCE_ID_PLACEHOLDER, MachineSelector, ProvisioningRequest, ProvisioningRequestBuilder,
    RequestError,
};
pub use supervisor::DeadlineSupervisor;
