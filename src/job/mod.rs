//! The allocate → tag → deploy state machine.
//!
//! A [`ProvisioningJob`] runs on one worker from start to end. Both request
//! shapes share the machine; they only differ in how the machine identity is
//! acquired and in whether the boot payload is rewritten with it.

use tracing::{info, warn};

use crate::gateway::{Gateway, GatewayFuture, MachineHandle, MachineStatus};
use crate::poller::StatePoller;
use crate::request::{MachineSelector, ProvisioningRequest};

mod error;
mod handle;

pub use error::{CancelReason, JobError};
pub use handle::{JobHandle, JobId, JobOutcome, JobPhase, JobState};
pub(crate) use handle::WeakJobHandle;

impl MachineSelector {
    /// Issues the allocation call matching this selector.
    pub fn acquire<'a, G>(&'a self, gateway: &'a G) -> GatewayFuture<'a, MachineHandle>
    where
        G: Gateway + ?Sized,
    {
        match self {
            Self::ById { system_id } => gateway.allocate_by_id(system_id),
            Self::ByResources {
                cpu_count,
                memory_mb,
            } => gateway.allocate_by_resources(*cpu_count, *memory_mb),
        }
    }
}

/// One provisioning lifecycle for one request.
#[derive(Clone, Debug)]
pub struct ProvisioningJob {
    request: ProvisioningRequest,
}

impl ProvisioningJob {
    /// Wraps a validated request.
    #[must_use]
    pub const fn new(request: ProvisioningRequest) -> Self {
        Self { request }
    }

    /// Returns the request this job executes.
    #[must_use]
    pub const fn request(&self) -> &ProvisioningRequest {
        &self.request
    }

    /// Drives the machine to `Deployed`.
    ///
    /// Progress is published on `handle`; its cancellation token is observed
    /// around every poll and after every gateway call, never during one.
    pub(crate) async fn run<G>(
        &self,
        gateway: &G,
        poller: &StatePoller,
        handle: &JobHandle,
    ) -> JobOutcome
    where
        G: Gateway + ?Sized,
    {
        handle.set_phase(JobPhase::Allocating);
        let allocated = self
            .request
            .selector
            .acquire(gateway)
            .await
            .map_err(|source| JobError::AllocationFailed {
                selector: self.request.selector.to_string(),
                source,
            })?;
        let system_id = allocated.system_id;
        info!(%system_id, "allocation accepted");
        ensure_live(handle)?;

        handle.set_phase(JobPhase::WaitAllocated);
        wait_for_status(gateway, poller, handle, &system_id, MachineStatus::Allocated).await?;

        handle.set_phase(JobPhase::Tagging);
        self.apply_tags(gateway, handle, &system_id).await?;

        handle.set_phase(JobPhase::Deploying);
        let payload = self.request.payload_for(&system_id);
        let deployed = gateway
            .deploy(&system_id, payload.as_deref())
            .await
            .map_err(|source| JobError::DeployFailed {
                system_id: system_id.clone(),
                source,
            })?;
        info!(%system_id, "deployment started");
        ensure_live(handle)?;

        handle.set_phase(JobPhase::WaitDeployed);
        let status =
            wait_for_status(gateway, poller, handle, &system_id, MachineStatus::Deployed).await?;

        handle.set_phase(JobPhase::Done);
        info!(%system_id, "machine deployed");
        Ok(MachineHandle {
            system_id,
            status,
            hostname: deployed.hostname.or(allocated.hostname),
        })
    }

    /// Tag failures never fail the job; they are logged and skipped.
    async fn apply_tags<G>(
        &self,
        gateway: &G,
        handle: &JobHandle,
        system_id: &str,
    ) -> Result<(), JobError>
    where
        G: Gateway + ?Sized,
    {
        for tag in &self.request.tags {
            if let Err(err) = gateway
                .create_tag_if_absent(&tag.name, &tag.description)
                .await
            {
                warn!(%system_id, tag = %tag.name, error = %err, "failed to ensure tag exists");
            }
            ensure_live(handle)?;

            if let Err(err) = gateway.add_tag_to_machine(&tag.name, system_id).await {
                warn!(%system_id, tag = %tag.name, error = %err, "failed to tag machine");
            }
            ensure_live(handle)?;
        }
        Ok(())
    }
}

async fn wait_for_status<G>(
    gateway: &G,
    poller: &StatePoller,
    handle: &JobHandle,
    system_id: &str,
    target: MachineStatus,
) -> Result<MachineStatus, JobError>
where
    G: Gateway + ?Sized,
{
    poller
        .wait_until(
            handle.cancel_token(),
            || gateway.get_status(system_id),
            |status| *status == target,
        )
        .await
        .map_err(|_| handle.cancellation_error())
}

fn ensure_live(handle: &JobHandle) -> Result<(), JobError> {
    if handle.cancel_token().is_cancelled() {
        return Err(handle.cancellation_error());
    }
    Ok(())
}
