//! Caller-facing provisioning API.
//!
//! [`ProvisioningOrchestrator`] owns the worker pool and the deadline
//! supervisor for one gateway. Every submission validates the request,
//! queues a job and arms its deadline before returning the handle.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::executor::{ExecutorError, JobExecutor};
use crate::gateway::{Gateway, GatewayError, Tag};
use crate::job::{JobHandle, JobOutcome, ProvisioningJob};
use crate::poller::{MAX_JOB_TIMEOUT, PollingPolicy};
use crate::request::{ProvisioningRequest, RequestError};
use crate::supervisor::DeadlineSupervisor;

/// Errors raised when building an orchestrator or submitting a request.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrchestratorError {
    /// The request failed validation.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The worker pool refused the job.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Runs provisioning jobs against one gateway with bounded concurrency and
/// per-job deadlines.
#[derive(Debug)]
pub struct ProvisioningOrchestrator<G: ?Sized> {
    gateway: Arc<G>,
    executor: JobExecutor<G>,
    supervisor: DeadlineSupervisor,
    policy: PollingPolicy,
}

impl<G> ProvisioningOrchestrator<G>
where
    G: Gateway + ?Sized + 'static,
{
    /// Creates an orchestrator with `workers` slots and a default policy.
    /// A default timeout above [`MAX_JOB_TIMEOUT`] is clamped to it.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Executor`] outside a Tokio runtime or
    /// when `workers` is zero.
    pub fn new(
        gateway: Arc<G>,
        workers: usize,
        requested: PollingPolicy,
    ) -> Result<Self, OrchestratorError> {
        let policy = requested.with_timeout(requested.timeout.min(MAX_JOB_TIMEOUT));
        let runtime = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
        let executor = JobExecutor::new(Arc::clone(&gateway), workers)?;
        let supervisor = DeadlineSupervisor::start(&runtime);
        info!(
            workers,
            poll_interval_secs = policy.interval.as_secs(),
            job_timeout_secs = policy.timeout.as_secs(),
            "provisioning orchestrator ready"
        );
        Ok(Self {
            gateway,
            executor,
            supervisor,
            policy,
        })
    }

    /// Creates an orchestrator from loaded configuration.
    ///
    /// # Errors
    ///
    /// See [`ProvisioningOrchestrator::new`].
    pub fn from_config(
        gateway: Arc<G>,
        config: &OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        Self::new(gateway, config.workers, config.polling_policy())
    }

    /// Returns the policy applied to requests without their own.
    #[must_use]
    pub const fn default_policy(&self) -> PollingPolicy {
        self.policy
    }

    /// Returns the gateway shared by every job.
    #[must_use]
    pub const fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Queues a prepared request.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Request`] for an invalid request and
    /// [`OrchestratorError::Executor`] after shutdown.
    pub fn submit(&self, request: ProvisioningRequest) -> Result<JobHandle, OrchestratorError> {
        request.validate()?;
        let policy = request.policy.unwrap_or(self.policy);
        let handle = self
            .executor
            .submit(ProvisioningJob::new(request), policy.interval)?;
        if !self.supervisor.watch(&handle, policy.timeout) {
            warn!(
                job_id = %handle.id(),
                "deadline supervisor unavailable; job has no deadline"
            );
        }
        Ok(handle)
    }

    /// Provisions the machine identified by `system_id`.
    ///
    /// # Errors
    ///
    /// See [`ProvisioningOrchestrator::submit`].
    pub fn submit_by_id(
        &self,
        system_id: &str,
        payload: Option<String>,
        tags: Vec<Tag>,
        timeout: Option<Duration>,
    ) -> Result<JobHandle, OrchestratorError> {
        let request = ProvisioningRequest::by_id(system_id)
            .payload(payload)
            .tags(tags)
            .policy(self.policy_with(timeout))
            .build()?;
        self.submit(request)
    }

    /// Provisions any free machine with at least `cpu_count` cores and
    /// `memory_mb` of memory. Every `<INSTANCE_ID>` in `payload` is replaced
    /// with the allocated machine's identifier.
    ///
    /// # Errors
    ///
    /// See [`ProvisioningOrchestrator::submit`].
    pub fn submit_by_resources(
        &self,
        cpu_count: u32,
        memory_mb: u64,
        payload: Option<String>,
        tags: Vec<Tag>,
        timeout: Option<Duration>,
    ) -> Result<JobHandle, OrchestratorError> {
        let request = ProvisioningRequest::by_resources(cpu_count, memory_mb)
            .payload(payload)
            .tags(tags)
            .policy(self.policy_with(timeout))
            .build()?;
        self.submit(request)
    }

    /// Cancels a job. Returns `false` when it had already finished.
    pub fn cancel(&self, handle: &JobHandle) -> bool {
        let cancelled = handle.cancel();
        if cancelled {
            info!(job_id = %handle.id(), phase = %handle.phase(), "job cancelled by caller");
        }
        cancelled
    }

    /// Waits for a job to finish.
    ///
    /// # Errors
    ///
    /// Returns the [`crate::job::JobError`] the job ended with.
    pub async fn await_result(&self, handle: &JobHandle) -> JobOutcome {
        handle.result().await
    }

    /// Releases a machine back to the pool.
    ///
    /// Jobs never release on failure; this is the caller's cleanup path.
    ///
    /// # Errors
    ///
    /// Returns the [`GatewayError`] reported by the gateway.
    pub async fn release(&self, system_id: &str) -> Result<(), GatewayError> {
        self.gateway.release(system_id).await?;
        info!(%system_id, "machine released");
        Ok(())
    }

    /// Stops accepting work, signals every live job and stops the deadline
    /// timer.
    pub fn shutdown(&self) {
        self.executor.shutdown();
        self.supervisor.stop();
    }

    /// Waits until every worker task has exited.
    pub async fn wait_idle(&self) {
        self.executor.wait_idle().await;
    }

    /// Number of jobs currently holding a worker slot.
    #[must_use]
    pub fn running(&self) -> usize {
        self.executor.running()
    }

    fn policy_with(&self, timeout: Option<Duration>) -> PollingPolicy {
        timeout.map_or(self.policy, |value| self.policy.with_timeout(value))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;
    use tokio::time::sleep;

    use super::*;
    use crate::job::JobState;
    use crate::test_support::MemoryGateway;

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn job_still_runs_when_its_deadline_cannot_be_armed() {
        let gateway = MemoryGateway::new();
        gateway.add_stuck_machine("m1");
        let policy = PollingPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        let orchestrator = ProvisioningOrchestrator::new(Arc::new(gateway), 1, policy)
            .unwrap_or_else(|err| panic!("orchestrator should build: {err}"));
        orchestrator.supervisor.stop();

        let handle = orchestrator
            .submit_by_id("m1", None, Vec::new(), None)
            .unwrap_or_else(|err| panic!("submit should succeed: {err}"));
        sleep(Duration::from_secs(30)).await;

        assert_eq!(handle.state(), JobState::Running);
        assert!(orchestrator.cancel(&handle));
    }
}
