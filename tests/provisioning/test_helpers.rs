//! Shared fixtures for provisioning BDD scenarios.

use std::sync::Arc;

use metalcast::test_support::MemoryGateway;
use metalcast::{
    JobOutcome, JobState, OrchestratorError, PollingPolicy, ProvisioningOrchestrator,
    ProvisioningRequest,
};
use rstest::fixture;
use thiserror::Error;
use tokio::runtime::Builder;

use crate::test_constants::{LONG_TIMEOUT, POLL_INTERVAL, WORKERS};

#[derive(Clone, Debug)]
pub struct ProvisioningContext {
    pub gateway: MemoryGateway,
    pub outcome: Option<ProvisioningResult>,
}

#[derive(Clone, Debug)]
pub struct ProvisioningResult {
    pub state: JobState,
    pub outcome: JobOutcome,
}

#[derive(Debug, Error)]
pub enum ProvisioningTestError {
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

#[fixture]
pub fn provisioning_context() -> ProvisioningContext {
    ProvisioningContext {
        gateway: MemoryGateway::new(),
        outcome: None,
    }
}

impl ProvisioningContext {
    /// Runs one request to completion on a paused-clock runtime.
    pub fn run(self, request: ProvisioningRequest) -> Result<Self, ProvisioningTestError> {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()?;
        let gateway = Arc::new(self.gateway.clone());
        let result = runtime.block_on(async move {
            let orchestrator = ProvisioningOrchestrator::new(
                gateway,
                WORKERS,
                PollingPolicy::new(POLL_INTERVAL, LONG_TIMEOUT),
            )?;
            let handle = orchestrator.submit(request)?;
            let outcome = orchestrator.await_result(&handle).await;
            orchestrator.shutdown();
            orchestrator.wait_idle().await;
            Ok::<_, ProvisioningTestError>(ProvisioningResult {
                state: handle.state(),
                outcome,
            })
        })?;

        Ok(Self {
            gateway: self.gateway,
            outcome: Some(result),
        })
    }
}
