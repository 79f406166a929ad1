//! Bounded worker pool for provisioning jobs.
//!
//! Each submitted job becomes one task that first waits for a permit from a
//! fair semaphore, then holds it for the whole allocate → deploy lifecycle.
//! Queued jobs therefore start in submission order and never more than
//! `workers` jobs touch the gateway at once.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::gateway::Gateway;
use crate::job::{JobHandle, ProvisioningJob};
use crate::poller::StatePoller;

/// Errors raised when building or using a [`JobExecutor`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecutorError {
    /// The executor was created outside a Tokio runtime.
    #[error("job executor requires a running Tokio runtime")]
    NoRuntime,
    /// The pool was configured with zero workers.
    #[error("job executor needs at least one worker")]
    NoWorkers,
    /// The executor no longer accepts jobs.
    #[error("job executor has been shut down")]
    ShutDown,
}

/// Fixed-size pool that runs provisioning jobs concurrently.
#[derive(Debug)]
pub struct JobExecutor<G: ?Sized> {
    gateway: Arc<G>,
    permits: Arc<Semaphore>,
    workers: usize,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl<G> JobExecutor<G>
where
    G: Gateway + ?Sized + 'static,
{
    /// Creates a pool of `workers` slots on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::NoRuntime`] outside a runtime and
    /// [`ExecutorError::NoWorkers`] when `workers` is zero.
    pub fn new(gateway: Arc<G>, workers: usize) -> Result<Self, ExecutorError> {
        if workers == 0 {
            return Err(ExecutorError::NoWorkers);
        }
        let runtime = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
        Ok(Self {
            gateway,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            runtime,
        })
    }

    /// Queues `job` and returns its handle without waiting for a slot.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::ShutDown`] once [`JobExecutor::shutdown`] has
    /// been called.
    pub fn submit(
        &self,
        job: ProvisioningJob,
        interval: Duration,
    ) -> Result<JobHandle, ExecutorError> {
        if self.shutdown.is_cancelled() {
            return Err(ExecutorError::ShutDown);
        }

        let handle = JobHandle::new(&self.shutdown);
        let span = info_span!("job", job_id = %handle.id(), selector = %job.request().selector);
        let worker = Worker {
            gateway: Arc::clone(&self.gateway),
            permits: Arc::clone(&self.permits),
            poller: StatePoller::new(interval),
            handle: handle.clone(),
            job,
        };
        self.tracker.spawn_on(worker.run().instrument(span), &self.runtime);
        debug!(job_id = %handle.id(), "job queued");
        Ok(handle)
    }

    /// Number of worker slots.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Number of slots currently occupied by a running job.
    #[must_use]
    pub fn running(&self) -> usize {
        self.workers.saturating_sub(self.permits.available_permits())
    }

    /// Returns `true` once [`JobExecutor::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops accepting jobs and signals every queued and running job.
    ///
    /// Returns once the signal is sent. Jobs inside a gateway call finish
    /// that call before they observe it; use [`JobExecutor::wait_idle`] to
    /// wait for the workers to exit.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(
            running = self.running(),
            tasks = self.tracker.len(),
            "shutting down job executor"
        );
        self.shutdown.cancel();
        self.permits.close();
        self.tracker.close();
    }

    /// Waits until every worker task spawned so far has exited.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        if !self.shutdown.is_cancelled() {
            self.tracker.reopen();
        }
    }
}

struct Worker<G: ?Sized> {
    gateway: Arc<G>,
    permits: Arc<Semaphore>,
    poller: StatePoller,
    handle: JobHandle,
    job: ProvisioningJob,
}

impl<G> Worker<G>
where
    G: Gateway + ?Sized,
{
    async fn run(self) {
        let Self {
            gateway,
            permits,
            poller,
            handle,
            job,
        } = self;

        let acquired = tokio::select! {
            biased;
            () = handle.cancel_token().cancelled() => None,
            permit = permits.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = acquired else {
            handle.complete(Err(handle.cancellation_error()));
            debug!("job left the queue before starting");
            return;
        };
        if handle.cancel_token().is_cancelled() || !handle.start() {
            handle.complete(Err(handle.cancellation_error()));
            return;
        }

        info!("job started");
        let outcome = job.run(gateway.as_ref(), &poller, &handle).await;
        match &outcome {
            Ok(machine) => info!(system_id = %machine.system_id, "job finished"),
            Err(err) if err.is_cancelled() => info!(error = %err, "job stopped"),
            Err(err) => warn!(error = %err, "job failed"),
        }
        handle.complete(outcome);
    }
}
