//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::gateway::{Gateway, GatewayError, GatewayFuture, MachineHandle, MachineStatus};

/// Gateway operation recorded by [`MemoryGateway`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GatewayCall {
    /// `allocate_by_id`.
    AllocateById(String),
    /// `allocate_by_resources`.
    AllocateByResources {
        /// Requested cores.
        cpu_count: u32,
        /// Requested memory in megabytes.
        memory_mb: u64,
    },
    /// `get_status`.
    GetStatus(String),
    /// `create_tag_if_absent`.
    CreateTag(String),
    /// `add_tag_to_machine`.
    AddTag {
        /// Tag name.
        tag: String,
        /// Machine identifier.
        system_id: String,
    },
    /// `deploy`.
    Deploy {
        /// Machine identifier.
        system_id: String,
        /// Boot payload as received.
        payload: Option<String>,
    },
    /// `release`.
    Release(String),
}

#[derive(Debug)]
struct Machine {
    cpu_count: u32,
    memory_mb: u64,
    allocated: bool,
    deployed: bool,
    allocation_script: VecDeque<MachineStatus>,
    deployment_script: VecDeque<MachineStatus>,
    tags: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    machines: BTreeMap<String, Machine>,
    tags: BTreeMap<String, String>,
    calls: Vec<GatewayCall>,
    fail_deploy: bool,
    fail_tagging: bool,
}

/// In-memory gateway with scripted status sequences.
///
/// Every registered machine carries two status scripts: one consumed by
/// status checks after allocation and one consumed after deployment starts.
/// Each check pops the next status; the last one repeats forever.
#[derive(Clone, Debug, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<State>>,
}

impl MemoryGateway {
    /// Creates a gateway with no machines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a machine that walks `allocation` after allocation and
    /// `deployment` after deploy.
    pub fn add_machine(
        &self,
        system_id: &str,
        allocation: impl IntoIterator<Item = MachineStatus>,
        deployment: impl IntoIterator<Item = MachineStatus>,
    ) {
        self.add_machine_with_resources(system_id, 0, 0, allocation, deployment);
    }

    /// Registers a machine eligible for resource-based allocation.
    pub fn add_machine_with_resources(
        &self,
        system_id: &str,
        cpu_count: u32,
        memory_mb: u64,
        allocation: impl IntoIterator<Item = MachineStatus>,
        deployment: impl IntoIterator<Item = MachineStatus>,
    ) {
        self.lock().machines.insert(
            system_id.to_owned(),
            Machine {
                cpu_count,
                memory_mb,
                allocated: false,
                deployed: false,
                allocation_script: allocation.into_iter().collect(),
                deployment_script: deployment.into_iter().collect(),
                tags: Vec::new(),
            },
        );
    }

    /// Registers a machine that reaches `Allocated` and `Deployed` on the
    /// first check after each step.
    pub fn add_ready_machine(&self, system_id: &str) {
        self.add_machine(
            system_id,
            [MachineStatus::Allocated],
            [MachineStatus::Deployed],
        );
    }

    /// Registers a machine stuck in `New`.
    pub fn add_stuck_machine(&self, system_id: &str) {
        self.add_machine(system_id, [MachineStatus::New], [MachineStatus::Deploying]);
    }

    /// Makes every deploy call fail.
    pub fn fail_deploy(&self) {
        self.lock().fail_deploy = true;
    }

    /// Makes every tag operation fail.
    pub fn fail_tagging(&self) {
        self.lock().fail_tagging = true;
    }

    /// Returns a snapshot of every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    /// Counts calls matching `predicate`.
    #[must_use]
    pub fn count_calls(&self, predicate: impl Fn(&GatewayCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Counts status checks.
    #[must_use]
    pub fn status_checks(&self) -> usize {
        self.count_calls(|call| matches!(call, GatewayCall::GetStatus(_)))
    }

    /// Counts deploy calls.
    #[must_use]
    pub fn deploy_calls(&self) -> usize {
        self.count_calls(|call| matches!(call, GatewayCall::Deploy { .. }))
    }

    /// Returns the payload of the last deploy call.
    #[must_use]
    pub fn last_payload(&self) -> Option<String> {
        self.lock().calls.iter().rev().find_map(|call| match call {
            GatewayCall::Deploy { payload, .. } => payload.clone(),
            _ => None,
        })
    }

    /// Returns the names of all existing tags.
    #[must_use]
    pub fn tag_names(&self) -> Vec<String> {
        self.lock().tags.keys().cloned().collect()
    }

    /// Returns the tags attached to a machine.
    #[must_use]
    pub fn machine_tags(&self, system_id: &str) -> Vec<String> {
        self.lock()
            .machines
            .get(system_id)
            .map(|machine| machine.tags.clone())
            .unwrap_or_default()
    }

    /// Returns `true` while the machine is allocated.
    #[must_use]
    pub fn is_allocated(&self, system_id: &str) -> bool {
        self.lock()
            .machines
            .get(system_id)
            .is_some_and(|machine| machine.allocated)
    }

    fn record(&self, call: GatewayCall) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }
}

fn not_found(system_id: &str) -> GatewayError {
    GatewayError::NotFound {
        resource: format!("machine {system_id}"),
    }
}

fn next_status(script: &mut VecDeque<MachineStatus>) -> MachineStatus {
    if script.len() > 1 {
        script.pop_front().unwrap_or(MachineStatus::New)
    } else {
        script.front().copied().unwrap_or(MachineStatus::New)
    }
}

impl Gateway for MemoryGateway {
    fn allocate_by_id<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, MachineHandle> {
        Box::pin(async move {
            let mut state = self.record(GatewayCall::AllocateById(system_id.to_owned()));
            let machine = state
                .machines
                .get_mut(system_id)
                .ok_or_else(|| not_found(system_id))?;
            if machine.allocated {
                return Err(GatewayError::Rejected {
                    status: 409,
                    body: format!("machine {system_id} is already allocated"),
                });
            }
            machine.allocated = true;
            Ok(MachineHandle::new(system_id, MachineStatus::Ready))
        })
    }

    fn allocate_by_resources(
        &self,
        cpu_count: u32,
        memory_mb: u64,
    ) -> GatewayFuture<'_, MachineHandle> {
        Box::pin(async move {
            let mut state = self.record(GatewayCall::AllocateByResources {
                cpu_count,
                memory_mb,
            });
            let candidate = state.machines.iter_mut().find(|(_, machine)| {
                !machine.allocated
                    && machine.cpu_count >= cpu_count
                    && machine.memory_mb >= memory_mb
            });
            let Some((system_id, machine)) = candidate else {
                return Err(GatewayError::Unavailable {
                    message: format!("no machine with {cpu_count} CPUs and {memory_mb} MB"),
                });
            };
            machine.allocated = true;
            Ok(MachineHandle::new(system_id.clone(), MachineStatus::Ready))
        })
    }

    fn get_status<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, MachineStatus> {
        Box::pin(async move {
            let mut state = self.record(GatewayCall::GetStatus(system_id.to_owned()));
            let machine = state
                .machines
                .get_mut(system_id)
                .ok_or_else(|| not_found(system_id))?;
            let script = if machine.deployed {
                &mut machine.deployment_script
            } else {
                &mut machine.allocation_script
            };
            Ok(next_status(script))
        })
    }

    fn create_tag_if_absent<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.record(GatewayCall::CreateTag(name.to_owned()));
            if state.fail_tagging {
                return Err(GatewayError::Rejected {
                    status: 500,
                    body: String::from("tag service unavailable"),
                });
            }
            if state.tags.contains_key(name) {
                return Ok(false);
            }
            state.tags.insert(name.to_owned(), description.to_owned());
            Ok(true)
        })
    }

    fn add_tag_to_machine<'a>(
        &'a self,
        tag_name: &'a str,
        system_id: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record(GatewayCall::AddTag {
                tag: tag_name.to_owned(),
                system_id: system_id.to_owned(),
            });
            if state.fail_tagging || !state.tags.contains_key(tag_name) {
                return Err(GatewayError::NotFound {
                    resource: format!("tag {tag_name}"),
                });
            }
            let machine = state
                .machines
                .get_mut(system_id)
                .ok_or_else(|| not_found(system_id))?;
            if !machine.tags.iter().any(|tag| tag == tag_name) {
                machine.tags.push(tag_name.to_owned());
            }
            Ok(())
        })
    }

    fn deploy<'a>(
        &'a self,
        system_id: &'a str,
        payload: Option<&'a str>,
    ) -> GatewayFuture<'a, MachineHandle> {
        Box::pin(async move {
            let mut state = self.record(GatewayCall::Deploy {
                system_id: system_id.to_owned(),
                payload: payload.map(str::to_owned),
            });
            if state.fail_deploy {
                return Err(GatewayError::Rejected {
                    status: 503,
                    body: String::from("no boot images available"),
                });
            }
            let machine = state
                .machines
                .get_mut(system_id)
                .ok_or_else(|| not_found(system_id))?;
            machine.deployed = true;
            Ok(MachineHandle::new(system_id, MachineStatus::Deploying))
        })
    }

    fn release<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record(GatewayCall::Release(system_id.to_owned()));
            let machine = state
                .machines
                .get_mut(system_id)
                .ok_or_else(|| not_found(system_id))?;
            machine.allocated = false;
            machine.deployed = false;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_tag_is_idempotent_by_name() {
        let gateway = MemoryGateway::new();

        let first = gateway.create_tag_if_absent("gpu", "GPU nodes").await;
        let second = gateway.create_tag_if_absent("gpu", "other text").await;

        assert_eq!(first, Ok(true));
        assert_eq!(second, Ok(false));
        assert_eq!(gateway.tag_names(), vec![String::from("gpu")]);
    }

    #[tokio::test]
    async fn status_script_repeats_last_value() {
        let gateway = MemoryGateway::new();
        gateway.add_machine(
            "m1",
            [MachineStatus::New, MachineStatus::Allocated],
            [MachineStatus::Deployed],
        );

        let observed = [
            gateway.get_status("m1").await,
            gateway.get_status("m1").await,
            gateway.get_status("m1").await,
        ];

        assert_eq!(
            observed,
            [
                Ok(MachineStatus::New),
                Ok(MachineStatus::Allocated),
                Ok(MachineStatus::Allocated)
            ]
        );
    }

    #[tokio::test]
    async fn resource_allocation_skips_small_and_taken_machines() {
        let gateway = MemoryGateway::new();
        for (id, cpu_count, memory_mb) in [("small", 2, 2048), ("big", 8, 16384)] {
            gateway.add_machine_with_resources(
                id,
                cpu_count,
                memory_mb,
                [MachineStatus::Allocated],
                [MachineStatus::Deployed],
            );
        }

        let first = gateway.allocate_by_resources(4, 8192).await;
        let second = gateway.allocate_by_resources(4, 8192).await;

        assert_eq!(first.map(|machine| machine.system_id), Ok(String::from("big")));
        assert!(matches!(second, Err(GatewayError::Unavailable { .. })));
    }
}
