//! BDD step definitions for the provisioning workflow.

use std::time::Duration;

use metalcast::{
    CancelReason, INSTANCE_ID_PLACEHOLDER, JobError, JobState, MachineStatus, PollingPolicy,
    ProvisioningRequest, RequestError, Tag,
};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{ProvisioningContext, ProvisioningResult, ProvisioningTestError};
use crate::test_constants::POLL_INTERVAL;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] ProvisioningTestError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("an empty machine pool")]
fn empty_pool(provisioning_context: ProvisioningContext) -> ProvisioningContext {
    provisioning_context
}

#[given("a machine \"{system_id}\" that becomes allocated after \"{checks}\" checks")]
fn machine_allocated_after(
    provisioning_context: ProvisioningContext,
    system_id: String,
    checks: usize,
) -> ProvisioningContext {
    let mut allocation = vec![MachineStatus::New; checks.saturating_sub(1)];
    allocation.push(MachineStatus::Allocated);
    provisioning_context
        .gateway
        .add_machine(&system_id, allocation, [MachineStatus::Deployed]);
    provisioning_context
}

#[given("a machine \"{system_id}\" with \"{cpu_count}\" CPUs and \"{memory_mb}\" MB of memory")]
fn machine_with_resources(
    provisioning_context: ProvisioningContext,
    system_id: String,
    cpu_count: u32,
    memory_mb: u64,
) -> ProvisioningContext {
    provisioning_context.gateway.add_machine_with_resources(
        &system_id,
        cpu_count,
        memory_mb,
        [MachineStatus::Allocated],
        [MachineStatus::Deployed],
    );
    provisioning_context
}

#[given("a machine \"{system_id}\" that never leaves the new state")]
fn stuck_machine(
    provisioning_context: ProvisioningContext,
    system_id: String,
) -> ProvisioningContext {
    provisioning_context.gateway.add_stuck_machine(&system_id);
    provisioning_context
}

#[when("I provision machine \"{system_id}\" with payload \"{payload}\"")]
fn provision_with_payload(
    provisioning_context: ProvisioningContext,
    system_id: String,
    payload: String,
) -> Result<ProvisioningContext, StepError> {
    let request = ProvisioningRequest::by_id(system_id)
        .payload(Some(payload))
        .build()?;
    Ok(provisioning_context.run(request)?)
}

#[when("I provision machine \"{system_id}\" without a payload")]
fn provision_without_payload(
    provisioning_context: ProvisioningContext,
    system_id: String,
) -> Result<ProvisioningContext, StepError> {
    let request = ProvisioningRequest::by_id(system_id).build()?;
    Ok(provisioning_context.run(request)?)
}

#[when("I provision machine \"{system_id}\" with a deadline of \"{millis}\" milliseconds")]
fn provision_with_deadline(
    provisioning_context: ProvisioningContext,
    system_id: String,
    millis: u64,
) -> Result<ProvisioningContext, StepError> {
    let request = ProvisioningRequest::by_id(system_id)
        .policy(PollingPolicy::new(
            POLL_INTERVAL,
            Duration::from_millis(millis),
        ))
        .build()?;
    Ok(provisioning_context.run(request)?)
}

#[when(
    "I provision a machine with \"{cpu_count}\" CPUs and \"{memory_mb}\" MB tagged \"{tag}\" and a payload naming the instance"
)]
fn provision_by_resources(
    provisioning_context: ProvisioningContext,
    cpu_count: u32,
    memory_mb: u64,
    tag: String,
) -> Result<ProvisioningContext, StepError> {
    let request = ProvisioningRequest::by_resources(cpu_count, memory_mb)
        .payload(Some(format!("{INSTANCE_ID_PLACEHOLDER} bootstrap")))
        .tag(Tag::new(tag, ""))
        .build()?;
    Ok(provisioning_context.run(request)?)
}

#[then("the job finishes in state \"{state}\"")]
fn job_state(provisioning_context: &ProvisioningContext, state: String) -> Result<(), StepError> {
    let expected = parse_state(&state)?;
    let result = finished(provisioning_context)?;
    if result.state == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected state {expected:?}, got {:?} ({:?})",
            result.state, result.outcome
        )))
    }
}

#[then("the job error is \"{kind}\"")]
fn job_error(provisioning_context: &ProvisioningContext, kind: String) -> Result<(), StepError> {
    let result = finished(provisioning_context)?;
    let Err(err) = &result.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    let matched = match kind.as_str() {
        "allocation" => matches!(err, JobError::AllocationFailed { .. }),
        "deploy" => matches!(err, JobError::DeployFailed { .. }),
        "deadline" => matches!(
            err,
            JobError::Cancelled {
                reason: CancelReason::Deadline
            }
        ),
        "explicit" => matches!(
            err,
            JobError::Cancelled {
                reason: CancelReason::Explicit
            }
        ),
        _ => {
            return Err(StepError::Assertion(format!(
                "unknown error kind: {kind}"
            )));
        }
    };
    if matched {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {kind} error, got: {err}"
        )))
    }
}

#[then("the gateway saw \"{count}\" status checks")]
fn status_checks(
    provisioning_context: &ProvisioningContext,
    count: usize,
) -> Result<(), StepError> {
    let seen = provisioning_context.gateway.status_checks();
    if seen == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} status checks, got {seen}"
        )))
    }
}

#[then("the deployed payload is \"{payload}\"")]
fn deployed_payload(
    provisioning_context: &ProvisioningContext,
    payload: String,
) -> Result<(), StepError> {
    let deployed = provisioning_context.gateway.last_payload();
    if deployed.as_deref() == Some(payload.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected payload {payload:?}, got {deployed:?}"
        )))
    }
}

#[then("machine \"{system_id}\" carries tag \"{tag}\"")]
fn machine_carries_tag(
    provisioning_context: &ProvisioningContext,
    system_id: String,
    tag: String,
) -> Result<(), StepError> {
    let tags = provisioning_context.gateway.machine_tags(&system_id);
    if tags.contains(&tag) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {system_id} to carry {tag}, got {tags:?}"
        )))
    }
}

#[then("no deployment was attempted")]
fn no_deployment(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    if provisioning_context.gateway.deploy_calls() == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "deploy should not be called",
        )))
    }
}

fn finished(provisioning_context: &ProvisioningContext) -> Result<&ProvisioningResult, StepError> {
    provisioning_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

fn parse_state(state: &str) -> Result<JobState, StepError> {
    match state {
        "pending" => Ok(JobState::Pending),
        "running" => Ok(JobState::Running),
        "done" => Ok(JobState::Done),
        "failed" => Ok(JobState::Failed),
        "cancelled" => Ok(JobState::Cancelled),
        _ => Err(StepError::Assertion(format!("unknown job state: {state}"))),
    }
}
