//! BDD scenarios for the provisioning workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisioningContext, provisioning_context};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Deploy a known machine by identifier"
)]
fn scenario_deploy_by_id(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Deploy any machine matching the requested resources"
)]
fn scenario_deploy_by_resources(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Fail allocation of an unknown machine"
)]
fn scenario_unknown_machine(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Cancel a stuck machine at its deadline"
)]
fn scenario_deadline(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}
