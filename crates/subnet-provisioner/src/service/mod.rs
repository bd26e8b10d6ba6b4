//! Provisioning orchestration

mod provisioner;

pub use provisioner::{AllocationPlan, ProvisionOutcome, ProvisionRequest, SubnetProvisioner};
