//! IPv6 Subnet Provisioner
//!
//! Carves deterministic, equal-size sub-blocks out of a parent address space
//! and associates them with network resources:
//! - Arithmetic CIDR partitioning for IPv4 and IPv6
//! - Lowest-free index allocation over a sibling snapshot
//! - Index bookkeeping as a single label per resource
//! - Bounded, cancellable polling of asynchronous associations
//!
//! Provisioning is idempotent: running a request again for a resource that
//! already holds its block returns the same index and block.
//!
//! Concurrent requests against the same parent space are not serialized and
//! may pick the same index. Callers that provision siblings concurrently
//! must hold their own lock around [`SubnetProvisioner::provision`].

pub mod allocator;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod models;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod waiter;

// Re-export core types
pub use allocator::{CidrPartitioner, ClaimSet, IndexAllocator, SiblingRecord, Subdivisions};
pub use config::{ProvisionerConfig, ENV_PREFIX};
pub use control_plane::{ControlPlane, InMemoryConfig, InMemoryControlPlane, Operation};
pub use error::{Error, Result};
pub use models::{
    AddressBlock, AddressFamily, AssociationState, BlockAssociation, Label, Page, ParentSpace,
    ParentSpaceDescription, ResourceAttribute, ResourceDescription,
};
pub use service::{AllocationPlan, ProvisionOutcome, ProvisionRequest, SubnetProvisioner};
pub use store::{
    AllocationStore, LabelAllocationStore, MemoryAllocationStore, DEFAULT_INDEX_LABEL_KEY,
};
pub use telemetry::TracingConfig;
pub use waiter::{AssociationWait, PollPolicy, ProvisioningWaiter, WaitState};
