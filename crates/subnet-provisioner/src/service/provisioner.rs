//! Subnet Provisioner Service
//!
//! Orchestrates one provisioning request end to end:
//! - Resolve the resource, its parent space and its siblings
//! - Decide the subdivision index and compute the block
//! - Record the index, request the association and wait for it
//! - Apply the optional route and attribute side effects
//!
//! Re-running a request is safe. A request that failed after the index was
//! recorded is completed by running it again. Side effects are only issued
//! by the call that saw the association become active, so re-entry on an
//! already active block does not repeat them.

use crate::allocator::{CidrPartitioner, IndexAllocator, SiblingRecord};
use crate::config::ProvisionerConfig;
use crate::control_plane::{list_all_siblings, ControlPlane};
use crate::models::{
    AddressBlock, AssociationState, ParentSpace, ResourceAttribute, ResourceDescription,
};
use crate::store::{AllocationStore, LabelAllocationStore};
use crate::waiter::{AssociationWait, ProvisioningWaiter};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, instrument};

/// Request to provision a block for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Resource (subnet) to provision
    pub resource_id: String,
    /// Prefix length of the block to carve out of the parent
    pub prefix_len: u8,
    /// Route table that receives the default route, if any
    pub route_table_id: Option<String>,
    /// Egress gateway the default route points at
    pub egress_gateway_id: Option<String>,
    /// Turn on automatic IPv6 address assignment for new interfaces
    pub assign_ipv6_on_creation: bool,
}

impl ProvisionRequest {
    pub fn new(resource_id: impl Into<String>, prefix_len: u8) -> Self {
        Self {
            resource_id: resource_id.into(),
            prefix_len,
            route_table_id: None,
            egress_gateway_id: None,
            assign_ipv6_on_creation: false,
        }
    }

    /// Add a default route towards `egress_gateway_id` in `route_table_id`
    pub fn with_default_route(
        mut self,
        route_table_id: impl Into<String>,
        egress_gateway_id: impl Into<String>,
    ) -> Self {
        self.route_table_id = Some(route_table_id.into());
        self.egress_gateway_id = Some(egress_gateway_id.into());
        self
    }

    pub fn with_ipv6_assignment(mut self, enabled: bool) -> Self {
        self.assign_ipv6_on_creation = enabled;
        self
    }
}

/// Read-only allocation decision for a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub resource_id: String,
    pub parent: ParentSpace,
    /// Resources seen under the parent, the resource itself included
    pub sibling_count: usize,
    /// Whether the resource already holds a block
    pub already_allocated: bool,
    pub index: u32,
    pub block: AddressBlock,
    /// Held association for exactly `block`, reused on re-entry
    pub existing_association_id: Option<String>,
    /// Whether that association was already active when planned
    pub association_active: bool,
}

/// Result of a completed provisioning request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    pub resource_id: String,
    pub index: u32,
    pub block: AddressBlock,
    pub association_id: String,
    pub parent: ParentSpace,
}

/// Subnet provisioner - core orchestration service
pub struct SubnetProvisioner<C, S = LabelAllocationStore<C>> {
    control_plane: Arc<C>,
    store: Arc<S>,
    allocator: IndexAllocator,
    waiter: ProvisioningWaiter<C>,
    config: ProvisionerConfig,
}

impl<C: ControlPlane> SubnetProvisioner<C, LabelAllocationStore<C>> {
    /// Create a provisioner that records indices as resource labels
    pub fn new(control_plane: Arc<C>, config: ProvisionerConfig) -> Self {
        let store = Arc::new(LabelAllocationStore::with_key(
            control_plane.clone(),
            config.index_label_key.clone(),
        ));
        Self::with_store(control_plane, store, config)
    }
}

impl<C: ControlPlane, S: AllocationStore> SubnetProvisioner<C, S> {
    /// Create a provisioner with a custom allocation store
    pub fn with_store(control_plane: Arc<C>, store: Arc<S>, config: ProvisionerConfig) -> Self {
        let waiter = ProvisioningWaiter::new(control_plane.clone(), config.poll.clone());
        Self {
            control_plane,
            store,
            allocator: IndexAllocator::new(),
            waiter,
            config,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ==================== Planning ====================

    /// Decide the index and block for `resource_id` without changing anything
    #[instrument(skip(self), fields(parent_id = field::Empty, index = field::Empty))]
    pub async fn plan(&self, resource_id: &str, prefix_len: u8) -> Result<AllocationPlan> {
        let resource = self.control_plane.describe_resource(resource_id).await?;
        tracing::Span::current().record("parent_id", resource.parent_id.as_str());

        let parent = self.parent_space(&resource.parent_id).await?;
        let partitioner = CidrPartitioner::new(parent.block, prefix_len)?;

        let siblings = list_all_siblings(self.control_plane.as_ref(), &parent.id).await?;
        let records = self.sibling_records(resource_id, &siblings).await?;
        let claims = self.allocator.claims_from_siblings(resource_id, &records)?;

        let already_allocated = resource.has_block();
        let recorded_index = if already_allocated {
            self.store.index_from_snapshot(&resource).await?
        } else {
            None
        };

        let index = self
            .allocator
            .allocate(resource_id, &claims, already_allocated, recorded_index)?;
        tracing::Span::current().record("index", index);

        let block = partitioner.nth(u128::from(index))?;
        let existing = resource
            .associations
            .iter()
            .flatten()
            .find(|a| a.state.holds_block() && a.block == block);
        let existing_association_id = existing.map(|a| a.association_id.clone());
        let association_active =
            existing.is_some_and(|a| a.state == AssociationState::Associated);

        debug!(
            %block,
            claimed = claims.len(),
            already_allocated,
            "Allocation planned"
        );

        Ok(AllocationPlan {
            resource_id: resource_id.to_string(),
            parent,
            sibling_count: siblings.len(),
            already_allocated,
            index,
            block,
            existing_association_id,
            association_active,
        })
    }

    /// First associated block of the configured family
    async fn parent_space(&self, parent_id: &str) -> Result<ParentSpace> {
        let description = self.control_plane.describe_parent_space(parent_id).await?;
        let family = self.config.parent_family;

        description
            .associations
            .iter()
            .find(|a| a.state.holds_block() && a.block.family() == family)
            .map(|a| ParentSpace {
                id: description.id.clone(),
                block: a.block,
            })
            .ok_or_else(|| {
                Error::ParentAddressSpace(format!(
                    "no {} block is associated with {}",
                    family, parent_id
                ))
            })
    }

    /// Allocation view of every sibling
    ///
    /// Records are only read for block-holding siblings.
    async fn sibling_records(
        &self,
        resource_id: &str,
        siblings: &[ResourceDescription],
    ) -> Result<Vec<SiblingRecord>> {
        let mut records = Vec::with_capacity(siblings.len());
        for sibling in siblings.iter().filter(|s| s.id != resource_id) {
            let has_block = sibling.has_block();
            let index = if has_block {
                self.store.index_from_snapshot(sibling).await?
            } else {
                None
            };
            records.push(SiblingRecord::new(sibling.id.clone(), has_block, index));
        }
        Ok(records)
    }

    // ==================== Provisioning ====================

    /// Provision a block for the requested resource and wait until it is active
    #[instrument(skip(self, request, cancel), fields(
        resource_id = %request.resource_id,
        prefix_len = request.prefix_len,
    ))]
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome> {
        let plan = self.plan(&request.resource_id, request.prefix_len).await?;

        self.store.set_index(&plan.resource_id, plan.index).await?;

        let mut wait = match &plan.existing_association_id {
            Some(association_id) => {
                debug!(%association_id, "Reusing existing association");
                AssociationWait::pending(&plan.resource_id, plan.block, association_id.clone())
            }
            None => {
                let mut wait = AssociationWait::new(&plan.resource_id, plan.block);
                let association_id = self
                    .control_plane
                    .request_association(&plan.resource_id, plan.block)
                    .await?;
                wait.requested(association_id)?;
                wait
            }
        };

        let block = self.waiter.wait(&mut wait, cancel).await?;
        let association_id = wait
            .association_id()
            .ok_or_else(|| Error::Internal("active association without an id".to_string()))?
            .to_string();

        if plan.association_active {
            debug!("Association was already active, side effects skipped");
        } else {
            self.apply_side_effects(request).await?;
        }

        info!(
            parent_id = %plan.parent.id,
            index = plan.index,
            %block,
            %association_id,
            "Subnet provisioned"
        );

        Ok(ProvisionOutcome {
            resource_id: plan.resource_id,
            index: plan.index,
            block,
            association_id,
            parent: plan.parent,
        })
    }

    /// Route and attribute updates, issued once the block is active
    async fn apply_side_effects(&self, request: &ProvisionRequest) -> Result<()> {
        if let (Some(route_table_id), Some(gateway_id)) =
            (&request.route_table_id, &request.egress_gateway_id)
        {
            let destination = self.config.default_route_destination;
            self.control_plane
                .request_route_creation(route_table_id, destination, gateway_id)
                .await?;
            debug!(%route_table_id, %destination, %gateway_id, "Default route requested");
        }

        if request.assign_ipv6_on_creation {
            self.control_plane
                .request_attribute_update(
                    &request.resource_id,
                    ResourceAttribute::AssignIpv6AddressOnCreation,
                    true,
                )
                .await?;
            debug!("IPv6 assignment on creation enabled");
        }

        Ok(())
    }

    // ==================== Teardown ====================

    /// Drop the allocation record of `resource_id`
    ///
    /// Never fails. The associated block itself is left to the control plane.
    #[instrument(skip(self))]
    pub async fn release(&self, resource_id: &str) {
        self.store.remove_index(resource_id).await;
        info!("Allocation record released");
    }
}
