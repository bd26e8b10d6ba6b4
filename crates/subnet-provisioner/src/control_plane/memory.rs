//! In-memory control plane
//!
//! Backs tests, benches and the CLI simulation. Associations stay in the
//! `associating` state for a configurable number of polls, and any operation
//! can be made to fail transiently a given number of times.

use super::traits::{ControlPlane, Operation};
use crate::models::{
    AddressBlock, AssociationState, BlockAssociation, Label, Page, ParentSpaceDescription,
    ResourceAttribute, ResourceDescription,
};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use tracing::debug;
use uuid::Uuid;

/// Behaviour knobs for [`InMemoryControlPlane`]
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Resources returned per sibling page
    pub page_size: usize,
    /// Polls an association spends in `associating` before it becomes `associated`
    pub association_latency: u32,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            association_latency: 2,
        }
    }
}

/// A route created through the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub route_table_id: String,
    pub destination: AddressBlock,
    pub gateway_id: String,
}

/// An attribute update issued through the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub resource_id: String,
    pub attribute: ResourceAttribute,
    pub value: bool,
}

/// Control plane holding all state in process memory
pub struct InMemoryControlPlane {
    config: InMemoryConfig,
    parents: DashMap<String, ParentSpaceDescription>,
    resources: DashMap<String, ResourceDescription>,
    /// Remaining `associating` polls per association id
    pending: Mutex<HashMap<String, u32>>,
    /// Remaining transient failures per operation
    faults: Mutex<HashMap<Operation, u32>>,
    /// Resources whose association collection is reported as absent
    absent_sets: Mutex<HashSet<String>>,
    /// Polls never complete while set
    polls_stalled: AtomicBool,
    calls: DashMap<Operation, u64>,
    routes: Mutex<Vec<RouteRecord>>,
    attribute_updates: Mutex<Vec<AttributeRecord>>,
    snapshot_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl InMemoryControlPlane {
    /// Create an empty control plane with default behaviour
    pub fn new() -> Self {
        Self::with_config(InMemoryConfig::default())
    }

    /// Create an empty control plane
    pub fn with_config(config: InMemoryConfig) -> Self {
        Self {
            config,
            parents: DashMap::new(),
            resources: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
            absent_sets: Mutex::new(HashSet::new()),
            polls_stalled: AtomicBool::new(false),
            calls: DashMap::new(),
            routes: Mutex::new(Vec::new()),
            attribute_updates: Mutex::new(Vec::new()),
            snapshot_barrier: Mutex::new(None),
        }
    }

    // ==================== Seeding ====================

    /// Register a parent space with one associated block
    pub fn add_parent_space(&self, parent_id: impl Into<String>, block: AddressBlock) {
        let id = parent_id.into();
        let association = BlockAssociation::new(
            format!("parent-cidr-assoc-{}", Uuid::new_v4().simple()),
            block,
            AssociationState::Associated,
        );
        self.parents.insert(
            id.clone(),
            ParentSpaceDescription {
                id,
                associations: vec![association],
            },
        );
    }

    /// Register a parent space with no associated block
    pub fn add_empty_parent_space(&self, parent_id: impl Into<String>) {
        let id = parent_id.into();
        self.parents.insert(
            id.clone(),
            ParentSpaceDescription {
                id,
                associations: Vec::new(),
            },
        );
    }

    /// Register a resource under a parent
    pub fn add_resource(&self, resource: ResourceDescription) {
        self.resources.insert(resource.id.clone(), resource);
    }

    /// Register a resource under a parent that already holds `block` with an index label
    pub fn add_allocated_resource(
        &self,
        resource_id: &str,
        parent_id: &str,
        block: AddressBlock,
        label_key: &str,
        index: u32,
    ) {
        let mut resource = ResourceDescription::new(resource_id, parent_id);
        resource.associations = Some(vec![BlockAssociation::new(
            format!("subnet-cidr-assoc-{}", Uuid::new_v4().simple()),
            block,
            AssociationState::Associated,
        )]);
        resource.labels.push(Label::new(label_key, index.to_string()));
        self.add_resource(resource);
    }

    /// Remove a resource
    pub fn remove_resource(&self, resource_id: &str) {
        self.resources.remove(resource_id);
    }

    // ==================== Fault injection ====================

    /// Fail the next `count` calls of `operation` with a transport error
    pub fn inject_transient_failures(&self, operation: Operation, count: u32) {
        self.faults.lock().insert(operation, count);
    }

    /// Report the association collection of `resource_id` as absent
    pub fn mark_association_set_absent(&self, resource_id: &str) {
        self.absent_sets.lock().insert(resource_id.to_string());
    }

    /// Make every later association poll hang without answering
    pub fn stall_polls(&self) {
        self.polls_stalled.store(true, Ordering::SeqCst);
    }

    /// Force the state of an existing association
    pub fn set_association_state(&self, resource_id: &str, association_id: &str, state: AssociationState) {
        if let Some(mut resource) = self.resources.get_mut(resource_id) {
            if let Some(set) = resource.associations.as_mut() {
                for association in set.iter_mut().filter(|a| a.association_id == association_id) {
                    association.state = state;
                }
            }
        }
        self.pending.lock().remove(association_id);
    }

    /// Make every first-page sibling listing wait on `barrier` after taking its snapshot
    pub fn set_snapshot_barrier(&self, barrier: Arc<Barrier>) {
        *self.snapshot_barrier.lock() = Some(barrier);
    }

    pub fn clear_snapshot_barrier(&self) {
        *self.snapshot_barrier.lock() = None;
    }

    // ==================== Inspection ====================

    /// Current description of a resource
    pub fn resource(&self, resource_id: &str) -> Option<ResourceDescription> {
        self.resources.get(resource_id).map(|r| r.clone())
    }

    /// Number of calls made to `operation`
    pub fn call_count(&self, operation: Operation) -> u64 {
        self.calls.get(&operation).map(|c| *c).unwrap_or(0)
    }

    /// Routes created so far
    pub fn routes(&self) -> Vec<RouteRecord> {
        self.routes.lock().clone()
    }

    /// Attribute updates issued so far
    pub fn attribute_updates(&self) -> Vec<AttributeRecord> {
        self.attribute_updates.lock().clone()
    }

    /// Record a call and apply any injected fault
    fn enter(&self, operation: Operation) -> Result<()> {
        *self.calls.entry(operation).or_insert(0) += 1;

        let mut faults = self.faults.lock();
        if let Some(remaining) = faults.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(%operation, remaining = *remaining, "Injecting transient failure");
                return Err(Error::transport(operation.to_string(), "injected transient failure"));
            }
        }
        Ok(())
    }

    /// Blocks currently held under `parent_id`
    fn held_blocks(&self, parent_id: &str) -> Vec<(String, AddressBlock)> {
        self.resources
            .iter()
            .filter(|r| r.parent_id == parent_id)
            .flat_map(|r| {
                let id = r.id.clone();
                r.associations
                    .iter()
                    .flatten()
                    .filter(|a| a.state.holds_block())
                    .map(move |a| (id.clone(), a.block))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

fn overlaps(a: &AddressBlock, b: &AddressBlock) -> bool {
    a.contains(b) || b.contains(a)
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn describe_parent_space(&self, parent_id: &str) -> Result<ParentSpaceDescription> {
        self.enter(Operation::DescribeParentSpace)?;
        self.parents
            .get(parent_id)
            .map(|p| p.clone())
            .ok_or_else(|| Error::ParentSpaceNotFound(parent_id.to_string()))
    }

    async fn describe_resource(&self, resource_id: &str) -> Result<ResourceDescription> {
        self.enter(Operation::DescribeResource)?;
        self.resource(resource_id)
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))
    }

    async fn list_sibling_resources(
        &self,
        parent_id: &str,
        page_token: Option<String>,
    ) -> Result<Page<ResourceDescription>> {
        self.enter(Operation::ListSiblingResources)?;

        let offset = match page_token.as_deref() {
            Some(token) => token.parse::<usize>().map_err(|_| {
                Error::rejected(
                    Operation::ListSiblingResources.to_string(),
                    format!("invalid page token '{}'", token),
                )
            })?,
            None => 0,
        };

        let mut siblings: Vec<ResourceDescription> = self
            .resources
            .iter()
            .filter(|r| r.parent_id == parent_id)
            .map(|r| r.clone())
            .collect();
        siblings.sort_by(|a, b| a.id.cmp(&b.id));

        let page_size = self.config.page_size.max(1);
        let end = (offset + page_size).min(siblings.len());
        let items = siblings.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < siblings.len()).then(|| end.to_string());

        if offset == 0 {
            let barrier = self.snapshot_barrier.lock().clone();
            if let Some(barrier) = barrier {
                barrier.wait().await;
            }
        }

        Ok(Page { items, next_token })
    }

    async fn request_association(&self, resource_id: &str, block: AddressBlock) -> Result<String> {
        self.enter(Operation::RequestAssociation)?;

        let parent_id = self
            .resources
            .get(resource_id)
            .map(|r| r.parent_id.clone())
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))?;

        let inside_parent = self
            .parents
            .get(&parent_id)
            .map(|p| p.associations.iter().any(|a| a.block.contains(&block)))
            .unwrap_or(false);
        if !inside_parent {
            return Err(Error::rejected(
                Operation::RequestAssociation.to_string(),
                format!("{} is outside the address space of {}", block, parent_id),
            ));
        }

        if let Some((holder, existing)) = self
            .held_blocks(&parent_id)
            .into_iter()
            .find(|(_, existing)| overlaps(existing, &block))
        {
            return Err(Error::rejected(
                Operation::RequestAssociation.to_string(),
                format!("{} conflicts with {} held by {}", block, existing, holder),
            ));
        }

        let association_id = format!("subnet-cidr-assoc-{}", Uuid::new_v4().simple());
        let association =
            BlockAssociation::new(association_id.clone(), block, AssociationState::Associating);

        let mut resource = self
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))?;
        resource
            .associations
            .get_or_insert_with(Vec::new)
            .push(association);
        drop(resource);

        self.pending
            .lock()
            .insert(association_id.clone(), self.config.association_latency);

        debug!(resource_id, %block, %association_id, "Association requested");
        Ok(association_id)
    }

    async fn poll_associations(&self, resource_id: &str) -> Result<Option<Vec<BlockAssociation>>> {
        self.enter(Operation::PollAssociations)?;
        if self.polls_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.absent_sets.lock().contains(resource_id) {
            return Ok(None);
        }

        let mut resource = self
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))?;

        let mut pending = self.pending.lock();
        if let Some(set) = resource.associations.as_mut() {
            for association in set
                .iter_mut()
                .filter(|a| a.state == AssociationState::Associating)
            {
                match pending.get_mut(&association.association_id) {
                    Some(remaining) if *remaining > 0 => *remaining -= 1,
                    _ => {
                        association.state = AssociationState::Associated;
                        pending.remove(&association.association_id);
                    }
                }
            }
        }

        Ok(resource.associations.clone())
    }

    async fn set_label(&self, resource_id: &str, key: &str, value: &str) -> Result<()> {
        self.enter(Operation::SetLabel)?;
        let mut resource = self
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))?;
        resource.labels.retain(|l| l.key != key);
        resource.labels.push(Label::new(key, value));
        Ok(())
    }

    async fn delete_labels(&self, resource_id: &str, key: &str) -> Result<()> {
        self.enter(Operation::DeleteLabels)?;
        if let Some(mut resource) = self.resources.get_mut(resource_id) {
            resource.labels.retain(|l| l.key != key);
        }
        Ok(())
    }

    async fn request_route_creation(
        &self,
        route_table_id: &str,
        destination: AddressBlock,
        gateway_id: &str,
    ) -> Result<()> {
        self.enter(Operation::RequestRouteCreation)?;
        self.routes.lock().push(RouteRecord {
            route_table_id: route_table_id.to_string(),
            destination,
            gateway_id: gateway_id.to_string(),
        });
        Ok(())
    }

    async fn request_attribute_update(
        &self,
        resource_id: &str,
        attribute: ResourceAttribute,
        value: bool,
    ) -> Result<()> {
        self.enter(Operation::RequestAttributeUpdate)?;
        if !self.resources.contains_key(resource_id) {
            return Err(Error::ResourceNotFound(resource_id.to_string()));
        }
        self.attribute_updates.lock().push(AttributeRecord {
            resource_id: resource_id.to_string(),
            attribute,
            value,
        });
        Ok(())
    }
}
