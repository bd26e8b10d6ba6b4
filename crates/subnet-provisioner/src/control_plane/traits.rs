//! Control-plane collaborator trait
//!
//! Defines the directory/control-plane calls the provisioner depends on.
//! Implementations own retry on transport failure; the provisioner only
//! distinguishes retryable from fatal errors via [`crate::Error::is_retryable`].

use crate::models::{
    AddressBlock, BlockAssociation, Page, ParentSpaceDescription, ResourceAttribute,
    ResourceDescription,
};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Control-plane operations, used for logging and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    DescribeParentSpace,
    DescribeResource,
    ListSiblingResources,
    RequestAssociation,
    PollAssociations,
    SetLabel,
    DeleteLabels,
    RequestRouteCreation,
    RequestAttributeUpdate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::DescribeParentSpace => "describe_parent_space",
            Operation::DescribeResource => "describe_resource",
            Operation::ListSiblingResources => "list_sibling_resources",
            Operation::RequestAssociation => "request_association",
            Operation::PollAssociations => "poll_associations",
            Operation::SetLabel => "set_label",
            Operation::DeleteLabels => "delete_labels",
            Operation::RequestRouteCreation => "request_route_creation",
            Operation::RequestAttributeUpdate => "request_attribute_update",
        };
        f.write_str(s)
    }
}

/// Control-plane collaborator
///
/// All calls are black-box RPCs. `request_association` is asynchronous on
/// the remote side: the returned identifier only becomes usable once
/// `poll_associations` reports it as associated.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Describe a parent space and its associated blocks
    async fn describe_parent_space(&self, parent_id: &str) -> Result<ParentSpaceDescription>;

    /// Describe a resource, its associations and labels
    async fn describe_resource(&self, resource_id: &str) -> Result<ResourceDescription>;

    /// List one page of the resources under `parent_id`
    async fn list_sibling_resources(
        &self,
        parent_id: &str,
        page_token: Option<String>,
    ) -> Result<Page<ResourceDescription>>;

    /// Ask for `block` to be associated with the resource, returning the association id
    async fn request_association(&self, resource_id: &str, block: AddressBlock) -> Result<String>;

    /// Current association entries, `None` when the collection is absent
    async fn poll_associations(&self, resource_id: &str) -> Result<Option<Vec<BlockAssociation>>>;

    /// Set a label, replacing any label with the same key
    async fn set_label(&self, resource_id: &str, key: &str, value: &str) -> Result<()>;

    /// Delete every label with `key`
    async fn delete_labels(&self, resource_id: &str, key: &str) -> Result<()>;

    /// Create a route to `destination` through `gateway_id`
    async fn request_route_creation(
        &self,
        route_table_id: &str,
        destination: AddressBlock,
        gateway_id: &str,
    ) -> Result<()>;

    /// Update a boolean resource attribute
    async fn request_attribute_update(
        &self,
        resource_id: &str,
        attribute: ResourceAttribute,
        value: bool,
    ) -> Result<()>;
}

#[async_trait]
impl<T: ControlPlane + ?Sized> ControlPlane for Arc<T> {
    async fn describe_parent_space(&self, parent_id: &str) -> Result<ParentSpaceDescription> {
        (**self).describe_parent_space(parent_id).await
    }

    async fn describe_resource(&self, resource_id: &str) -> Result<ResourceDescription> {
        (**self).describe_resource(resource_id).await
    }

    async fn list_sibling_resources(
        &self,
        parent_id: &str,
        page_token: Option<String>,
    ) -> Result<Page<ResourceDescription>> {
        (**self).list_sibling_resources(parent_id, page_token).await
    }

    async fn request_association(&self, resource_id: &str, block: AddressBlock) -> Result<String> {
        (**self).request_association(resource_id, block).await
    }

    async fn poll_associations(&self, resource_id: &str) -> Result<Option<Vec<BlockAssociation>>> {
        (**self).poll_associations(resource_id).await
    }

    async fn set_label(&self, resource_id: &str, key: &str, value: &str) -> Result<()> {
        (**self).set_label(resource_id, key, value).await
    }

    async fn delete_labels(&self, resource_id: &str, key: &str) -> Result<()> {
        (**self).delete_labels(resource_id, key).await
    }

    async fn request_route_creation(
        &self,
        route_table_id: &str,
        destination: AddressBlock,
        gateway_id: &str,
    ) -> Result<()> {
        (**self)
            .request_route_creation(route_table_id, destination, gateway_id)
            .await
    }

    async fn request_attribute_update(
        &self,
        resource_id: &str,
        attribute: ResourceAttribute,
        value: bool,
    ) -> Result<()> {
        (**self)
            .request_attribute_update(resource_id, attribute, value)
            .await
    }
}
