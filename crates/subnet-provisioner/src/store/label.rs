//! Label-backed allocation store

use super::{index_from_labels, AllocationStore, DEFAULT_INDEX_LABEL_KEY};
use crate::control_plane::ControlPlane;
use crate::models::ResourceDescription;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stores the index as a single label on the resource
pub struct LabelAllocationStore<C> {
    control_plane: Arc<C>,
    key: String,
}

impl<C: ControlPlane> LabelAllocationStore<C> {
    /// Create a store using the default label key
    pub fn new(control_plane: Arc<C>) -> Self {
        Self::with_key(control_plane, DEFAULT_INDEX_LABEL_KEY)
    }

    /// Create a store using a custom label key
    pub fn with_key(control_plane: Arc<C>, key: impl Into<String>) -> Self {
        Self {
            control_plane,
            key: key.into(),
        }
    }

    /// Label key in use
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<C: ControlPlane> AllocationStore for LabelAllocationStore<C> {
    async fn set_index(&self, resource_id: &str, index: u32) -> Result<()> {
        self.control_plane
            .set_label(resource_id, &self.key, &index.to_string())
            .await?;
        debug!(resource_id, index, key = %self.key, "Recorded allocation index");
        Ok(())
    }

    async fn get_index(&self, resource_id: &str) -> Result<Option<u32>> {
        let resource = self.control_plane.describe_resource(resource_id).await?;
        index_from_labels(resource_id, &resource.labels, &self.key)
    }

    async fn index_from_snapshot(&self, resource: &ResourceDescription) -> Result<Option<u32>> {
        index_from_labels(&resource.id, &resource.labels, &self.key)
    }

    async fn remove_index(&self, resource_id: &str) {
        let resource = match self.control_plane.describe_resource(resource_id).await {
            Ok(resource) => resource,
            Err(Error::ResourceNotFound(_)) => {
                debug!(resource_id, "Resource already gone, nothing to untag");
                return;
            }
            Err(e) => {
                warn!(resource_id, error = %e, "Could not describe resource for untagging");
                return;
            }
        };

        if !resource.labels.iter().any(|l| l.key == self.key) {
            return;
        }

        match self.control_plane.delete_labels(resource_id, &self.key).await {
            Ok(()) => debug!(resource_id, key = %self.key, "Removed allocation index"),
            Err(e) => warn!(resource_id, error = %e, "Failed to remove allocation index"),
        }
    }
}
