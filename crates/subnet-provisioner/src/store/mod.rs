//! Allocation record persistence
//!
//! The index a resource was given is stored as exactly one record per
//! resource. [`LabelAllocationStore`] keeps it in a well-known label on the
//! resource itself; [`MemoryAllocationStore`] keeps it in process memory.

mod label;
mod memory;

pub use label::LabelAllocationStore;
pub use memory::MemoryAllocationStore;

use crate::models::{Label, ResourceDescription};
use crate::{Error, Result};
use async_trait::async_trait;

/// Default label key holding the subdivision index
pub const DEFAULT_INDEX_LABEL_KEY: &str = "subnet-provisioner:subnet-index";

/// Persistence of per-resource allocation indices
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Record `index` for the resource, replacing any previous record
    async fn set_index(&self, resource_id: &str, index: u32) -> Result<()>;

    /// Recorded index, `None` when the resource has no record
    async fn get_index(&self, resource_id: &str) -> Result<Option<u32>>;

    /// Recorded index for a resource that was already described
    ///
    /// Stores that can read the record out of the description override this
    /// to skip the round-trip.
    async fn index_from_snapshot(&self, resource: &ResourceDescription) -> Result<Option<u32>> {
        self.get_index(&resource.id).await
    }

    /// Drop the record if there is one
    ///
    /// Best-effort: never fails, so it cannot block teardown.
    async fn remove_index(&self, resource_id: &str);
}

/// Read the index record out of a resource's labels
///
/// More than one label with `key` is an error, as is a value that is not a
/// non-negative integer.
pub fn index_from_labels(resource_id: &str, labels: &[Label], key: &str) -> Result<Option<u32>> {
    let mut matching = labels.iter().filter(|l| l.key == key);
    let Some(label) = matching.next() else {
        return Ok(None);
    };

    let extra = matching.count();
    if extra > 0 {
        return Err(Error::MultipleMatchingTags {
            resource_id: resource_id.to_string(),
            key: key.to_string(),
            count: extra + 1,
        });
    }

    label
        .value
        .parse::<u32>()
        .map(Some)
        .map_err(|_| Error::InvalidTagValue {
            resource_id: resource_id.to_string(),
            value: label.value.clone(),
        })
}
