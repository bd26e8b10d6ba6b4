//! Subdivision index allocation
//!
//! Decides which ordinal a resource receives from a snapshot of its
//! siblings. First-fit from 0, so freed indices are reused before the
//! space grows.
//!
//! The snapshot is not serialized against other provisioning requests on
//! the same parent space: two requests that observe the same siblings will
//! pick the same index. Callers that provision siblings concurrently must
//! hold their own lock around the whole flow.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Indices already claimed by block-holding siblings
pub type ClaimSet = BTreeSet<u32>;

/// What the allocator needs to know about one sibling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingRecord {
    pub resource_id: String,
    /// Whether the sibling currently holds an associated block
    pub has_block: bool,
    /// Recorded allocation index, if any
    pub index: Option<u32>,
}

impl SiblingRecord {
    pub fn new(resource_id: impl Into<String>, has_block: bool, index: Option<u32>) -> Self {
        Self {
            resource_id: resource_id.into(),
            has_block,
            index,
        }
    }
}

/// Pure index decision logic
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexAllocator;

impl IndexAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Collect the indices claimed by `siblings`, skipping `resource_id` itself
    ///
    /// Every sibling that holds a block must carry a record. Siblings
    /// without a block claim nothing, even when they carry one.
    pub fn claims_from_siblings<'a, I>(&self, resource_id: &str, siblings: I) -> Result<ClaimSet>
    where
        I: IntoIterator<Item = &'a SiblingRecord>,
    {
        let mut claims = ClaimSet::new();
        for sibling in siblings {
            if sibling.resource_id == resource_id || !sibling.has_block {
                continue;
            }
            let index = sibling
                .index
                .ok_or_else(|| Error::MissingIndexTag(sibling.resource_id.clone()))?;
            claims.insert(index);
        }
        Ok(claims)
    }

    /// Decide the index for `resource_id`
    ///
    /// A resource that already holds a block keeps its recorded index, so
    /// re-entrant calls never move it.
    pub fn allocate(
        &self,
        resource_id: &str,
        claims: &ClaimSet,
        already_has_block: bool,
        recorded_index: Option<u32>,
    ) -> Result<u32> {
        if already_has_block {
            return recorded_index.ok_or_else(|| Error::MissingIndexTag(resource_id.to_string()));
        }

        lowest_free(claims).ok_or_else(|| {
            Error::Internal(format!(
                "every index is claimed under the parent of {}",
                resource_id
            ))
        })
    }
}

/// Lowest index not present in `claims`
fn lowest_free(claims: &ClaimSet) -> Option<u32> {
    let mut candidate = 0u32;
    for &claimed in claims {
        if claimed != candidate {
            // Claims are sorted, so the first gap is the answer
            return Some(candidate);
        }
        candidate = candidate.checked_add(1)?;
    }
    Some(candidate)
}
