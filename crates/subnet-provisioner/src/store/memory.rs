//! In-memory allocation store

use super::AllocationStore;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Keeps allocation records in a concurrent map
#[derive(Debug, Default)]
pub struct MemoryAllocationStore {
    records: DashMap<String, u32>,
}

impl MemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources with a record
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AllocationStore for MemoryAllocationStore {
    async fn set_index(&self, resource_id: &str, index: u32) -> Result<()> {
        self.records.insert(resource_id.to_string(), index);
        Ok(())
    }

    async fn get_index(&self, resource_id: &str) -> Result<Option<u32>> {
        Ok(self.records.get(resource_id).map(|r| *r))
    }

    async fn remove_index(&self, resource_id: &str) {
        self.records.remove(resource_id);
    }
}
