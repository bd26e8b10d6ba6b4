//! Address-space partitioning and index allocation
//!
//! Provides:
//! - Arithmetic subdivision of a parent block (partitioner)
//! - Lowest-free index selection over a sibling snapshot (index allocator)

mod index_allocator;
pub mod partitioner;

pub use index_allocator::{ClaimSet, IndexAllocator, SiblingRecord};
pub use partitioner::{CidrPartitioner, Subdivisions};
