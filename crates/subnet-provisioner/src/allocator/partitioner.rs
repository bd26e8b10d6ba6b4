//! CIDR partitioning arithmetic
//!
//! Splits a parent block into equal-size subdivisions and maps between an
//! ordinal and its block. Everything is computed on the integer base address,
//! so a /34 split of a /32 costs the same as a /64 split of a /8.

use crate::models::{low_mask, AddressBlock};
use crate::{Error, Result};

/// Equal-size subdivision of a parent block at a fixed prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrPartitioner {
    parent: AddressBlock,
    prefix_len: u8,
}

impl CidrPartitioner {
    /// Create a partitioner splitting `parent` into `/prefix_len` blocks
    pub fn new(parent: AddressBlock, prefix_len: u8) -> Result<Self> {
        if prefix_len < parent.prefix_len() {
            return Err(Error::InvalidPrefix {
                parent: parent.to_string(),
                prefix_len,
                reason: format!(
                    "shorter than the parent prefix /{}",
                    parent.prefix_len()
                ),
            });
        }

        let width = parent.family().width();
        if prefix_len > width {
            return Err(Error::InvalidPrefix {
                parent: parent.to_string(),
                prefix_len,
                reason: format!("{} addresses are {} bits wide", parent.family(), width),
            });
        }

        Ok(Self { parent, prefix_len })
    }

    /// Parent block
    pub fn parent(&self) -> AddressBlock {
        self.parent
    }

    /// Prefix length of the subdivisions
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Bits distinguishing one subdivision from another
    fn index_bits(&self) -> u32 {
        u32::from(self.prefix_len - self.parent.prefix_len())
    }

    /// Host bits of one subdivision
    fn child_host_bits(&self) -> u32 {
        u32::from(self.parent.family().width() - self.prefix_len)
    }

    /// Number of subdivisions, `None` when it is 2^128
    pub fn count(&self) -> Option<u128> {
        1u128.checked_shl(self.index_bits())
    }

    fn count_display(&self) -> String {
        match self.count() {
            Some(count) => count.to_string(),
            None => "2^128".to_string(),
        }
    }

    /// Block at ordinal `n`
    pub fn nth(&self, n: u128) -> Result<AddressBlock> {
        if n > low_mask(self.index_bits()) {
            return Err(Error::IndexOutOfRange {
                parent: self.parent.to_string(),
                prefix_len: self.prefix_len,
                index: n,
                count: self.count_display(),
            });
        }

        // n < 2^index_bits, so the shift cannot overflow
        let offset = n.checked_shl(self.child_host_bits()).unwrap_or(0);
        AddressBlock::new(
            self.parent.family(),
            self.parent.base() + offset,
            self.prefix_len,
        )
    }

    /// Ordinal of `block` among the subdivisions
    pub fn index_of(&self, block: &AddressBlock) -> Result<u128> {
        if block.prefix_len() != self.prefix_len || !self.parent.contains(block) {
            return Err(Error::NotAMember {
                parent: self.parent.to_string(),
                prefix_len: self.prefix_len,
                block: block.to_string(),
            });
        }

        let offset = block.base() - self.parent.base();
        Ok(offset.checked_shr(self.child_host_bits()).unwrap_or(0))
    }

    /// Iterate all subdivisions in ascending address order
    pub fn iter(&self) -> Subdivisions {
        Subdivisions {
            partitioner: *self,
            next: Some(0),
        }
    }
}

impl IntoIterator for CidrPartitioner {
    type Item = AddressBlock;
    type IntoIter = Subdivisions;

    fn into_iter(self) -> Subdivisions {
        self.iter()
    }
}

/// Lazy ascending iterator over the subdivisions of a parent block
#[derive(Debug, Clone)]
pub struct Subdivisions {
    partitioner: CidrPartitioner,
    next: Option<u128>,
}

impl Iterator for Subdivisions {
    type Item = AddressBlock;

    fn next(&mut self) -> Option<AddressBlock> {
        let index = self.next?;
        let block = self.partitioner.nth(index).ok()?;
        self.next = index.checked_add(1);
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let Some(next) = self.next else {
            return (0, Some(0));
        };
        match self.partitioner.count() {
            Some(count) => {
                let remaining = count.saturating_sub(next);
                let len = usize::try_from(remaining).unwrap_or(usize::MAX);
                (len, usize::try_from(remaining).ok())
            }
            None => (usize::MAX, None),
        }
    }
}

/// All `/prefix_len` blocks tiling `parent`, ascending
pub fn enumerate(parent: AddressBlock, prefix_len: u8) -> Result<Subdivisions> {
    Ok(CidrPartitioner::new(parent, prefix_len)?.iter())
}

/// The `n`-th `/prefix_len` block of `parent`
pub fn nth(parent: AddressBlock, prefix_len: u8, n: u128) -> Result<AddressBlock> {
    CidrPartitioner::new(parent, prefix_len)?.nth(n)
}

/// Ordinal of `block` among the `/prefix_len` blocks of `parent`
pub fn index_of(parent: AddressBlock, prefix_len: u8, block: &AddressBlock) -> Result<u128> {
    CidrPartitioner::new(parent, prefix_len)?.index_of(block)
}
