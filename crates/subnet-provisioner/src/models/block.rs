//! Address block model
//!
//! Both families share one `u128` representation. The family only decides
//! the valid width and how the block is presented at the boundary.

use crate::{Error, Result};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressFamily {
    #[serde(rename = "ipv4", alias = "v4")]
    V4,
    #[serde(rename = "ipv6", alias = "v6")]
    V6,
}

impl AddressFamily {
    /// Address width in bits
    pub fn width(&self) -> u8 {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "4" | "v4" | "ipv4" => Ok(AddressFamily::V4),
            "6" | "v6" | "ipv6" => Ok(AddressFamily::V6),
            other => Err(Error::Config(format!("unknown address family '{}'", other))),
        }
    }
}

/// Mask with the lowest `bits` bits set
pub(crate) fn low_mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// A CIDR block in canonical form (host bits zero)
///
/// Ordering and equality compare the family, then the integer base address,
/// then the prefix length. Textual presentation plays no part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressBlock {
    family: AddressFamily,
    base: u128,
    prefix_len: u8,
}

impl AddressBlock {
    /// Create a block, clearing any host bits of `base`
    pub fn new(family: AddressFamily, base: u128, prefix_len: u8) -> Result<Self> {
        if prefix_len > family.width() {
            return Err(Error::InvalidPrefix {
                parent: format!("{} base {:#x}", family, base),
                prefix_len,
                reason: format!("{} addresses are {} bits wide", family, family.width()),
            });
        }
        if base > low_mask(u32::from(family.width())) {
            return Err(Error::InvalidCidr(format!(
                "{:#x} does not fit in an {} address",
                base, family
            )));
        }

        let host_mask = low_mask(u32::from(family.width() - prefix_len));
        Ok(Self {
            family,
            base: base & !host_mask,
            prefix_len,
        })
    }

    /// Address family
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Network address as an integer
    pub fn base(&self) -> u128 {
        self.base
    }

    /// Prefix length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of host bits
    pub fn host_bits(&self) -> u8 {
        self.family.width() - self.prefix_len
    }

    /// Mask covering the host part of the block
    pub fn host_mask(&self) -> u128 {
        low_mask(u32::from(self.host_bits()))
    }

    /// Highest address in the block as an integer
    pub fn last(&self) -> u128 {
        self.base | self.host_mask()
    }

    /// Number of addresses in the block, `None` for the full IPv6 space (2^128)
    pub fn size(&self) -> Option<u128> {
        1u128.checked_shl(u32::from(self.host_bits()))
    }

    /// Whether `other` lies entirely inside this block
    pub fn contains(&self, other: &AddressBlock) -> bool {
        self.family == other.family
            && other.prefix_len >= self.prefix_len
            && other.base & !self.host_mask() == self.base
    }

    /// Convert to an `ipnet` network for presentation
    pub fn to_ipnet(&self) -> IpNet {
        match self.family {
            AddressFamily::V4 => IpNet::V4(Ipv4Net::new_assert(
                Ipv4Addr::from(self.base as u32),
                self.prefix_len,
            )),
            AddressFamily::V6 => {
                IpNet::V6(Ipv6Net::new_assert(Ipv6Addr::from(self.base), self.prefix_len))
            }
        }
    }
}

impl From<Ipv4Net> for AddressBlock {
    fn from(net: Ipv4Net) -> Self {
        let net = net.trunc();
        Self {
            family: AddressFamily::V4,
            base: u128::from(u32::from(net.network())),
            prefix_len: net.prefix_len(),
        }
    }
}

impl From<Ipv6Net> for AddressBlock {
    fn from(net: Ipv6Net) -> Self {
        let net = net.trunc();
        Self {
            family: AddressFamily::V6,
            base: u128::from(net.network()),
            prefix_len: net.prefix_len(),
        }
    }
}

impl From<IpNet> for AddressBlock {
    fn from(net: IpNet) -> Self {
        match net {
            IpNet::V4(v4) => v4.into(),
            IpNet::V6(v6) => v6.into(),
        }
    }
}

impl From<AddressBlock> for IpNet {
    fn from(block: AddressBlock) -> Self {
        block.to_ipnet()
    }
}

impl FromStr for AddressBlock {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let net: IpNet = s.trim().parse()?;
        Ok(net.into())
    }
}

impl TryFrom<String> for AddressBlock {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AddressBlock> for String {
    fn from(block: AddressBlock) -> Self {
        block.to_string()
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ipnet())
    }
}
