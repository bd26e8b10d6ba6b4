//! Control-plane resource models

use super::AddressBlock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A key/value label attached to a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// State of a block association as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationState {
    /// Association requested, not usable yet
    Associating,
    /// Association is live
    Associated,
    /// Removal in progress
    Disassociating,
    /// Association was removed
    Disassociated,
    /// Association could not be established
    Failed,
}

impl AssociationState {
    /// Whether a resource in this state still holds the block
    pub fn holds_block(&self) -> bool {
        matches!(
            self,
            AssociationState::Associating
                | AssociationState::Associated
                | AssociationState::Disassociating
        )
    }

    /// Whether the association can no longer become active
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            AssociationState::Disassociating
                | AssociationState::Disassociated
                | AssociationState::Failed
        )
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssociationState::Associating => "associating",
            AssociationState::Associated => "associated",
            AssociationState::Disassociating => "disassociating",
            AssociationState::Disassociated => "disassociated",
            AssociationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One entry of a resource's association collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAssociation {
    /// Opaque identifier issued by the control plane
    pub association_id: String,
    /// Associated block
    pub block: AddressBlock,
    /// Current state
    pub state: AssociationState,
    /// When the association was requested
    pub requested_at: DateTime<Utc>,
}

impl BlockAssociation {
    pub fn new(association_id: impl Into<String>, block: AddressBlock, state: AssociationState) -> Self {
        Self {
            association_id: association_id.into(),
            block,
            state,
            requested_at: Utc::now(),
        }
    }
}

/// Parent address space as described by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSpaceDescription {
    pub id: String,
    pub associations: Vec<BlockAssociation>,
}

/// An address block bound to its parent resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSpace {
    pub id: String,
    pub block: AddressBlock,
}

/// A resource (subnet) as described by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub id: String,
    pub parent_id: String,
    /// `None` when the control plane reports no association collection at all
    pub associations: Option<Vec<BlockAssociation>>,
    pub labels: Vec<Label>,
}

impl ResourceDescription {
    pub fn new(id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            associations: Some(Vec::new()),
            labels: Vec::new(),
        }
    }

    /// Whether the resource currently holds an associated block
    pub fn has_block(&self) -> bool {
        self.associations
            .as_ref()
            .map(|set| set.iter().any(|a| a.state.holds_block()))
            .unwrap_or(false)
    }

    /// First association that still holds a block
    pub fn held_association(&self) -> Option<&BlockAssociation> {
        self.associations
            .as_ref()
            .and_then(|set| set.iter().find(|a| a.state.holds_block()))
    }
}

/// One page of a paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// Resource attributes the provisioner may update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAttribute {
    /// Give new interfaces in the subnet an IPv6 address automatically
    AssignIpv6AddressOnCreation,
}
