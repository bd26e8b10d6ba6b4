//! Association wait state machine
//!
//! `Requested -> Pending -> Active`. The machine is pure: it only looks at
//! poll results handed to it, so the polling loop decides timing.

use crate::models::{AddressBlock, AssociationState, BlockAssociation};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local state of one association request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WaitState {
    /// Association about to be requested
    Requested,
    /// Control plane returned an identifier, not yet associated
    Pending { association_id: String },
    /// Association is live
    Active {
        association_id: String,
        block: AddressBlock,
    },
}

impl WaitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WaitState::Active { .. })
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitState::Requested => write!(f, "requested"),
            WaitState::Pending { .. } => write!(f, "pending"),
            WaitState::Active { .. } => write!(f, "active"),
        }
    }
}

/// One association request being tracked to completion
#[derive(Debug, Clone)]
pub struct AssociationWait {
    resource_id: String,
    block: AddressBlock,
    state: WaitState,
    observations: u32,
}

impl AssociationWait {
    /// Start tracking an association of `block` to `resource_id`
    pub fn new(resource_id: impl Into<String>, block: AddressBlock) -> Self {
        Self {
            resource_id: resource_id.into(),
            block,
            state: WaitState::Requested,
            observations: 0,
        }
    }

    /// Track an association the control plane already knows about
    pub fn pending(
        resource_id: impl Into<String>,
        block: AddressBlock,
        association_id: impl Into<String>,
    ) -> Self {
        let mut wait = Self::new(resource_id, block);
        wait.state = WaitState::Pending {
            association_id: association_id.into(),
        };
        wait
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Block that was requested
    pub fn block(&self) -> AddressBlock {
        self.block
    }

    pub fn state(&self) -> &WaitState {
        &self.state
    }

    /// Number of poll results observed
    pub fn observations(&self) -> u32 {
        self.observations
    }

    /// Association id once the request has been issued
    pub fn association_id(&self) -> Option<&str> {
        match &self.state {
            WaitState::Requested => None,
            WaitState::Pending { association_id } | WaitState::Active { association_id, .. } => {
                Some(association_id)
            }
        }
    }

    /// The control plane accepted the request and returned `association_id`
    pub fn requested(&mut self, association_id: impl Into<String>) -> Result<()> {
        match self.state {
            WaitState::Requested => {
                self.state = WaitState::Pending {
                    association_id: association_id.into(),
                };
                Ok(())
            }
            ref other => Err(Error::Internal(format!(
                "association for {} is already {}",
                self.resource_id, other
            ))),
        }
    }

    /// Feed one poll result, returning the associated block once active
    ///
    /// `None` means the association collection itself is missing, which is
    /// fatal. Entries for other association ids are ignored.
    pub fn observe(&mut self, entries: Option<&[BlockAssociation]>) -> Result<Option<AddressBlock>> {
        let association_id = match &self.state {
            WaitState::Pending { association_id } => association_id.clone(),
            WaitState::Active { block, .. } => return Ok(Some(*block)),
            WaitState::Requested => {
                return Err(Error::Internal(format!(
                    "association for {} has not been requested",
                    self.resource_id
                )))
            }
        };
        self.observations += 1;

        let entries = entries.ok_or_else(|| Error::AssociationSetMissing(self.resource_id.clone()))?;
        let Some(entry) = entries.iter().find(|a| a.association_id == association_id) else {
            return Ok(None);
        };

        if entry.state.is_failed() {
            return Err(Error::AssociationFailed {
                association_id,
                state: entry.state.to_string(),
            });
        }
        if entry.state != AssociationState::Associated {
            return Ok(None);
        }

        self.state = WaitState::Active {
            association_id,
            block: entry.block,
        };
        Ok(Some(entry.block))
    }
}
