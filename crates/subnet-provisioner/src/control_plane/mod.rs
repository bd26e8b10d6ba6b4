//! Control-plane collaborator
//!
//! The provisioner talks to the external directory through the
//! [`ControlPlane`] trait. An in-memory implementation is provided for
//! tests and simulation.

mod memory;
mod traits;

pub use memory::{AttributeRecord, InMemoryConfig, InMemoryControlPlane, RouteRecord};
pub use traits::{ControlPlane, Operation};

use crate::models::ResourceDescription;
use crate::{Error, Result};
use std::collections::HashSet;

/// List every resource under `parent_id`, following page tokens to the end
pub async fn list_all_siblings<C: ControlPlane + ?Sized>(
    control_plane: &C,
    parent_id: &str,
) -> Result<Vec<ResourceDescription>> {
    let mut siblings = Vec::new();
    let mut seen_tokens = HashSet::new();
    let mut page_token = None;

    loop {
        let page = control_plane
            .list_sibling_resources(parent_id, page_token)
            .await?;
        siblings.extend(page.items);

        match page.next_token {
            Some(token) => {
                if !seen_tokens.insert(token.clone()) {
                    return Err(Error::Internal(format!(
                        "sibling listing for {} repeated page token {}",
                        parent_id, token
                    )));
                }
                page_token = Some(token);
            }
            None => break,
        }
    }

    Ok(siblings)
}
