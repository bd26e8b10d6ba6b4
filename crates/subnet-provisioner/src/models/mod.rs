//! Data models for subnet provisioning

mod block;
mod resource;

pub use block::{AddressBlock, AddressFamily};
pub(crate) use block::low_mask;
pub use resource::{
    AssociationState, BlockAssociation, Label, Page, ParentSpace, ParentSpaceDescription,
    ResourceAttribute, ResourceDescription,
};
