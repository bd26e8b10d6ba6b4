//! Error types for subnet provisioning

use thiserror::Error;

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, Error>;

/// Subnet provisioner errors
///
/// Everything except [`Error::Transport`] is caller-fatal: retrying the same
/// request against the same external state produces the same failure.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Partitioner input errors
    #[error("Invalid prefix length /{prefix_len} for {parent}: {reason}")]
    InvalidPrefix {
        parent: String,
        prefix_len: u8,
        reason: String,
    },

    #[error("Index {index} is out of range, {parent} holds {count} /{prefix_len} blocks")]
    IndexOutOfRange {
        parent: String,
        prefix_len: u8,
        index: u128,
        count: String,
    },

    #[error("{block} is not a /{prefix_len} member of {parent}")]
    NotAMember {
        parent: String,
        prefix_len: u8,
        block: String,
    },

    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    // Bookkeeping inconsistencies, these need manual remediation
    #[error("Resource {0} holds an address block but is missing its index tag")]
    MissingIndexTag(String),

    #[error("Resource {resource_id} has {count} labels with key {key}")]
    MultipleMatchingTags {
        resource_id: String,
        key: String,
        count: usize,
    },

    #[error("Resource {resource_id} has an illegal index tag value '{value}'")]
    InvalidTagValue { resource_id: String, value: String },

    // Missing prerequisites
    #[error("Parent address space error: {0}")]
    ParentAddressSpace(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Parent space not found: {0}")]
    ParentSpaceNotFound(String),

    // Association errors
    #[error("Association set is missing for resource {0}")]
    AssociationSetMissing(String),

    #[error("Association {association_id} entered terminal state {state}")]
    AssociationFailed {
        association_id: String,
        state: String,
    },

    #[error("Timed out waiting for association {association_id} after {attempts} polls")]
    Timeout {
        association_id: String,
        attempts: u32,
    },

    #[error("Wait for association {0} was cancelled")]
    Cancelled(String),

    // Collaborator errors
    #[error("Transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Control plane rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a retryable transport error
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Build a non-retryable rejection
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether the same call may succeed if issued again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

impl From<ipnet::AddrParseError> for Error {
    fn from(e: ipnet::AddrParseError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
