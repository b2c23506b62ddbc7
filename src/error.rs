//! Error types for aclbit

use thiserror::Error;

/// The main error type for aclbit operations
#[derive(Debug, Error)]
pub enum AclError {
    #[error("invalid resource kind: {0}")]
    InvalidResourceKind(String),
    #[error("invalid permission mask {0}: must be within 0..=31")]
    InvalidMask(u32),
    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("import plan changed since preview (expected {expected}, got {actual})")]
    PlanChanged { expected: String, actual: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
}

impl AclError {
    /// True for errors that only affect a single import row.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            AclError::UnknownPrincipal(_)
                | AclError::UnknownResource(_)
                | AclError::InvalidResourceKind(_)
                | AclError::InvalidMask(_)
                | AclError::Malformed(_)
        )
    }
}

/// Result type alias for aclbit operations
pub type Result<T> = std::result::Result<T, AclError>;

/// Convert a storage-layer error into an AclError
pub(crate) fn err<E: std::error::Error>(e: E) -> AclError {
    AclError::Storage(e.to_string())
}
