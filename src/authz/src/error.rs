//! Error types for the authorization engine

use thiserror::Error;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Setup problem: unknown policy, unregistered collection, bad hierarchy
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A policy produced something outside {grant, skip, predicate}
    #[error("Policy ({policy}) violated its contract during {check}: {reason}")]
    PolicyContractViolation {
        policy: String,
        check: String,
        reason: String,
    },

    /// A write was attempted against a denied or unresolved decision
    #[error("Permission denied: {operation} on {resource_type}")]
    PermissionDenied {
        resource_type: String,
        operation: String,
    },

    /// The storage collaborator could not complete a probe or query
    #[error("Storage probe failed: {0}")]
    StorageProbeFailure(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Build a permission-denied error for a write path
    pub fn denied(resource_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::PermissionDenied {
            resource_type: resource_type.into(),
            operation: operation.into(),
        }
    }

    /// True when this is the expected "forbidden" outcome rather than a fault
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// True when storage failed; never to be read as a denial
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::StorageProbeFailure(_))
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
