//! Domain error types
//!
//! Validation failures raised while constructing domain values, plus
//! invalid run-state transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative sync path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid content hash
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Path is not within the account's sync root
    #[error("Path not within sync root: {0}")]
    PathNotInSyncRoot(String),

    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid delta token
    #[error("Invalid delta token: {0}")]
    InvalidDeltaToken(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Unknown enum discriminant read from storage or config
    #[error("Unknown {kind}: {value}")]
    UnknownVariant {
        /// Name of the enum being parsed
        kind: &'static str,
        /// The rejected value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("a/../b".to_string());
        assert_eq!(err.to_string(), "Invalid path: a/../b");

        let err = DomainError::InvalidState {
            from: "Completed".to_string(),
            to: "Scanning".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Completed to Scanning"
        );

        let err = DomainError::UnknownVariant {
            kind: "sync status",
            value: "bogus".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown sync status: bogus");
    }
}
