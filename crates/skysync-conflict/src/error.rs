//! Error types for the conflict resolver

use thiserror::Error;

use skysync_core::domain::{newtypes::ConflictId, DomainError};
use skysync_core::ports::RemoteError;

/// Errors that can occur during conflict resolution
///
/// Expected absences (account, record, local file) are not errors; they are
/// reported as [`crate::ResolveOutcome`] variants.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Conflict not found in repository
    #[error("conflict not found: {0}")]
    NotFound(ConflictId),

    /// Invalid glob pattern or strategy in a conflict rule
    #[error("invalid conflict rule: {pattern}: {reason}")]
    InvalidRule { pattern: String, reason: String },

    /// Upload, download or metadata lookup on the remote drive failed
    #[error("remote operation failed: {0}")]
    Remote(#[from] RemoteError),

    /// Rename, hash or stat on the local filesystem failed
    #[error("local filesystem error: {0}")]
    LocalFs(String),

    /// A path or state transition was rejected by the domain model
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ConflictError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConflictError::Remote(RemoteError::Cancelled))
    }
}
