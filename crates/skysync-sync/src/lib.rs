//! SkySync Sync - Reconciliation and transfer engine
//!
//! Provides:
//! - Local tree scanning and content hashing
//! - Full and delta remote scans
//! - Three-way reconciliation against persisted file records
//! - Bounded parallel transfers with retry and progress reporting
//! - Per-account scheduling
//!
//! ## Modules
//!
//! - [`engine`] - Sync run orchestration (`Idle → Scanning → Syncing → …`)
//! - [`filesystem`] - Local filesystem adapter (SHA-256, partial-file aware)
//! - [`remote_scan`] - Remote snapshot from a full walk or a delta overlay
//! - [`reconciler`] - Pure per-path action classification
//! - [`transfer`] - Worker pool for uploads and downloads
//! - [`progress`] - Atomic counters and progress events
//! - [`selection`] - Selective sync tree persistence
//! - [`scheduler`] - Interval-driven runs per account

pub mod engine;
pub mod filesystem;
pub mod progress;
pub mod reconciler;
pub mod remote_scan;
pub mod scheduler;
pub mod selection;
pub mod transfer;

pub use engine::{SyncEngine, SyncReport};
pub use filesystem::LocalFileSystemAdapter;
pub use reconciler::{reconcile, ActionKind, ReconcileOptions, SyncAction};
pub use scheduler::AccountScheduler;
pub use selection::SelectionService;
pub use transfer::{BatchOutcome, RetryPolicy, TransferItem, TransferService};

use thiserror::Error;

use skysync_conflict::ConflictError;
use skysync_core::{
    domain::{errors::DomainError, newtypes::AccountId},
    ports::RemoteError,
};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The account is not registered in the account repository
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// A run for this account is already in progress
    #[error("Sync already running for account {0}")]
    AlreadyRunning(AccountId),

    /// The drive root could not be listed
    #[error("Remote root not found: {0}")]
    RemoteRootNotFound(String),

    /// The local sync root is missing or not a directory
    #[error("Sync root not found: {0}")]
    SyncRootNotFound(String),

    /// A remote call failed with a non-retryable error
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// Local scan, hash or move failed
    #[error("Local filesystem error: {0}")]
    LocalFs(String),

    /// The metadata store is unavailable
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// Conflict resolution failed
    #[error("Conflict resolution error: {0}")]
    Conflict(ConflictError),

    /// A domain-level error propagated from skysync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),

    /// The run observed its cancellation token
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    pub(crate) fn local_fs(context: impl std::fmt::Display, error: anyhow::Error) -> Self {
        SyncError::LocalFs(format!("{context}: {error:#}"))
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Cancelled => SyncError::Cancelled,
            other => SyncError::Remote(other),
        }
    }
}

impl From<ConflictError> for SyncError {
    fn from(error: ConflictError) -> Self {
        if error.is_cancelled() {
            SyncError::Cancelled
        } else {
            SyncError::Conflict(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_cancellation_maps_to_cancelled() {
        let err: SyncError = RemoteError::Cancelled.into();
        assert!(err.is_cancelled());

        let err: SyncError = RemoteError::Fatal("quota".into()).into();
        assert!(matches!(err, SyncError::Remote(RemoteError::Fatal(_))));
    }

    #[test]
    fn test_conflict_cancellation_maps_to_cancelled() {
        let err: SyncError = ConflictError::Remote(RemoteError::Cancelled).into();
        assert!(err.is_cancelled());
    }
}
