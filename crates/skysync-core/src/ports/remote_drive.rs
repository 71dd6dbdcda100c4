//! Remote drive port (driven/secondary port)
//!
//! The operations the engine consumes from a cloud drive API. Retries of
//! rate limits inside a single HTTP call belong to the implementation; what
//! reaches the engine is classified by [`RemoteError`] so callers can tell
//! transient failures from fatal ones.
//!
//! ## Design Notes
//!
//! - Every call takes a [`CancellationToken`]; implementations should stop
//!   at their next await point and return [`RemoteError::Cancelled`].
//! - Paths in [`RemoteItem`] are already normalized [`RelativePath`]s
//!   relative to the drive root.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::file_record::RemoteVersion;
use crate::domain::newtypes::{AccountId, DeltaToken, FileHash, RelativePath, RemoteId};

/// Callback receiving the number of bytes transferred so far for one file
pub type TransferProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Errors surfaced by a remote drive implementation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network blip, throttling or 5xx response; worth retrying
    #[error("transient remote error: {0}")]
    Transient(String),

    /// The item or folder does not exist
    #[error("remote item not found: {0}")]
    NotFound(String),

    /// The delta token is no longer accepted; a full scan is required
    #[error("delta token expired")]
    TokenExpired,

    /// The operation observed its cancellation token
    #[error("remote operation cancelled")]
    Cancelled,

    /// Anything else (authorization, quota, malformed response)
    #[error("remote error: {0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RemoteError::Cancelled)
    }
}

/// Normalized metadata of a remote file or folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: RemoteId,
    pub name: String,
    pub path: RelativePath,
    pub parent_id: Option<RemoteId>,
    pub is_folder: bool,
    pub size: u64,
    pub etag: Option<String>,
    pub ctag: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    /// Content hash in the local scanner's format, when the API exposes one
    pub hash: Option<FileHash>,
    /// Set on delta entries that report a removal
    pub is_deleted: bool,
}

impl RemoteItem {
    pub fn is_file(&self) -> bool {
        !self.is_folder && !self.is_deleted
    }

    /// Size and version tags of this item
    pub fn version(&self) -> RemoteVersion {
        RemoteVersion {
            size: self.size,
            etag: self.etag.clone(),
            ctag: self.ctag.clone(),
            modified: self.modified,
        }
    }
}

/// Changes since a delta token, plus the token to use next time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaPage {
    pub items: Vec<RemoteItem>,
    pub delta_token: DeltaToken,
}

/// Cloud drive operations consumed by the sync engine
#[async_trait::async_trait]
pub trait IRemoteDrive: Send + Sync {
    /// The drive root folder
    async fn get_root_item(
        &self,
        account: AccountId,
        cancel: &CancellationToken,
    ) -> Result<RemoteItem, RemoteError>;

    /// Immediate children of a folder
    async fn get_children(
        &self,
        account: AccountId,
        folder_id: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteItem>, RemoteError>;

    async fn get_item(
        &self,
        account: AccountId,
        remote_id: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<RemoteItem, RemoteError>;

    /// Upload (create or replace) `local_path` at `remote_path`
    async fn upload_file(
        &self,
        account: AccountId,
        local_path: &Path,
        remote_path: &RelativePath,
        progress: TransferProgressFn,
        cancel: &CancellationToken,
    ) -> Result<RemoteItem, RemoteError>;

    /// Download the content of `remote_id` into `local_path`
    async fn download_file(
        &self,
        account: AccountId,
        remote_id: &RemoteId,
        local_path: &Path,
        progress: TransferProgressFn,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError>;

    /// All changes since `token`, following pagination to the end
    async fn get_delta(
        &self,
        account: AccountId,
        token: &DeltaToken,
        cancel: &CancellationToken,
    ) -> Result<DeltaPage, RemoteError>;

    /// A token that marks "now" without listing any changes
    async fn latest_delta_token(
        &self,
        account: AccountId,
        cancel: &CancellationToken,
    ) -> Result<DeltaToken, RemoteError>;

    async fn delete_item(
        &self,
        account: AccountId,
        remote_id: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError>;
}
