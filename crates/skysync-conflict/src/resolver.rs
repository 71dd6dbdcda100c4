//! Conflict resolution executor
//!
//! Applies resolution strategies by performing the actual file operations:
//! - `KeepLocal`: upload local version to the remote drive
//! - `KeepRemote`: download remote version to replace local
//! - `KeepBoth`: rename local with conflict suffix, download remote
//!
//! After the transfer the file record is re-baselined as `Synced`, the
//! conflict is marked resolved and an operation log entry is written.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skysync_audit::OperationLogger;
use skysync_core::{
    domain::{
        newtypes::{AccountId, ConflictId, RelativePath, RemoteId},
        Account, ConflictStrategy, FileOperation, FileRecord, SyncBaseline, SyncConflict,
        SyncDirection,
    },
    ports::{
        partial_path, IAccountRepository, ILocalFileSystem, IRemoteDrive, IStateRepository,
        TransferProgressFn,
    },
};

use crate::{error::ConflictError, namer::ConflictNamer, policy::PolicyEngine};

/// Result of resolving one conflict
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// The strategy was applied and the conflict is resolved
    Resolved {
        conflict: SyncConflict,
        /// Path of the renamed local file (`KeepBoth` only)
        conflict_copy: Option<RelativePath>,
    },
    /// Strategy `None`: nothing was done, the conflict stays open
    Unchanged,
    /// The conflict had been resolved before
    AlreadyResolved,
    /// `KeepLocal` was requested but the local file is gone
    LocalFileMissing,
    /// No file record (or no remote id for a download) exists for the path
    MetadataMissing,
    /// The conflict's account no longer exists
    AccountMissing,
}

impl ResolveOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolveOutcome::Resolved { .. })
    }
}

/// Result of a batch resolution operation
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub outcomes: Vec<(ConflictId, ResolveOutcome)>,
    pub failed: Vec<(ConflictId, String)>,
}

impl BatchResult {
    pub fn resolved_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_resolved()).count()
    }
}

/// Applies conflict resolutions with real file operations
pub struct ConflictResolver {
    remote: Arc<dyn IRemoteDrive>,
    local_fs: Arc<dyn ILocalFileSystem>,
    state_repo: Arc<dyn IStateRepository>,
    account_repo: Arc<dyn IAccountRepository>,
    operations: OperationLogger,
}

impl ConflictResolver {
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        local_fs: Arc<dyn ILocalFileSystem>,
        state_repo: Arc<dyn IStateRepository>,
        account_repo: Arc<dyn IAccountRepository>,
    ) -> Self {
        let operations = OperationLogger::new(Arc::clone(&state_repo));
        Self {
            remote,
            local_fs,
            state_repo,
            account_repo,
            operations,
        }
    }

    /// Apply `strategy` to the conflict `conflict_id`
    ///
    /// Missing preconditions are reported as [`ResolveOutcome`] variants;
    /// transfer and storage faults are errors and leave the conflict open.
    #[tracing::instrument(skip_all, fields(conflict_id = %conflict_id, strategy = %strategy))]
    pub async fn resolve(
        &self,
        conflict_id: ConflictId,
        strategy: ConflictStrategy,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome, ConflictError> {
        let conflict = self
            .state_repo
            .get_conflict(&conflict_id)
            .await?
            .ok_or(ConflictError::NotFound(conflict_id))?;
        self.resolve_conflict(conflict, strategy, cancel).await
    }

    /// Resolve every open conflict of an account with the same strategy
    ///
    /// Per-conflict failures are collected and never abort the batch;
    /// cancellation stops it.
    pub async fn resolve_all(
        &self,
        account_id: &AccountId,
        strategy: ConflictStrategy,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, ConflictError> {
        let conflicts = self.state_repo.get_unresolved_conflicts(account_id).await?;
        let mut result = BatchResult::default();

        for conflict in conflicts {
            let id = conflict.id();
            match self.resolve_conflict(conflict, strategy, cancel).await {
                Ok(outcome) => result.outcomes.push((id, outcome)),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(conflict_id = %id, error = %e, "Batch resolution failed for conflict");
                    result.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            account_id = %account_id,
            resolved = result.resolved_count(),
            failed = result.failed.len(),
            "Batch conflict resolution finished"
        );
        Ok(result)
    }

    /// Resolve a freshly detected conflict if `policy` picks a strategy for it
    ///
    /// Returns `None` when the policy leaves the conflict to the user.
    pub async fn apply_policy(
        &self,
        conflict: &SyncConflict,
        policy: &PolicyEngine,
        cancel: &CancellationToken,
    ) -> Result<Option<ResolveOutcome>, ConflictError> {
        let strategy = policy.evaluate(conflict.path());
        if strategy == ConflictStrategy::None {
            return Ok(None);
        }
        debug!(path = %conflict.path(), strategy = %strategy, "Auto-resolving conflict");
        self.resolve_conflict(conflict.clone(), strategy, cancel)
            .await
            .map(Some)
    }

    async fn resolve_conflict(
        &self,
        mut conflict: SyncConflict,
        strategy: ConflictStrategy,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome, ConflictError> {
        if conflict.is_resolved() {
            return Ok(ResolveOutcome::AlreadyResolved);
        }
        if strategy == ConflictStrategy::None {
            debug!(path = %conflict.path(), "Manual resolution - no file operations");
            return Ok(ResolveOutcome::Unchanged);
        }

        let Some(account) = self.account_repo.get_account(&conflict.account_id()).await? else {
            return Ok(ResolveOutcome::AccountMissing);
        };
        let Some(mut record) = self
            .state_repo
            .get_record_by_path(&conflict.account_id(), conflict.path())
            .await?
        else {
            return Ok(ResolveOutcome::MetadataMissing);
        };

        info!(
            conflict_id = %conflict.id(),
            strategy = %strategy,
            path = %conflict.path(),
            "Applying conflict resolution"
        );

        let started = Instant::now();
        let mut conflict_copy = None;
        let applied = match self
            .execute_strategy(&account, &mut record, strategy, &mut conflict_copy, cancel)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                if e.is_cancelled() {
                    self.operations
                        .log_cancelled(account.id(), conflict.path(), FileOperation::ConflictResolution)
                        .await;
                } else {
                    self.operations
                        .log_failure(
                            account.id(),
                            conflict.path(),
                            FileOperation::ConflictResolution,
                            e.to_string(),
                        )
                        .await;
                }
                return Err(e);
            }
        };
        let Some(bytes) = applied else {
            return Ok(match strategy {
                ConflictStrategy::KeepLocal => ResolveOutcome::LocalFileMissing,
                _ => ResolveOutcome::MetadataMissing,
            });
        };

        conflict.mark_resolved(strategy)?;
        self.state_repo.upsert_record(&record).await?;
        self.state_repo.save_conflict(&conflict).await?;
        self.operations
            .log_conflict_resolution(
                account.id(),
                conflict.path(),
                strategy,
                bytes,
                started.elapsed(),
            )
            .await;

        info!(conflict_id = %conflict.id(), "Conflict resolved successfully");

        Ok(ResolveOutcome::Resolved {
            conflict,
            conflict_copy,
        })
    }

    /// Run the transfer for `strategy`; `None` means a precondition failed
    async fn execute_strategy(
        &self,
        account: &Account,
        record: &mut FileRecord,
        strategy: ConflictStrategy,
        conflict_copy: &mut Option<RelativePath>,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, ConflictError> {
        match strategy {
            ConflictStrategy::KeepLocal => self.apply_keep_local(account, record, cancel).await,
            ConflictStrategy::KeepRemote => {
                self.apply_keep_remote(account, record, None, cancel).await
            }
            ConflictStrategy::KeepBoth => {
                self.apply_keep_remote(account, record, Some(conflict_copy), cancel)
                    .await
            }
            ConflictStrategy::None => Ok(None),
        }
    }

    /// Keep local version: upload it, overwriting remote.
    ///
    /// Returns `None` if the local file is missing.
    async fn apply_keep_local(
        &self,
        account: &Account,
        record: &mut FileRecord,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, ConflictError> {
        let local_path = record.path().to_local(account.sync_root());
        let state = self
            .local_fs
            .get_state(&local_path)
            .await
            .map_err(|e| ConflictError::LocalFs(format!("stat {}: {e}", local_path.display())))?;
        if !state.is_regular_file() {
            return Ok(None);
        }

        debug!(path = %record.path(), "Applying keep-local: uploading local version");

        let hash = self
            .local_fs
            .compute_hash(&local_path, cancel)
            .await
            .map_err(|e| ConflictError::LocalFs(format!("hash {}: {e}", local_path.display())))?;
        let item = self
            .remote
            .upload_file(account.id(), &local_path, record.path(), no_progress(), cancel)
            .await?;

        record.mark_synced(
            SyncDirection::Upload,
            SyncBaseline {
                remote_id: Some(item.id),
                size: state.size,
                local_hash: Some(hash),
                local_modified: state.modified,
                remote_etag: item.etag,
                remote_ctag: item.ctag,
                remote_modified: item.modified,
            },
        );
        Ok(Some(state.size))
    }

    /// Keep remote version: download and replace local.
    ///
    /// With `keep_local` set (keep-both) the local file is moved aside only
    /// once the download has fully landed in its partial file, so a failed
    /// transfer leaves the original where it was.
    ///
    /// Returns `None` if the record has no remote id to download.
    async fn apply_keep_remote(
        &self,
        account: &Account,
        record: &mut FileRecord,
        keep_local: Option<&mut Option<RelativePath>>,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, ConflictError> {
        let Some(remote_id) = record.remote_id().cloned() else {
            return Ok(None);
        };

        debug!(path = %record.path(), "Applying keep-remote: downloading remote version");

        let item = self.remote.get_item(account.id(), &remote_id, cancel).await?;
        let local_path = record.path().to_local(account.sync_root());
        let partial = self
            .download_partial(account.id(), &item.id, &local_path, cancel)
            .await?;

        if let Some(copy_slot) = keep_local {
            match self.rename_to_conflict_copy(account, record.path()).await {
                Ok(Some(copy)) => *copy_slot = Some(copy),
                Ok(None) => debug!(path = %record.path(), "Keep-both: no local file to preserve"),
                Err(e) => {
                    self.discard_partial(&partial).await;
                    return Err(e);
                }
            }
        }

        self.local_fs
            .rename(&partial, &local_path)
            .await
            .map_err(|e| ConflictError::LocalFs(format!("move download into place: {e}")))?;

        let hash = self
            .local_fs
            .compute_hash(&local_path, cancel)
            .await
            .map_err(|e| ConflictError::LocalFs(format!("hash {}: {e}", local_path.display())))?;
        let state = self
            .local_fs
            .get_state(&local_path)
            .await
            .map_err(|e| ConflictError::LocalFs(format!("stat {}: {e}", local_path.display())))?;

        record.mark_synced(
            SyncDirection::Download,
            SyncBaseline {
                remote_id: Some(item.id),
                size: item.size,
                local_hash: Some(hash),
                local_modified: state.modified,
                remote_etag: item.etag,
                remote_ctag: item.ctag,
                remote_modified: item.modified,
            },
        );
        Ok(Some(item.size))
    }

    /// Move the local file aside under a unique conflict-copy name.
    ///
    /// Returns the new relative path, or `None` if there is no local file.
    async fn rename_to_conflict_copy(
        &self,
        account: &Account,
        path: &RelativePath,
    ) -> Result<Option<RelativePath>, ConflictError> {
        let root = account.sync_root();
        let local_path = path.to_local(root);
        let state = self
            .local_fs
            .get_state(&local_path)
            .await
            .map_err(|e| ConflictError::LocalFs(format!("stat {}: {e}", local_path.display())))?;
        if !state.is_regular_file() {
            return Ok(None);
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| ConflictError::LocalFs(format!("path has no file name: {path}")))?;
        let parent = path.parent().unwrap_or_else(RelativePath::root);

        let mut chosen = None;
        for candidate in ConflictNamer::candidates(file_name, Utc::now()) {
            let candidate_path = parent.join(&candidate)?;
            let exists = self
                .local_fs
                .get_state(&candidate_path.to_local(root))
                .await
                .map_err(|e| ConflictError::LocalFs(e.to_string()))?
                .exists;
            if !exists {
                chosen = Some(candidate_path);
                break;
            }
        }
        let copy = chosen.ok_or_else(|| {
            ConflictError::LocalFs(format!("no free conflict copy name for {path}"))
        })?;

        self.local_fs
            .rename(&local_path, &copy.to_local(root))
            .await
            .map_err(|e| ConflictError::LocalFs(format!("rename local: {e}")))?;

        info!(original = %path, conflict_copy = %copy, "Keep-both: local file renamed");
        Ok(Some(copy))
    }

    /// Download into a partial sibling of `local_path` and return its path
    async fn download_partial(
        &self,
        account_id: AccountId,
        remote_id: &RemoteId,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ConflictError> {
        let partial = partial_path(local_path);
        if let Some(parent) = local_path.parent() {
            self.local_fs
                .create_dir_all(parent)
                .await
                .map_err(|e| ConflictError::LocalFs(format!("create parent: {e}")))?;
        }

        if let Err(e) = self
            .remote
            .download_file(account_id, remote_id, &partial, no_progress(), cancel)
            .await
        {
            self.discard_partial(&partial).await;
            return Err(e.into());
        }
        Ok(partial)
    }

    async fn discard_partial(&self, partial: &Path) {
        if let Err(cleanup) = self.local_fs.delete_file(partial).await {
            debug!(error = %cleanup, "No partial download to clean up");
        }
    }
}

fn no_progress() -> TransferProgressFn {
    Arc::new(|_| {})
}
