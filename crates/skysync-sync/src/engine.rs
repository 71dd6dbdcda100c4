//! Sync run orchestration
//!
//! The [`SyncEngine`] drives one run per account through
//! `Idle → Scanning → Syncing → Completed`, or `Failed` / `Cancelled`.
//!
//! ## Sync Flow
//!
//! 1. **Scanning**: load account, delta token and selections; scan the local
//!    tree and the remote drive; reconcile against persisted records
//! 2. **Plan commit**: persist conflicts and pending transfer intents,
//!    adopt identical files, apply deletions, auto-resolve conflicts the
//!    policy covers
//! 3. **Syncing**: run the transfer batch on the worker pool
//! 4. **Bookkeeping**: persist the new delta token, stamp the account
//!
//! The delta token only moves forward once the plan is durable: on success,
//! or on a cancellation that arrived after the plan commit.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use skysync_audit::OperationLogger;
use skysync_conflict::{ConflictResolver, PolicyEngine, ResolveOutcome};
use skysync_core::{
    config::Config,
    domain::{
        newtypes::{AccountId, ConflictId, DeltaToken},
        Account, ConflictSide, ConflictStrategy, FileOperation, FileOperationLog, FileRecord,
        SelectionScope, SyncBaseline, SyncConflict, SyncDirection, SyncProgress, SyncState,
        SyncStatus,
    },
    ports::{IAccountRepository, ILocalFileSystem, IRemoteDrive, IStateRepository, RemoteError},
};

use crate::{
    progress::ProgressTracker,
    reconciler::{reconcile, ActionKind, ReconcileOptions, SyncAction},
    remote_scan::{RemoteScanner, ScanMode},
    transfer::{RetryPolicy, TransferItem, TransferService},
    SyncError,
};

/// Capacity of the progress broadcast channel
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub account_id: AccountId,
    pub scan_mode: ScanMode,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Paths recorded as synced without a transfer
    pub adopted: u64,
    pub deleted_local: u64,
    pub deleted_remote: u64,
    pub conflicts_detected: u64,
    pub conflicts_auto_resolved: u64,
    /// Paths left alone because the local side could not be read
    pub held: u64,
    /// Per-file failures; they never fail the run
    pub failed: u64,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
}

impl SyncReport {
    fn new(account_id: AccountId, scan_mode: ScanMode) -> Self {
        Self {
            account_id,
            scan_mode,
            uploaded: 0,
            downloaded: 0,
            adopted: 0,
            deleted_local: 0,
            deleted_remote: 0,
            conflicts_detected: 0,
            conflicts_auto_resolved: 0,
            held: 0,
            failed: 0,
            bytes_transferred: 0,
            duration_ms: 0,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.uploaded + self.downloaded
    }
}

/// Removes the account's entry from the running map when the run ends
struct RunGuard<'a> {
    running: &'a DashMap<AccountId, CancellationToken>,
    account_id: AccountId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.account_id);
    }
}

/// Bidirectional synchronization engine
///
/// Shared by the scheduler and manual triggers; at most one run per account
/// is active at a time.
pub struct SyncEngine {
    remote: Arc<dyn IRemoteDrive>,
    local_fs: Arc<dyn ILocalFileSystem>,
    state_repo: Arc<dyn IStateRepository>,
    account_repo: Arc<dyn IAccountRepository>,
    scanner: RemoteScanner,
    transfers: TransferService,
    resolver: ConflictResolver,
    operations: OperationLogger,
    policy: PolicyEngine,
    options: ReconcileOptions,
    running: DashMap<AccountId, CancellationToken>,
    progress_tx: broadcast::Sender<SyncProgress>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        local_fs: Arc<dyn ILocalFileSystem>,
        state_repo: Arc<dyn IStateRepository>,
        account_repo: Arc<dyn IAccountRepository>,
        config: &Config,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            scanner: RemoteScanner::new(Arc::clone(&remote)),
            transfers: TransferService::new(
                Arc::clone(&remote),
                Arc::clone(&local_fs),
                Arc::clone(&state_repo),
                RetryPolicy::from_config(&config.sync),
            ),
            resolver: ConflictResolver::new(
                Arc::clone(&remote),
                Arc::clone(&local_fs),
                Arc::clone(&state_repo),
                Arc::clone(&account_repo),
            ),
            operations: OperationLogger::new(Arc::clone(&state_repo)),
            policy: PolicyEngine::from_config(&config.conflicts),
            options: ReconcileOptions {
                propagate_deletions: config.sync.propagate_deletions,
                first_sync_policy: config.sync.first_sync_policy,
            },
            running: DashMap::new(),
            progress_tx,
            remote,
            local_fs,
            state_repo,
            account_repo,
        }
    }

    /// Progress events of every account's runs
    pub fn subscribe(&self) -> broadcast::Receiver<SyncProgress> {
        self.progress_tx.subscribe()
    }

    pub fn is_running(&self, account_id: &AccountId) -> bool {
        self.running.contains_key(account_id)
    }

    /// Cancel the active run of `account_id`; false if none is running
    pub fn cancel(&self, account_id: &AccountId) -> bool {
        match self.running.get(account_id) {
            Some(token) => {
                info!(account_id = %account_id, "Cancelling sync run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one sync pass for `account_id`
    pub async fn start_sync(&self, account_id: AccountId) -> Result<SyncReport, SyncError> {
        self.start_sync_with(account_id, &CancellationToken::new())
            .await
    }

    /// Like [`start_sync`](Self::start_sync), also cancelled when `parent` is
    pub async fn start_sync_with(
        &self,
        account_id: AccountId,
        parent: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let cancel = parent.child_token();
        match self.running.entry(account_id) {
            Entry::Occupied(_) => return Err(SyncError::AlreadyRunning(account_id)),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let _guard = RunGuard {
            running: &self.running,
            account_id,
        };

        let span = info_span!("sync_run", account_id = %account_id);
        self.run(account_id, &cancel).instrument(span).await
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub async fn open_conflicts(&self, account_id: &AccountId) -> Result<Vec<SyncConflict>, SyncError> {
        Ok(self.state_repo.get_unresolved_conflicts(account_id).await?)
    }

    /// All conflicts of the account, resolved ones included
    pub async fn conflict_history(&self, account_id: &AccountId) -> Result<Vec<SyncConflict>, SyncError> {
        Ok(self.state_repo.list_conflicts(account_id).await?)
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        strategy: ConflictStrategy,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome, SyncError> {
        Ok(self.resolver.resolve(conflict_id, strategy, cancel).await?)
    }

    pub async fn recent_operations(&self, account_id: &AccountId, limit: u32) -> Vec<FileOperationLog> {
        self.operations.recent(account_id, limit).await
    }

    // ========================================================================
    // Run
    // ========================================================================

    async fn run(
        &self,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let tracker = Arc::new(ProgressTracker::new(account_id, self.progress_tx.clone()));
        let mut state = SyncState::Idle;
        let mut durable_token = None;

        info!("Sync run started");
        let result = self
            .execute_run(account_id, &mut state, &tracker, &mut durable_token, cancel)
            .await;

        match result {
            Ok(mut report) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    uploaded = report.uploaded,
                    downloaded = report.downloaded,
                    adopted = report.adopted,
                    held = report.held,
                    conflicts = report.conflicts_detected,
                    failed = report.failed,
                    duration_ms = report.duration_ms,
                    "Sync run completed"
                );
                Ok(report)
            }
            Err(SyncError::Cancelled) => {
                if let Some(token) = durable_token {
                    self.commit_token(account_id, &token).await;
                }
                state = state.transition_to(SyncState::Cancelled).unwrap_or(SyncState::Cancelled);
                tracker.emit_message(state, "sync cancelled");
                warn!("Sync run cancelled");
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                state = state.transition_to(SyncState::Failed).unwrap_or(SyncState::Failed);
                tracker.emit_message(state, e.to_string());
                error!(error = %e, "Sync run failed");
                Err(e)
            }
        }
    }

    async fn execute_run(
        &self,
        account_id: AccountId,
        state: &mut SyncState,
        tracker: &Arc<ProgressTracker>,
        durable_token: &mut Option<DeltaToken>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        advance(state, SyncState::Scanning, tracker)?;

        let mut account = self
            .account_repo
            .get_account(&account_id)
            .await?
            .ok_or(SyncError::AccountNotFound(account_id))?;
        let token = self.state_repo.get_delta_token(&account_id).await?;
        let selections = self.state_repo.get_folder_selections(&account_id).await?;
        let scope = SelectionScope::from_selections(&selections);
        let records = self.state_repo.list_records(&account_id).await?;

        let root = account.sync_root().to_path_buf();
        let root_state = self
            .local_fs
            .get_state(&root)
            .await
            .map_err(|e| SyncError::local_fs(format!("stat {}", root.display()), e))?;
        if !root_state.exists || root_state.is_file {
            return Err(SyncError::SyncRootNotFound(root.display().to_string()));
        }

        let local = match self.local_fs.scan_tree(&root, cancel).await {
            Ok(local) => local,
            Err(_) if cancel.is_cancelled() => return Err(SyncError::Cancelled),
            Err(e) => return Err(SyncError::local_fs("local scan", e)),
        };
        let remote = self
            .scanner
            .scan(account_id, token.as_ref(), &records, &scope, cancel)
            .await?;
        debug!(
            local_files = local.files.len(),
            remote_files = remote.snapshot.len(),
            mode = ?remote.mode,
            "Snapshots ready"
        );

        let mut report = SyncReport::new(account_id, remote.mode);
        // an unreadable file looks deleted to the reconciler; hold it
        let (held, actions): (Vec<SyncAction>, Vec<SyncAction>) =
            reconcile(&local.files, &remote.snapshot, &records, &scope, self.options)
                .into_iter()
                .partition(|action| local.is_unreadable(&action.path));
        report.held = held.len() as u64;
        // a remote change behind a held path is replayed from the old token
        let advance_token = !held.iter().any(remote_moved);
        if !held.is_empty() {
            warn!(
                held = held.len(),
                advance_token, "Leaving unreadable local paths untouched"
            );
        }

        let transfers = self
            .commit_plan(&account, actions, &mut report, cancel)
            .await?;
        if advance_token {
            *durable_token = Some(remote.next_token.clone());
        }

        if !transfers.is_empty() {
            advance(state, SyncState::Syncing, tracker)?;
            let outcome = self
                .transfers
                .execute(&account, transfers.clone(), account.max_parallel(), tracker, cancel)
                .await?;
            report.failed += outcome.failed;
            report.bytes_transferred = outcome.completed_bytes;
            self.count_transfers(&account_id, &transfers, &mut report)
                .await?;
        }

        if advance_token {
            self.state_repo
                .save_delta_token(&account_id, &remote.next_token)
                .await?;
        }
        account.record_sync(Utc::now());
        self.account_repo.save_account(&account).await?;

        advance(state, SyncState::Completed, tracker)?;
        Ok(report)
    }

    /// Persist everything the plan decides before any transfer starts and
    /// return the transfer batch.
    async fn commit_plan(
        &self,
        account: &Account,
        actions: Vec<SyncAction>,
        report: &mut SyncReport,
        cancel: &CancellationToken,
    ) -> Result<Vec<TransferItem>, SyncError> {
        let account_id = account.id();
        let mut transfers = Vec::new();
        let mut new_conflicts = Vec::new();

        for action in actions {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match action.kind {
                ActionKind::NoOp => {}
                ActionKind::Upload => {
                    let Some(local) = action.local else { continue };
                    let mut record = action
                        .record
                        .unwrap_or_else(|| FileRecord::new(account_id, action.path.clone()));
                    record.mark_pending(SyncDirection::Upload);
                    self.state_repo.upsert_record(&record).await?;
                    transfers.push(TransferItem::upload(action.path, local.size, Some(local.hash)));
                }
                ActionKind::Download => {
                    let Some(remote) = action.remote else { continue };
                    let mut record = action
                        .record
                        .unwrap_or_else(|| FileRecord::new(account_id, action.path.clone()));
                    record.set_remote_id(remote.id.clone());
                    record.mark_pending_download(remote.version());
                    self.state_repo.upsert_record(&record).await?;
                    transfers.push(TransferItem::download(remote));
                }
                ActionKind::Adopt => {
                    let (Some(local), Some(remote)) = (action.local, action.remote) else {
                        continue;
                    };
                    let mut record = action
                        .record
                        .unwrap_or_else(|| FileRecord::new(account_id, action.path.clone()));
                    record.mark_adopted(SyncBaseline {
                        remote_id: Some(remote.id),
                        size: local.size,
                        local_hash: Some(local.hash),
                        local_modified: local.modified,
                        remote_etag: remote.etag,
                        remote_ctag: remote.ctag,
                        remote_modified: remote.modified,
                    });
                    self.state_repo.upsert_record(&record).await?;
                    report.adopted += 1;
                }
                ActionKind::Conflict => {
                    if let Some(conflict) = self.record_conflict(account_id, action).await? {
                        report.conflicts_detected += 1;
                        new_conflicts.push(conflict);
                    }
                }
                ActionKind::DropRecord => {
                    if let Some(record) = action.record {
                        debug!(path = %record.path(), "Dropping record gone from both sides");
                        self.state_repo.delete_record(&record.id()).await?;
                    }
                }
                ActionKind::DeleteLocal => {
                    if self.delete_local(account, action).await? {
                        report.deleted_local += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                ActionKind::DeleteRemote => {
                    if self.delete_remote(account, action, cancel).await? {
                        report.deleted_remote += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        for conflict in &new_conflicts {
            match self.resolver.apply_policy(conflict, &self.policy, cancel).await {
                Ok(Some(outcome)) if outcome.is_resolved() => report.conflicts_auto_resolved += 1,
                Ok(_) => {}
                Err(e) if e.is_cancelled() => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(path = %conflict.path(), error = %e, "Automatic conflict resolution failed");
                }
            }
        }

        info!(
            transfers = transfers.len(),
            conflicts = report.conflicts_detected,
            adopted = report.adopted,
            "Sync plan committed"
        );
        Ok(transfers)
    }

    /// Save a new conflict and hold its record; `None` if one is already open
    async fn record_conflict(
        &self,
        account_id: AccountId,
        action: SyncAction,
    ) -> Result<Option<SyncConflict>, SyncError> {
        let (Some(local), Some(remote)) = (action.local, action.remote) else {
            return Ok(None);
        };

        let mut record = action
            .record
            .unwrap_or_else(|| FileRecord::new(account_id, action.path.clone()));
        if record.remote_id().is_none() {
            record.set_remote_id(remote.id.clone());
        }
        record.mark_conflicted();
        self.state_repo.upsert_record(&record).await?;

        if self
            .state_repo
            .get_open_conflict_for_path(&account_id, &action.path)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let conflict = SyncConflict::new(
            account_id,
            action.path,
            ConflictSide::new(local.size, local.modified),
            ConflictSide::new(remote.size, remote.modified),
        );
        self.state_repo.save_conflict(&conflict).await?;
        warn!(path = %conflict.path(), conflict_id = %conflict.id(), "Conflict detected");
        Ok(Some(conflict))
    }

    /// Remove a local file deleted remotely; false on a per-file failure
    async fn delete_local(&self, account: &Account, action: SyncAction) -> Result<bool, SyncError> {
        let Some(mut record) = action.record else {
            return Ok(false);
        };
        let local_path = action.path.to_local(account.sync_root());

        match self.local_fs.delete_file(&local_path).await {
            Ok(()) => {
                self.state_repo.delete_record(&record.id()).await?;
                self.operations
                    .log_delete(account.id(), &action.path, FileOperation::DeleteLocal)
                    .await;
                Ok(true)
            }
            Err(e) => {
                warn!(path = %action.path, error = %e, "Local delete failed");
                record.mark_failed(format!("local delete failed: {e}"));
                self.state_repo.upsert_record(&record).await?;
                self.operations
                    .log_failure(account.id(), &action.path, FileOperation::DeleteLocal, e.to_string())
                    .await;
                Ok(false)
            }
        }
    }

    /// Remove a remote file deleted locally; false on a per-file failure
    async fn delete_remote(
        &self,
        account: &Account,
        action: SyncAction,
        cancel: &CancellationToken,
    ) -> Result<bool, SyncError> {
        let Some(mut record) = action.record else {
            return Ok(false);
        };
        let Some(remote) = action.remote else {
            return Ok(false);
        };

        match self.remote.delete_item(account.id(), &remote.id, cancel).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {
                self.state_repo.delete_record(&record.id()).await?;
                self.operations
                    .log_delete(account.id(), &action.path, FileOperation::DeleteRemote)
                    .await;
                Ok(true)
            }
            Err(RemoteError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => {
                warn!(path = %action.path, error = %e, "Remote delete failed");
                record.mark_failed(format!("remote delete failed: {e}"));
                self.state_repo.upsert_record(&record).await?;
                self.operations
                    .log_failure(account.id(), &action.path, FileOperation::DeleteRemote, e.to_string())
                    .await;
                Ok(false)
            }
        }
    }

    /// Split completed transfers by direction from the persisted records
    async fn count_transfers(
        &self,
        account_id: &AccountId,
        transfers: &[TransferItem],
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for item in transfers {
            let Some(record) = self
                .state_repo
                .get_record_by_path(account_id, &item.path)
                .await?
            else {
                continue;
            };
            if record.status() != SyncStatus::Synced {
                continue;
            }
            match item.direction {
                SyncDirection::Upload => report.uploaded += 1,
                SyncDirection::Download => report.downloaded += 1,
                SyncDirection::None => {}
            }
        }
        Ok(())
    }

    async fn commit_token(&self, account_id: AccountId, token: &DeltaToken) {
        match self.state_repo.save_delta_token(&account_id, token).await {
            Ok(()) => debug!("Delta token advanced after cancellation"),
            Err(e) => warn!(error = %e, "Failed to save delta token"),
        }
    }
}

/// True if the remote side of `action` differs from what its record last saw
fn remote_moved(action: &SyncAction) -> bool {
    match (&action.remote, &action.record) {
        (Some(remote), Some(record)) => {
            record.is_remote_changed(remote.etag.as_deref(), remote.ctag.as_deref())
        }
        (Some(_), None) => true,
        (None, Some(record)) => record.remote_id().is_some(),
        (None, None) => false,
    }
}

fn advance(
    state: &mut SyncState,
    target: SyncState,
    tracker: &ProgressTracker,
) -> Result<(), SyncError> {
    *state = state.transition_to(target)?;
    debug!(state = %state, "Sync state changed");
    tracker.emit(*state);
    Ok(())
}
