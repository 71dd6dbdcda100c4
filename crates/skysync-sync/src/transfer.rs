//! File transfer service
//!
//! Runs uploads and downloads on a bounded worker pool
//! (`Semaphore` + `JoinSet`). Each file ends in exactly one outcome:
//!
//! - **completed**: the FileRecord is upserted as `Synced` with a fresh
//!   baseline and an operation log entry is written
//! - **failed**: the FileRecord is marked `Failed`, the failure is logged,
//!   the batch continues
//! - **cancelled**: nothing is written for the file; the batch returns
//!   [`SyncError::Cancelled`]
//!
//! Transient remote errors are retried with exponential backoff before a
//! file counts as failed. Downloads land in a partial sibling first and are
//! renamed into place once complete.

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use skysync_audit::OperationLogger;
use skysync_core::{
    config::SyncConfig,
    domain::{
        account::clamp_max_parallel,
        newtypes::{AccountId, FileHash, RelativePath, RemoteId},
        Account, FileOperation, FileRecord, SyncBaseline, SyncDirection,
    },
    ports::{
        partial_path, ILocalFileSystem, IRemoteDrive, IStateRepository, RemoteError, RemoteItem,
        TransferProgressFn,
    },
};

use crate::{progress::ProgressTracker, SyncError};

/// Upper bound for a single backoff delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Retry budget for transient remote errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.transfer_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// `base_delay * 2^attempt`, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Retry `f` while it fails with a transient error, sleeping between
/// attempts. Cancellation interrupts the sleep.
async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, RemoteError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// One file to move
#[derive(Debug, Clone, PartialEq)]
pub struct TransferItem {
    pub path: RelativePath,
    pub direction: SyncDirection,
    pub size: u64,
    /// Content hash from the local scan (uploads)
    pub local_hash: Option<FileHash>,
    /// Remote metadata; required for downloads
    pub remote: Option<RemoteItem>,
}

impl TransferItem {
    pub fn upload(path: RelativePath, size: u64, local_hash: Option<FileHash>) -> Self {
        Self {
            path,
            direction: SyncDirection::Upload,
            size,
            local_hash,
            remote: None,
        }
    }

    pub fn download(remote: RemoteItem) -> Self {
        Self {
            path: remote.path.clone(),
            direction: SyncDirection::Download,
            size: remote.size,
            local_hash: None,
            remote: Some(remote),
        }
    }

    fn operation(&self) -> FileOperation {
        match self.direction {
            SyncDirection::Download => FileOperation::Download,
            _ => FileOperation::Upload,
        }
    }
}

/// Totals of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub completed: u64,
    pub failed: u64,
    pub completed_bytes: u64,
}

impl BatchOutcome {
    pub fn total(&self) -> u64 {
        self.completed + self.failed
    }

    fn merge(&mut self, other: BatchOutcome) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.completed_bytes += other.completed_bytes;
    }
}

enum FileOutcome {
    Completed(u64),
    Failed,
    Cancelled,
    /// The metadata store failed; the whole batch stops
    Fatal(SyncError),
}

/// Uploads and downloads with a bounded worker pool
#[derive(Clone)]
pub struct TransferService {
    remote: Arc<dyn IRemoteDrive>,
    local_fs: Arc<dyn ILocalFileSystem>,
    state_repo: Arc<dyn IStateRepository>,
    operations: OperationLogger,
    retry: RetryPolicy,
}

impl TransferService {
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        local_fs: Arc<dyn ILocalFileSystem>,
        state_repo: Arc<dyn IStateRepository>,
        retry: RetryPolicy,
    ) -> Self {
        let operations = OperationLogger::new(Arc::clone(&state_repo));
        Self {
            remote,
            local_fs,
            state_repo,
            operations,
            retry,
        }
    }

    /// Upload `files`; returns `(completed_count, completed_bytes)`.
    pub async fn execute_uploads(
        &self,
        account: &Account,
        files: Vec<TransferItem>,
        max_parallel: usize,
        progress: &Arc<ProgressTracker>,
        cancel: &CancellationToken,
    ) -> Result<(u64, u64), SyncError> {
        let files = files
            .into_iter()
            .filter(|f| f.direction == SyncDirection::Upload)
            .collect();
        let outcome = self
            .execute(account, files, max_parallel, progress, cancel)
            .await?;
        Ok((outcome.completed, outcome.completed_bytes))
    }

    /// Download `files`; returns `(completed_count, completed_bytes)`.
    pub async fn execute_downloads(
        &self,
        account: &Account,
        files: Vec<TransferItem>,
        max_parallel: usize,
        progress: &Arc<ProgressTracker>,
        cancel: &CancellationToken,
    ) -> Result<(u64, u64), SyncError> {
        let files = files
            .into_iter()
            .filter(|f| f.direction == SyncDirection::Download)
            .collect();
        let outcome = self
            .execute(account, files, max_parallel, progress, cancel)
            .await?;
        Ok((outcome.completed, outcome.completed_bytes))
    }

    /// Run a mixed batch with at most `max_parallel` (clamped to 1-10)
    /// transfers in flight.
    ///
    /// Returns [`SyncError::Cancelled`] if `cancel` fired; files that had
    /// already completed keep their `Synced` records. A storage failure
    /// stops the batch and is returned as-is.
    #[tracing::instrument(skip_all, fields(account_id = %account.id(), files = items.len()))]
    pub async fn execute(
        &self,
        account: &Account,
        items: Vec<TransferItem>,
        max_parallel: usize,
        progress: &Arc<ProgressTracker>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, SyncError> {
        let max_parallel = clamp_max_parallel(max_parallel);
        progress.add_planned(
            items.len() as u64,
            items.iter().map(|i| i.size).sum::<u64>(),
        );
        debug!(max_parallel, "Starting transfer batch");

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let account = Arc::new(account.clone());
        let batch_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();

        for item in items {
            let permit = tokio::select! {
                _ = batch_cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let service = self.clone();
            let account = Arc::clone(&account);
            let progress = Arc::clone(progress);
            let cancel = batch_cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                service.run_one(&account, item, &progress, &cancel).await
            });
        }

        let mut outcome = BatchOutcome::default();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(FileOutcome::Completed(bytes)) => outcome.merge(BatchOutcome {
                    completed: 1,
                    failed: 0,
                    completed_bytes: bytes,
                }),
                Ok(FileOutcome::Failed) => outcome.failed += 1,
                Ok(FileOutcome::Cancelled) => {}
                Ok(FileOutcome::Fatal(e)) => {
                    if fatal.is_none() {
                        error!(error = %e, "Metadata store failed, stopping transfer batch");
                        batch_cancel.cancel();
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Transfer task panicked");
                    outcome.failed += 1;
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if cancel.is_cancelled() {
            info!(
                completed = outcome.completed,
                failed = outcome.failed,
                "Transfer batch cancelled"
            );
            return Err(SyncError::Cancelled);
        }

        info!(
            completed = outcome.completed,
            failed = outcome.failed,
            bytes = outcome.completed_bytes,
            "Transfer batch finished"
        );
        Ok(outcome)
    }

    async fn run_one(
        &self,
        account: &Account,
        item: TransferItem,
        progress: &Arc<ProgressTracker>,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let reported = Arc::new(AtomicU64::new(0));
        let on_bytes = progress.byte_progress(Arc::clone(&reported));
        let started = Instant::now();
        progress.file_started(item.direction, &item.path);

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = self.transfer(account, &item, on_bytes, cancel) => result,
        };

        match result {
            Ok(bytes) => {
                debug!(path = %item.path, direction = %item.direction, bytes, "Transfer complete");
                progress.file_finished(item.direction, Some(bytes), &reported);
                self.operations
                    .log_transfer(account.id(), &item.path, item.operation(), bytes, started.elapsed())
                    .await;
                FileOutcome::Completed(bytes)
            }
            Err(e @ SyncError::Storage(_)) => {
                progress.file_cancelled(item.direction);
                FileOutcome::Fatal(e)
            }
            Err(e) if e.is_cancelled() => {
                progress.file_cancelled(item.direction);
                self.operations
                    .log_cancelled(account.id(), &item.path, item.operation())
                    .await;
                FileOutcome::Cancelled
            }
            Err(e) => {
                warn!(path = %item.path, direction = %item.direction, error = %e, "Transfer failed");
                self.record_failure(account.id(), &item, &e.to_string()).await;
                progress.file_finished(item.direction, None, &reported);
                self.operations
                    .log_failure(account.id(), &item.path, item.operation(), e.to_string())
                    .await;
                FileOutcome::Failed
            }
        }
    }

    async fn transfer(
        &self,
        account: &Account,
        item: &TransferItem,
        progress: TransferProgressFn,
        cancel: &CancellationToken,
    ) -> Result<u64, SyncError> {
        match item.direction {
            SyncDirection::Download => self.download(account, item, progress, cancel).await,
            _ => self.upload(account, item, progress, cancel).await,
        }
    }

    async fn upload(
        &self,
        account: &Account,
        item: &TransferItem,
        progress: TransferProgressFn,
        cancel: &CancellationToken,
    ) -> Result<u64, SyncError> {
        let local_path = item.path.to_local(account.sync_root());
        let state = self
            .local_fs
            .get_state(&local_path)
            .await
            .map_err(|e| SyncError::local_fs(format!("stat {}", local_path.display()), e))?;
        if !state.is_regular_file() {
            return Err(SyncError::LocalFs(format!(
                "local file disappeared: {}",
                item.path
            )));
        }

        let hash = match &item.local_hash {
            Some(hash) => hash.clone(),
            None => self
                .local_fs
                .compute_hash(&local_path, cancel)
                .await
                .map_err(|e| SyncError::local_fs(format!("hash {}", local_path.display()), e))?,
        };

        let remote = &self.remote;
        let account_id = account.id();
        let (local_path_ref, remote_path) = (&local_path, &item.path);
        let uploaded = with_retry(&self.retry, "upload", cancel, || {
            let progress = Arc::clone(&progress);
            async move {
                remote
                    .upload_file(account_id, local_path_ref, remote_path, progress, cancel)
                    .await
            }
        })
        .await?;

        let baseline = SyncBaseline {
            remote_id: Some(uploaded.id.clone()),
            size: state.size,
            local_hash: Some(hash),
            local_modified: state.modified,
            remote_etag: uploaded.etag,
            remote_ctag: uploaded.ctag,
            remote_modified: uploaded.modified,
        };
        self.commit(account_id, &item.path, Some(&uploaded.id), SyncDirection::Upload, baseline)
            .await?;
        Ok(state.size)
    }

    async fn download(
        &self,
        account: &Account,
        item: &TransferItem,
        progress: TransferProgressFn,
        cancel: &CancellationToken,
    ) -> Result<u64, SyncError> {
        let remote_item = item
            .remote
            .as_ref()
            .ok_or_else(|| SyncError::Remote(RemoteError::NotFound(item.path.to_string())))?;

        let local_path = item.path.to_local(account.sync_root());
        let partial = partial_path(&local_path);
        if let Some(parent) = local_path.parent() {
            self.local_fs
                .create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_fs(format!("mkdir {}", parent.display()), e))?;
        }

        let remote = &self.remote;
        let account_id = account.id();
        let (remote_id, partial_ref) = (&remote_item.id, &partial);
        let downloaded = with_retry(&self.retry, "download", cancel, || {
            let progress = Arc::clone(&progress);
            async move {
                remote
                    .download_file(account_id, remote_id, partial_ref, progress, cancel)
                    .await
            }
        })
        .await;
        if let Err(e) = downloaded {
            if let Err(cleanup) = self.local_fs.delete_file(&partial).await {
                debug!(error = %cleanup, "Could not remove partial download");
            }
            return Err(e.into());
        }

        self.local_fs
            .rename(&partial, &local_path)
            .await
            .map_err(|e| SyncError::local_fs("move download into place", e))?;

        let hash = self
            .local_fs
            .compute_hash(&local_path, cancel)
            .await
            .map_err(|e| SyncError::local_fs(format!("hash {}", local_path.display()), e))?;
        let state = self
            .local_fs
            .get_state(&local_path)
            .await
            .map_err(|e| SyncError::local_fs(format!("stat {}", local_path.display()), e))?;

        let baseline = SyncBaseline {
            remote_id: Some(remote_item.id.clone()),
            size: remote_item.size,
            local_hash: Some(hash),
            local_modified: state.modified,
            remote_etag: remote_item.etag.clone(),
            remote_ctag: remote_item.ctag.clone(),
            remote_modified: remote_item.modified,
        };
        self.commit(
            account_id,
            &item.path,
            Some(&remote_item.id),
            SyncDirection::Download,
            baseline,
        )
        .await?;
        Ok(remote_item.size)
    }

    /// Existing record for the file: same remote id first, then same path.
    async fn find_record(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        remote_id: Option<&RemoteId>,
    ) -> anyhow::Result<Option<FileRecord>> {
        if let Some(remote_id) = remote_id {
            if let Some(record) = self
                .state_repo
                .get_record_by_remote_id(&account_id, remote_id)
                .await?
            {
                return Ok(Some(record));
            }
        }
        self.state_repo.get_record_by_path(&account_id, path).await
    }

    async fn commit(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        remote_id: Option<&RemoteId>,
        direction: SyncDirection,
        baseline: SyncBaseline,
    ) -> Result<(), SyncError> {
        let mut record = match self.find_record(account_id, path, remote_id).await? {
            Some(existing) if existing.path() == path => existing,
            // moved: keep the id, take the new path
            Some(existing) => FileRecord::new(account_id, path.clone()).with_id(existing.id()),
            None => FileRecord::new(account_id, path.clone()),
        };
        record.mark_synced(direction, baseline);
        self.state_repo.upsert_record(&record).await?;
        Ok(())
    }

    async fn record_failure(&self, account_id: AccountId, item: &TransferItem, message: &str) {
        let remote_id = item.remote.as_ref().map(|r| &r.id);
        let result = async {
            let mut record = match self.find_record(account_id, &item.path, remote_id).await? {
                Some(existing) if existing.path() == &item.path => existing,
                _ => {
                    let mut record = FileRecord::new(account_id, item.path.clone());
                    if let Some(remote_id) = remote_id {
                        record.set_remote_id(remote_id.clone());
                    }
                    record
                }
            };
            if let Some(remote) = &item.remote {
                record.set_pending_remote(remote.version());
            }
            record.mark_failed(message);
            self.state_repo.upsert_record(&record).await
        }
        .await;

        if let Err(e) = result {
            warn!(path = %item.path, error = %e, "Failed to record transfer failure");
        }
    }
}
