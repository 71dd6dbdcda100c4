//! OperationLogger - file operation log service
//!
//! Wraps `IStateRepository::append_operation()` with convenience methods for
//! each kind of logged operation. All methods are non-fatal: persistence
//! errors are logged via `tracing::warn!` but never propagated.

use std::sync::Arc;
use std::time::Duration;

use skysync_core::{
    domain::{
        newtypes::{AccountId, OperationId, RelativePath},
        ConflictStrategy, FileOperation, FileOperationLog, OperationOutcome,
    },
    ports::IStateRepository,
};

/// Writes `FileOperationLog` entries for the sync services.
///
/// Every entry is also emitted as a structured `tracing` event on the
/// `skysync::operations` target.
#[derive(Clone)]
pub struct OperationLogger {
    state_repo: Arc<dyn IStateRepository>,
}

impl OperationLogger {
    pub fn new(state_repo: Arc<dyn IStateRepository>) -> Self {
        Self { state_repo }
    }

    /// Persist an entry, swallowing errors with a tracing warning.
    ///
    /// Returns the id assigned by the store, or `None` if the write failed.
    pub async fn record(&self, entry: &FileOperationLog) -> Option<OperationId> {
        match entry.outcome() {
            OperationOutcome::Failed(message) => tracing::warn!(
                target: "skysync::operations",
                account_id = %entry.account_id(),
                path = %entry.path(),
                operation = %entry.operation(),
                error = %message,
                "File operation failed"
            ),
            outcome => tracing::info!(
                target: "skysync::operations",
                account_id = %entry.account_id(),
                path = %entry.path(),
                operation = %entry.operation(),
                outcome = outcome.kind(),
                bytes = entry.bytes(),
                duration_ms = entry.duration_ms(),
                "File operation"
            ),
        }

        match self.state_repo.append_operation(entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, path = %entry.path(), "Failed to save operation log entry");
                None
            }
        }
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Log a completed upload or download.
    pub async fn log_transfer(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        operation: FileOperation,
        bytes: u64,
        elapsed: Duration,
    ) {
        let entry = FileOperationLog::new(
            account_id,
            path.clone(),
            operation,
            OperationOutcome::Success,
        )
        .with_bytes(bytes)
        .with_duration_ms(duration_ms(elapsed));
        self.record(&entry).await;
    }

    pub async fn log_upload(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        bytes: u64,
        elapsed: Duration,
    ) {
        self.log_transfer(account_id, path, FileOperation::Upload, bytes, elapsed)
            .await;
    }

    pub async fn log_download(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        bytes: u64,
        elapsed: Duration,
    ) {
        self.log_transfer(account_id, path, FileOperation::Download, bytes, elapsed)
            .await;
    }

    // ========================================================================
    // Deletions
    // ========================================================================

    /// Log a propagated deletion. `operation` is `DeleteLocal` or `DeleteRemote`.
    pub async fn log_delete(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        operation: FileOperation,
    ) {
        let entry = FileOperationLog::new(
            account_id,
            path.clone(),
            operation,
            OperationOutcome::Success,
        );
        self.record(&entry).await;
    }

    // ========================================================================
    // Conflicts, failures and cancellations
    // ========================================================================

    /// Log a conflict resolved with `strategy`.
    pub async fn log_conflict_resolution(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        strategy: ConflictStrategy,
        bytes: u64,
        elapsed: Duration,
    ) {
        tracing::info!(
            target: "skysync::operations",
            account_id = %account_id,
            path = %path,
            strategy = %strategy,
            "Conflict resolved"
        );
        let entry = FileOperationLog::new(
            account_id,
            path.clone(),
            FileOperation::ConflictResolution,
            OperationOutcome::Success,
        )
        .with_bytes(bytes)
        .with_duration_ms(duration_ms(elapsed));
        self.record(&entry).await;
    }

    pub async fn log_failure(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        operation: FileOperation,
        message: impl Into<String>,
    ) {
        let entry = FileOperationLog::new(
            account_id,
            path.clone(),
            operation,
            OperationOutcome::failed(message),
        );
        self.record(&entry).await;
    }

    pub async fn log_cancelled(
        &self,
        account_id: AccountId,
        path: &RelativePath,
        operation: FileOperation,
    ) {
        let entry = FileOperationLog::new(
            account_id,
            path.clone(),
            operation,
            OperationOutcome::Cancelled,
        );
        self.record(&entry).await;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Most recent entries first; empty if the store cannot be read.
    pub async fn recent(&self, account_id: &AccountId, limit: u32) -> Vec<FileOperationLog> {
        match self.state_repo.get_operations(account_id, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, account_id = %account_id, "Failed to read operation log");
                Vec::new()
            }
        }
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
