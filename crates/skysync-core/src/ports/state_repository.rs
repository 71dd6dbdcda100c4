//! Metadata and account repository ports (driven/secondary ports)
//!
//! The persisted metadata store is the engine's single source of truth.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   and don't need domain-level classification.
//! - Every write is a single atomic statement. Callers rely on upsert
//!   idempotency instead of holding locks across calls.
//! - Record, conflict, token, log and selection operations share one trait
//!   to avoid a proliferation of tiny repository traits; accounts live in
//!   their own trait because hosts often source them elsewhere.

use crate::domain::{
    newtypes::{AccountId, ConflictId, DeltaToken, OperationId, RelativePath, RemoteId, UniqueId},
    Account, FileOperationLog, FileRecord, FolderSelection, SyncConflict,
};

/// Persistence of per-path sync metadata
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    // --- File records ---

    /// Insert or update a record.
    ///
    /// Rows are matched by record id and by (account, path); the stored
    /// row takes the given record's id.
    async fn upsert_record(&self, record: &FileRecord) -> anyhow::Result<()>;

    async fn get_record(&self, id: &UniqueId) -> anyhow::Result<Option<FileRecord>>;

    async fn get_record_by_path(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<FileRecord>>;

    async fn get_record_by_remote_id(
        &self,
        account_id: &AccountId,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<FileRecord>>;

    async fn list_records(&self, account_id: &AccountId) -> anyhow::Result<Vec<FileRecord>>;

    async fn delete_record(&self, id: &UniqueId) -> anyhow::Result<()>;

    // --- Conflicts ---

    /// Insert or update a conflict by id
    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()>;

    async fn get_conflict(&self, id: &ConflictId) -> anyhow::Result<Option<SyncConflict>>;

    async fn get_unresolved_conflicts(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<SyncConflict>>;

    async fn get_open_conflict_for_path(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<SyncConflict>>;

    /// Resolved and unresolved conflicts, newest first
    async fn list_conflicts(&self, account_id: &AccountId) -> anyhow::Result<Vec<SyncConflict>>;

    // --- Delta tokens ---

    async fn get_delta_token(&self, account_id: &AccountId)
        -> anyhow::Result<Option<DeltaToken>>;

    /// Replace the account's token
    async fn save_delta_token(
        &self,
        account_id: &AccountId,
        token: &DeltaToken,
    ) -> anyhow::Result<()>;

    // --- File operation log ---

    async fn append_operation(&self, entry: &FileOperationLog) -> anyhow::Result<OperationId>;

    /// Most recent entries first
    async fn get_operations(
        &self,
        account_id: &AccountId,
        limit: u32,
    ) -> anyhow::Result<Vec<FileOperationLog>>;

    // --- Folder selections ---

    async fn get_folder_selections(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<FolderSelection>>;

    /// Insert or update the row for (account, path)
    async fn save_folder_selection(&self, selection: &FolderSelection) -> anyhow::Result<()>;

    async fn delete_folder_selection(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<()>;

    /// Replace every row of the account in one transaction
    async fn replace_folder_selections(
        &self,
        account_id: &AccountId,
        selections: &[FolderSelection],
    ) -> anyhow::Result<()>;
}

/// Persistence of accounts
#[async_trait::async_trait]
pub trait IAccountRepository: Send + Sync {
    async fn save_account(&self, account: &Account) -> anyhow::Result<()>;

    async fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<Account>>;

    async fn list_accounts(&self) -> anyhow::Result<Vec<Account>>;
}
