//! SQLite implementation of the repository ports
//!
//! ## Type Mapping
//!
//! | Domain Type                  | SQL Type | Strategy                                   |
//! |------------------------------|----------|--------------------------------------------|
//! | UniqueId, AccountId, ConflictId | TEXT  | UUID string via `Display` / `FromStr`      |
//! | RelativePath                 | TEXT     | Normalized string, re-validated on read    |
//! | RemoteId, FileHash, DeltaToken | TEXT   | Inner string, re-validated on read         |
//! | DateTime<Utc>                | TEXT     | RFC 3339, microseconds, `Z` suffix         |
//! | SyncStatus, SyncDirection    | TEXT     | snake_case discriminant                    |
//! | ConflictStrategy             | TEXT     | snake_case discriminant                    |
//! | OperationOutcome             | TEXT     | discriminant + nullable `message` column   |
//!
//! Entities with private fields are rebuilt through their serde
//! representation, so every stored value goes through the same validation
//! as a freshly constructed one.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use skysync_core::domain::{
    newtypes::{AccountId, ConflictId, DeltaToken, OperationId, RelativePath, RemoteId, UniqueId},
    Account, FileOperation, FileOperationLog, FileRecord, FolderSelection, OperationOutcome,
    SyncConflict, SyncDirection, SyncStatus,
};
use skysync_core::ports::{IAccountRepository, IStateRepository};

use crate::CacheError;

/// SQLite-backed implementation of [`IStateRepository`] and [`IAccountRepository`]
#[derive(Clone)]
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of records of an account in `status`
    pub async fn count_records_by_status(
        &self,
        account_id: &AccountId,
        status: SyncStatus,
    ) -> Result<u64, CacheError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_records WHERE account_id = ? AND status = ?",
        )
        .bind(account_id.to_string())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

// ============================================================================
// Conversion helpers
// ============================================================================

fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn fmt_optional_datetime(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(fmt_datetime)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn from_json<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    what: &str,
) -> Result<T, CacheError> {
    serde_json::from_value(value)
        .map_err(|e| CacheError::SerializationError(format!("Invalid stored {what}: {e}")))
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn file_record_from_row(row: &SqliteRow) -> Result<FileRecord, CacheError> {
    let status: String = row.try_get("status")?;
    let direction: String = row.try_get("last_direction")?;
    let pending_remote = row
        .try_get::<Option<String>, _>("pending_remote")?
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()
        .map_err(|e| CacheError::SerializationError(format!("Invalid pending remote: {e}")))?;
    // Reject unknown discriminants with a precise message before serde sees them
    SyncStatus::from_str(&status)?;
    SyncDirection::from_str(&direction)?;

    let value = json!({
        "id": row.try_get::<String, _>("id")?,
        "account_id": row.try_get::<String, _>("account_id")?,
        "path": row.try_get::<String, _>("path")?,
        "remote_id": row.try_get::<Option<String>, _>("remote_id")?,
        "size": to_u64(row.try_get::<i64, _>("size_bytes")?),
        "local_modified": row.try_get::<Option<String>, _>("local_modified")?,
        "remote_modified": row.try_get::<Option<String>, _>("remote_modified")?,
        "local_hash": row.try_get::<Option<String>, _>("local_hash")?,
        "remote_etag": row.try_get::<Option<String>, _>("remote_etag")?,
        "remote_ctag": row.try_get::<Option<String>, _>("remote_ctag")?,
        "status": status,
        "last_direction": direction,
        "last_error": row.try_get::<Option<String>, _>("last_error")?,
        "last_synced_at": row.try_get::<Option<String>, _>("last_synced_at")?,
        "updated_at": row.try_get::<String, _>("updated_at")?,
        "pending_remote": pending_remote,
    });
    from_json(value, "file record")
}

fn account_from_row(row: &SqliteRow) -> Result<Account, CacheError> {
    let value = json!({
        "id": row.try_get::<String, _>("id")?,
        "display_name": row.try_get::<String, _>("display_name")?,
        "sync_root": row.try_get::<String, _>("sync_root")?,
        "max_parallel": to_u64(row.try_get::<i64, _>("max_parallel")?),
        "sync_interval_minutes": to_u64(row.try_get::<i64, _>("sync_interval_minutes")?),
        "last_sync": row.try_get::<Option<String>, _>("last_sync")?,
        "created_at": row.try_get::<String, _>("created_at")?,
    });
    from_json(value, "account")
}

fn conflict_from_row(row: &SqliteRow) -> Result<SyncConflict, CacheError> {
    let value = json!({
        "id": row.try_get::<String, _>("id")?,
        "account_id": row.try_get::<String, _>("account_id")?,
        "path": row.try_get::<String, _>("path")?,
        "local": {
            "size": to_u64(row.try_get::<i64, _>("local_size")?),
            "modified": row.try_get::<Option<String>, _>("local_modified")?,
        },
        "remote": {
            "size": to_u64(row.try_get::<i64, _>("remote_size")?),
            "modified": row.try_get::<Option<String>, _>("remote_modified")?,
        },
        "detected_at": row.try_get::<String, _>("detected_at")?,
        "strategy": row.try_get::<String, _>("strategy")?,
        "resolved": row.try_get::<bool, _>("resolved")?,
        "resolved_at": row.try_get::<Option<String>, _>("resolved_at")?,
    });
    from_json(value, "conflict")
}

fn operation_from_row(row: &SqliteRow) -> Result<FileOperationLog, CacheError> {
    let account_id = AccountId::from_str(&row.try_get::<String, _>("account_id")?)?;
    let path = RelativePath::new(row.try_get::<String, _>("path")?)?;
    let operation = FileOperation::from_str(&row.try_get::<String, _>("operation")?)?;
    let outcome = OperationOutcome::from_parts(
        &row.try_get::<String, _>("outcome")?,
        row.try_get("message")?,
    )?;

    let mut entry = FileOperationLog::new(account_id, path, operation, outcome)
        .with_id(OperationId::new(row.try_get("id")?))
        .with_bytes(to_u64(row.try_get("bytes")?))
        .with_timestamp(parse_datetime(&row.try_get::<String, _>("timestamp")?)?);
    if let Some(ms) = row.try_get::<Option<i64>, _>("duration_ms")? {
        entry = entry.with_duration_ms(to_u64(ms));
    }
    Ok(entry)
}

fn selection_from_row(row: &SqliteRow) -> Result<FolderSelection, CacheError> {
    Ok(FolderSelection::new(
        AccountId::from_str(&row.try_get::<String, _>("account_id")?)?,
        RelativePath::new(row.try_get::<String, _>("path")?)?,
        row.try_get("is_selected")?,
    ))
}

fn collect<T>(
    rows: &[SqliteRow],
    map: fn(&SqliteRow) -> Result<T, CacheError>,
) -> anyhow::Result<Vec<T>> {
    rows.iter()
        .map(|row| map(row).map_err(anyhow::Error::from))
        .collect()
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    async fn upsert_record(&self, record: &FileRecord) -> anyhow::Result<()> {
        let id = record.id().to_string();
        let pending_remote = record
            .pending_remote()
            .map(serde_json::to_string)
            .transpose()?;

        // REPLACE drops any row clashing on id or on (account_id, path)
        sqlx::query(
            "INSERT OR REPLACE INTO file_records \
             (id, account_id, path, remote_id, size_bytes, local_modified, remote_modified, \
              local_hash, remote_etag, remote_ctag, status, last_direction, last_error, \
              last_synced_at, updated_at, pending_remote) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(record.account_id().to_string())
        .bind(record.path().as_str())
        .bind(record.remote_id().map(RemoteId::as_str))
        .bind(to_i64(record.size()))
        .bind(fmt_optional_datetime(record.local_modified()))
        .bind(fmt_optional_datetime(record.remote_modified()))
        .bind(record.local_hash().map(|h| h.as_str()))
        .bind(record.remote_etag())
        .bind(record.remote_ctag())
        .bind(record.status().as_str())
        .bind(record.last_direction().as_str())
        .bind(record.last_error())
        .bind(fmt_optional_datetime(record.last_synced_at()))
        .bind(fmt_datetime(record.updated_at()))
        .bind(pending_remote)
        .execute(&self.pool)
        .await?;

        tracing::trace!(record_id = %id, path = %record.path(), status = %record.status(), "Upserted file record");
        Ok(())
    }

    async fn get_record(&self, id: &UniqueId) -> anyhow::Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM file_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(file_record_from_row).transpose()?)
    }

    async fn get_record_by_path(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM file_records WHERE account_id = ? AND path = ?")
            .bind(account_id.to_string())
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(file_record_from_row).transpose()?)
    }

    async fn get_record_by_remote_id(
        &self,
        account_id: &AccountId,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT * FROM file_records WHERE account_id = ? AND remote_id = ? \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(account_id.to_string())
        .bind(remote_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(file_record_from_row).transpose()?)
    }

    async fn list_records(&self, account_id: &AccountId) -> anyhow::Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT * FROM file_records WHERE account_id = ? ORDER BY path")
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        collect(&rows, file_record_from_row)
    }

    async fn delete_record(&self, id: &UniqueId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM file_records WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        tracing::trace!(record_id = %id, "Deleted file record");
        Ok(())
    }

    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO conflicts \
             (id, account_id, path, local_size, local_modified, remote_size, remote_modified, \
              detected_at, strategy, resolved, resolved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conflict.id().to_string())
        .bind(conflict.account_id().to_string())
        .bind(conflict.path().as_str())
        .bind(to_i64(conflict.local().size))
        .bind(fmt_optional_datetime(conflict.local().modified))
        .bind(to_i64(conflict.remote().size))
        .bind(fmt_optional_datetime(conflict.remote().modified))
        .bind(fmt_datetime(conflict.detected_at()))
        .bind(conflict.strategy().as_str())
        .bind(conflict.is_resolved())
        .bind(fmt_optional_datetime(conflict.resolved_at()))
        .execute(&self.pool)
        .await?;

        tracing::trace!(conflict_id = %conflict.id(), resolved = conflict.is_resolved(), "Saved conflict");
        Ok(())
    }

    async fn get_conflict(&self, id: &ConflictId) -> anyhow::Result<Option<SyncConflict>> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(conflict_from_row).transpose()?)
    }

    async fn get_unresolved_conflicts(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<SyncConflict>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE account_id = ? AND resolved = 0 \
             ORDER BY detected_at ASC",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, conflict_from_row)
    }

    async fn get_open_conflict_for_path(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<SyncConflict>> {
        let row = sqlx::query(
            "SELECT * FROM conflicts WHERE account_id = ? AND path = ? AND resolved = 0 \
             ORDER BY detected_at DESC LIMIT 1",
        )
        .bind(account_id.to_string())
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(conflict_from_row).transpose()?)
    }

    async fn list_conflicts(&self, account_id: &AccountId) -> anyhow::Result<Vec<SyncConflict>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE account_id = ? ORDER BY detected_at DESC",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, conflict_from_row)
    }

    async fn get_delta_token(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Option<DeltaToken>> {
        let token: Option<String> =
            sqlx::query_scalar("SELECT token FROM delta_tokens WHERE account_id = ?")
                .bind(account_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(token.map(DeltaToken::new).transpose().map_err(CacheError::from)?)
    }

    async fn save_delta_token(
        &self,
        account_id: &AccountId,
        token: &DeltaToken,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO delta_tokens (account_id, token, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(account_id) DO UPDATE SET token = excluded.token, \
             updated_at = excluded.updated_at",
        )
        .bind(account_id.to_string())
        .bind(token.as_str())
        .bind(fmt_datetime(Utc::now()))
        .execute(&self.pool)
        .await?;

        tracing::debug!(account_id = %account_id, "Delta token committed");
        Ok(())
    }

    async fn append_operation(&self, entry: &FileOperationLog) -> anyhow::Result<OperationId> {
        let result = sqlx::query(
            "INSERT INTO operation_log \
             (account_id, path, operation, outcome, message, bytes, duration_ms, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.account_id().to_string())
        .bind(entry.path().as_str())
        .bind(entry.operation().as_str())
        .bind(entry.outcome().kind())
        .bind(entry.outcome().message())
        .bind(to_i64(entry.bytes()))
        .bind(entry.duration_ms().map(to_i64))
        .bind(fmt_datetime(entry.timestamp()))
        .execute(&self.pool)
        .await?;

        Ok(OperationId::new(result.last_insert_rowid()))
    }

    async fn get_operations(
        &self,
        account_id: &AccountId,
        limit: u32,
    ) -> anyhow::Result<Vec<FileOperationLog>> {
        let rows = sqlx::query(
            "SELECT * FROM operation_log WHERE account_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(account_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, operation_from_row)
    }

    async fn get_folder_selections(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<FolderSelection>> {
        let rows = sqlx::query(
            "SELECT account_id, path, is_selected FROM folder_selections \
             WHERE account_id = ? ORDER BY path",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, selection_from_row)
    }

    async fn save_folder_selection(&self, selection: &FolderSelection) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO folder_selections (account_id, path, is_selected, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(account_id, path) DO UPDATE SET is_selected = excluded.is_selected, \
             updated_at = excluded.updated_at",
        )
        .bind(selection.account_id.to_string())
        .bind(selection.path.as_str())
        .bind(selection.is_selected)
        .bind(fmt_datetime(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_folder_selection(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM folder_selections WHERE account_id = ? AND path = ?")
            .bind(account_id.to_string())
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_folder_selections(
        &self,
        account_id: &AccountId,
        selections: &[FolderSelection],
    ) -> anyhow::Result<()> {
        let now = fmt_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM folder_selections WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&mut *tx)
            .await?;

        for selection in selections {
            sqlx::query(
                "INSERT OR REPLACE INTO folder_selections (account_id, path, is_selected, updated_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(account_id.to_string())
            .bind(selection.path.as_str())
            .bind(selection.is_selected)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(account_id = %account_id, rows = selections.len(), "Replaced folder selections");
        Ok(())
    }
}

// ============================================================================
// IAccountRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IAccountRepository for SqliteStateRepository {
    async fn save_account(&self, account: &Account) -> anyhow::Result<()> {
        let sync_root = account
            .sync_root()
            .to_str()
            .ok_or_else(|| {
                CacheError::SerializationError(format!(
                    "sync root is not valid UTF-8: {}",
                    account.sync_root().display()
                ))
            })?
            .to_string();

        sqlx::query(
            "INSERT INTO accounts \
             (id, display_name, sync_root, max_parallel, sync_interval_minutes, last_sync, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, \
             sync_root = excluded.sync_root, max_parallel = excluded.max_parallel, \
             sync_interval_minutes = excluded.sync_interval_minutes, last_sync = excluded.last_sync",
        )
        .bind(account.id().to_string())
        .bind(account.display_name())
        .bind(sync_root)
        .bind(to_i64(account.max_parallel() as u64))
        .bind(i64::from(account.sync_interval_minutes()))
        .bind(fmt_optional_datetime(account.last_sync()))
        .bind(fmt_datetime(account.created_at()))
        .execute(&self.pool)
        .await?;

        tracing::debug!(account_id = %account.id(), "Saved account");
        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn list_accounts(&self) -> anyhow::Result<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        collect(&rows, account_from_row)
    }
}
