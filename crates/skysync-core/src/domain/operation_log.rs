//! File operation log entries
//!
//! Every transfer, deletion and conflict resolution performed by the engine
//! leaves one [`FileOperationLog`] row, successful or not. The log is the
//! per-file answer to "what happened to this path".

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{AccountId, OperationId, RelativePath};

/// Kind of file operation performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    ConflictResolution,
}

impl FileOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOperation::Upload => "upload",
            FileOperation::Download => "download",
            FileOperation::DeleteLocal => "delete_local",
            FileOperation::DeleteRemote => "delete_remote",
            FileOperation::ConflictResolution => "conflict_resolution",
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(FileOperation::Upload),
            "download" => Ok(FileOperation::Download),
            "delete_local" => Ok(FileOperation::DeleteLocal),
            "delete_remote" => Ok(FileOperation::DeleteRemote),
            "conflict_resolution" => Ok(FileOperation::ConflictResolution),
            other => Err(DomainError::UnknownVariant {
                kind: "file operation",
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome of a logged operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    Failed(String),
    Cancelled,
}

impl OperationOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        OperationOutcome::Failed(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }

    /// Storage discriminant ("success", "failed", "cancelled")
    pub fn kind(&self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::Failed(_) => "failed",
            OperationOutcome::Cancelled => "cancelled",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            OperationOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Rebuild an outcome from its storage discriminant and message.
    ///
    /// # Errors
    /// Returns `DomainError::UnknownVariant` for an unknown discriminant
    pub fn from_parts(kind: &str, message: Option<String>) -> Result<Self, DomainError> {
        match kind {
            "success" => Ok(OperationOutcome::Success),
            "failed" => Ok(OperationOutcome::Failed(message.unwrap_or_default())),
            "cancelled" => Ok(OperationOutcome::Cancelled),
            other => Err(DomainError::UnknownVariant {
                kind: "operation outcome",
                value: other.to_string(),
            }),
        }
    }
}

/// One logged file operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperationLog {
    /// Assigned by the database on insert
    id: Option<OperationId>,
    account_id: AccountId,
    path: RelativePath,
    operation: FileOperation,
    outcome: OperationOutcome,
    bytes: u64,
    duration_ms: Option<u64>,
    timestamp: DateTime<Utc>,
}

impl FileOperationLog {
    pub fn new(
        account_id: AccountId,
        path: RelativePath,
        operation: FileOperation,
        outcome: OperationOutcome,
    ) -> Self {
        Self {
            id: None,
            account_id,
            path,
            operation,
            outcome,
            bytes: 0,
            duration_ms: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> Option<OperationId> {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn operation(&self) -> FileOperation {
        self.operation
    }

    pub fn outcome(&self) -> &OperationOutcome {
        &self.outcome
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
