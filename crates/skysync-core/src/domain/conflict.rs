//! Conflict domain entities
//!
//! A [`SyncConflict`] is created when a path changed on both sides since its
//! last successful sync. Conflicts are never deleted: resolving one marks it
//! resolved so the history stays queryable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{AccountId, ConflictId, RelativePath};

/// How a conflict should be (or was) resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Leave the conflict for the user
    #[default]
    None,
    /// Upload the local file over the remote one
    KeepLocal,
    /// Download the remote file over the local one
    KeepRemote,
    /// Keep the remote file at the path and the local file under a new name
    KeepBoth,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::None => "none",
            ConflictStrategy::KeepLocal => "keep_local",
            ConflictStrategy::KeepRemote => "keep_remote",
            ConflictStrategy::KeepBoth => "keep_both",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "manual" => Ok(ConflictStrategy::None),
            "keep_local" => Ok(ConflictStrategy::KeepLocal),
            "keep_remote" => Ok(ConflictStrategy::KeepRemote),
            "keep_both" => Ok(ConflictStrategy::KeepBoth),
            other => Err(DomainError::UnknownVariant {
                kind: "conflict strategy",
                value: other.to_string(),
            }),
        }
    }
}

/// Size and modification time of one side of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictSide {
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
}

impl ConflictSide {
    pub fn new(size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self { modified, size }
    }
}

/// A path changed on both sides since the last sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    id: ConflictId,
    account_id: AccountId,
    path: RelativePath,
    local: ConflictSide,
    remote: ConflictSide,
    detected_at: DateTime<Utc>,
    strategy: ConflictStrategy,
    resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    /// Creates an unresolved conflict with strategy `None`
    pub fn new(
        account_id: AccountId,
        path: RelativePath,
        local: ConflictSide,
        remote: ConflictSide,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            account_id,
            path,
            local,
            remote,
            detected_at: Utc::now(),
            strategy: ConflictStrategy::None,
            resolved: false,
            resolved_at: None,
        }
    }

    pub fn id(&self) -> ConflictId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn local(&self) -> &ConflictSide {
        &self.local
    }

    pub fn remote(&self) -> &ConflictSide {
        &self.remote
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Marks the conflict resolved with `strategy`.
    ///
    /// Resolving an already resolved conflict keeps the first resolution.
    ///
    /// # Errors
    /// Returns `DomainError::ValidationFailed` for `ConflictStrategy::None`
    pub fn mark_resolved(&mut self, strategy: ConflictStrategy) -> Result<(), DomainError> {
        if strategy == ConflictStrategy::None {
            return Err(DomainError::ValidationFailed(
                "a conflict cannot be resolved with strategy none".to_string(),
            ));
        }
        if self.resolved {
            return Ok(());
        }
        self.strategy = strategy;
        self.resolved = true;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}
