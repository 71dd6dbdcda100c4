//! Account domain entity
//!
//! An [`Account`] pairs a remote drive with a local sync root and carries
//! the per-account transfer and scheduling settings. Both settings are
//! clamped at this boundary, so every reader sees in-range values.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{errors::DomainError, newtypes::AccountId};

/// Allowed range for concurrent transfers per account
pub const MAX_PARALLEL_RANGE: RangeInclusive<usize> = 1..=10;

/// Allowed range for the scheduled sync interval, in minutes
pub const SYNC_INTERVAL_RANGE: RangeInclusive<u32> = 60..=1440;

/// Default concurrent transfers for a new account
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Default scheduled sync interval, in minutes
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 60;

/// Clamp a max-parallel setting into [`MAX_PARALLEL_RANGE`]
#[must_use]
pub fn clamp_max_parallel(value: usize) -> usize {
    value.clamp(*MAX_PARALLEL_RANGE.start(), *MAX_PARALLEL_RANGE.end())
}

/// Clamp a sync interval into [`SYNC_INTERVAL_RANGE`]
#[must_use]
pub fn clamp_interval_minutes(value: u32) -> u32 {
    value.clamp(*SYNC_INTERVAL_RANGE.start(), *SYNC_INTERVAL_RANGE.end())
}

/// A remote drive account synchronized into a local directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    display_name: String,
    /// Absolute local directory mirrored with the remote drive root
    sync_root: PathBuf,
    max_parallel: usize,
    sync_interval_minutes: u32,
    /// Last run that reached `Completed`
    last_sync: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl Account {
    /// Creates an account with default transfer and schedule settings.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if `sync_root` is not absolute
    pub fn new(
        display_name: impl Into<String>,
        sync_root: impl Into<PathBuf>,
    ) -> Result<Self, DomainError> {
        let sync_root = sync_root.into();
        if !sync_root.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "sync root must be absolute: {}",
                sync_root.display()
            )));
        }

        Ok(Self {
            id: AccountId::new(),
            display_name: display_name.into(),
            sync_root,
            max_parallel: DEFAULT_MAX_PARALLEL,
            sync_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            last_sync: None,
            created_at: Utc::now(),
        })
    }

    /// Reuse a stored id (reconstitution from storage)
    #[must_use]
    pub fn with_id(mut self, id: AccountId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_max_parallel(mut self, value: usize) -> Self {
        self.set_max_parallel(value);
        self
    }

    #[must_use]
    pub fn with_sync_interval_minutes(mut self, value: u32) -> Self {
        self.set_sync_interval_minutes(value);
        self
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn sync_root(&self) -> &Path {
        &self.sync_root
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn sync_interval_minutes(&self) -> u32 {
        self.sync_interval_minutes
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    /// Sets the transfer parallelism, clamped to 1..=10
    pub fn set_max_parallel(&mut self, value: usize) {
        self.max_parallel = clamp_max_parallel(value);
    }

    /// Sets the scheduled interval, clamped to 60..=1440 minutes
    pub fn set_sync_interval_minutes(&mut self, value: u32) {
        self.sync_interval_minutes = clamp_interval_minutes(value);
    }

    pub fn record_sync(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
    }
}
