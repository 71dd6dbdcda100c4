//! Per-path sync metadata
//!
//! A [`FileRecord`] is the persisted memory of what the engine last agreed
//! on with the remote drive for one path. Its hash and tag fields form the
//! *baseline*: change detection on the next run compares the current local
//! hash and remote tag against them.
//!
//! A download that is planned but not finished also remembers the remote
//! version it is fetching ([`RemoteVersion`]). That version never touches the
//! baseline; it lets a later delta run rebuild the remote side of the path
//! while the delta token has already moved past the change.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{AccountId, FileHash, RelativePath, RemoteId, UniqueId};

/// Sync status of a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Both sides match the baseline
    Synced,
    /// A local change is waiting to be uploaded
    PendingUpload,
    /// A remote change is waiting to be downloaded
    PendingDownload,
    /// Both sides changed; waiting for the conflict resolver
    Conflicted,
    /// The last transfer attempt failed
    Failed,
    /// The path disappeared from both sides
    Deleted,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::PendingUpload => "pending_upload",
            SyncStatus::PendingDownload => "pending_download",
            SyncStatus::Conflicted => "conflicted",
            SyncStatus::Failed => "failed",
            SyncStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending_upload" => Ok(SyncStatus::PendingUpload),
            "pending_download" => Ok(SyncStatus::PendingDownload),
            "conflicted" => Ok(SyncStatus::Conflicted),
            "failed" => Ok(SyncStatus::Failed),
            "deleted" => Ok(SyncStatus::Deleted),
            other => Err(DomainError::UnknownVariant {
                kind: "sync status",
                value: other.to_string(),
            }),
        }
    }
}

/// Direction of the last completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    #[default]
    None,
    Upload,
    Download,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::None => "none",
            SyncDirection::Upload => "upload",
            SyncDirection::Download => "download",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SyncDirection::None),
            "upload" => Ok(SyncDirection::Upload),
            "download" => Ok(SyncDirection::Download),
            other => Err(DomainError::UnknownVariant {
                kind: "sync direction",
                value: other.to_string(),
            }),
        }
    }
}

/// The state both sides agreed on after a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncBaseline {
    pub remote_id: Option<RemoteId>,
    pub size: u64,
    pub local_hash: Option<FileHash>,
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_etag: Option<String>,
    pub remote_ctag: Option<String>,
    pub remote_modified: Option<DateTime<Utc>>,
}

/// Remote metadata of the version a download is fetching
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteVersion {
    pub size: u64,
    pub etag: Option<String>,
    pub ctag: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

/// Returns true if the remote version tags differ from the baseline.
///
/// CTags track content only, so they win over ETags when both sides have
/// one. A baseline without any tag never matches.
#[must_use]
pub fn remote_tag_changed(
    baseline_etag: Option<&str>,
    baseline_ctag: Option<&str>,
    etag: Option<&str>,
    ctag: Option<&str>,
) -> bool {
    if let (Some(old), Some(new)) = (baseline_ctag, ctag) {
        return old != new;
    }
    match (baseline_etag, etag) {
        (Some(old), Some(new)) => old != new,
        _ => true,
    }
}

/// Persisted sync metadata for one path of one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    id: UniqueId,
    account_id: AccountId,
    path: RelativePath,
    remote_id: Option<RemoteId>,
    size: u64,
    local_modified: Option<DateTime<Utc>>,
    remote_modified: Option<DateTime<Utc>>,
    local_hash: Option<FileHash>,
    remote_etag: Option<String>,
    remote_ctag: Option<String>,
    status: SyncStatus,
    last_direction: SyncDirection,
    last_error: Option<String>,
    last_synced_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    pending_remote: Option<RemoteVersion>,
}

impl FileRecord {
    /// Creates a record for a path observed for the first time.
    ///
    /// The record has no baseline; its initial status is `PendingUpload`
    /// until a transfer or adoption gives it one.
    pub fn new(account_id: AccountId, path: RelativePath) -> Self {
        Self {
            id: UniqueId::new(),
            account_id,
            path,
            remote_id: None,
            size: 0,
            local_modified: None,
            remote_modified: None,
            local_hash: None,
            remote_etag: None,
            remote_ctag: None,
            status: SyncStatus::PendingUpload,
            last_direction: SyncDirection::None,
            last_error: None,
            last_synced_at: None,
            updated_at: Utc::now(),
            pending_remote: None,
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn local_modified(&self) -> Option<DateTime<Utc>> {
        self.local_modified
    }

    pub fn remote_modified(&self) -> Option<DateTime<Utc>> {
        self.remote_modified
    }

    pub fn local_hash(&self) -> Option<&FileHash> {
        self.local_hash.as_ref()
    }

    pub fn remote_etag(&self) -> Option<&str> {
        self.remote_etag.as_deref()
    }

    pub fn remote_ctag(&self) -> Option<&str> {
        self.remote_ctag.as_deref()
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn last_direction(&self) -> SyncDirection {
        self.last_direction
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Remote version of an unfinished download, if any
    pub fn pending_remote(&self) -> Option<&RemoteVersion> {
        self.pending_remote.as_ref()
    }

    // --- Builders ---

    /// Reuse an existing record id (upsert against a stored row)
    #[must_use]
    pub fn with_id(mut self, id: UniqueId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_baseline(mut self, baseline: SyncBaseline) -> Self {
        self.apply_baseline(baseline);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.status = status;
        self
    }

    // --- Mutations ---

    pub fn set_remote_id(&mut self, remote_id: RemoteId) {
        self.remote_id = Some(remote_id);
        self.touch();
    }

    /// Record a successful transfer in `direction`, replacing the baseline.
    pub fn mark_synced(&mut self, direction: SyncDirection, baseline: SyncBaseline) {
        self.apply_baseline(baseline);
        self.status = SyncStatus::Synced;
        self.last_direction = direction;
        self.last_error = None;
        self.last_synced_at = Some(Utc::now());
        self.touch();
    }

    /// Record that both sides already hold the same content.
    pub fn mark_adopted(&mut self, baseline: SyncBaseline) {
        self.mark_synced(SyncDirection::None, baseline);
    }

    /// Record a failed transfer. The baseline and any pending remote
    /// version are kept so the next run still sees the change and retries it.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Failed;
        self.last_error = Some(message.into());
        self.touch();
    }

    /// Persist the intent to download `version`.
    pub fn mark_pending_download(&mut self, version: RemoteVersion) {
        self.pending_remote = Some(version);
        self.mark_pending(SyncDirection::Download);
    }

    /// Remember the remote version a failed download was fetching.
    pub fn set_pending_remote(&mut self, version: RemoteVersion) {
        self.pending_remote = Some(version);
        self.touch();
    }

    /// Persist the intent to transfer in `direction`.
    pub fn mark_pending(&mut self, direction: SyncDirection) {
        self.status = match direction {
            SyncDirection::Upload => SyncStatus::PendingUpload,
            SyncDirection::Download => SyncStatus::PendingDownload,
            SyncDirection::None => self.status,
        };
        self.touch();
    }

    pub fn mark_conflicted(&mut self) {
        self.status = SyncStatus::Conflicted;
        self.touch();
    }

    pub fn mark_deleted(&mut self) {
        self.status = SyncStatus::Deleted;
        self.touch();
    }

    // --- Change detection ---

    /// True if the current local content differs from the baseline.
    ///
    /// `PendingUpload` always counts as changed so an interrupted upload
    /// is retried.
    pub fn is_local_changed(&self, current: &FileHash) -> bool {
        if self.status == SyncStatus::PendingUpload {
            return true;
        }
        self.local_hash.as_ref() != Some(current)
    }

    /// True if the current remote tags differ from the baseline.
    ///
    /// `PendingDownload` always counts as changed so an interrupted
    /// download is retried.
    pub fn is_remote_changed(&self, etag: Option<&str>, ctag: Option<&str>) -> bool {
        if self.status == SyncStatus::PendingDownload {
            return true;
        }
        remote_tag_changed(
            self.remote_etag.as_deref(),
            self.remote_ctag.as_deref(),
            etag,
            ctag,
        )
    }

    /// True if this record was ever transferred or adopted.
    pub fn has_baseline(&self) -> bool {
        self.last_synced_at.is_some()
    }

    fn apply_baseline(&mut self, baseline: SyncBaseline) {
        if baseline.remote_id.is_some() {
            self.remote_id = baseline.remote_id;
        }
        self.size = baseline.size;
        self.local_hash = baseline.local_hash;
        self.local_modified = baseline.local_modified;
        self.remote_etag = baseline.remote_etag;
        self.remote_ctag = baseline.remote_ctag;
        self.remote_modified = baseline.remote_modified;
        self.pending_remote = None;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> FileHash {
        FileHash::new(s).unwrap()
    }

    fn synced_record() -> FileRecord {
        let mut record = FileRecord::new(AccountId::new(), RelativePath::new("/a.txt").unwrap());
        record.mark_synced(
            SyncDirection::Upload,
            SyncBaseline {
                remote_id: Some(RemoteId::new("R1").unwrap()),
                size: 10,
                local_hash: Some(hash("h0")),
                remote_etag: Some("e0".into()),
                remote_ctag: Some("c0".into()),
                ..Default::default()
            },
        );
        record
    }

    #[test]
    fn new_record_has_no_baseline() {
        let record = FileRecord::new(AccountId::new(), RelativePath::new("/x").unwrap());
        assert_eq!(record.status(), SyncStatus::PendingUpload);
        assert_eq!(record.last_direction(), SyncDirection::None);
        assert!(!record.has_baseline());
        assert!(record.is_local_changed(&hash("anything")));
    }

    #[test]
    fn mark_synced_replaces_baseline() {
        let record = synced_record();
        assert_eq!(record.status(), SyncStatus::Synced);
        assert_eq!(record.last_direction(), SyncDirection::Upload);
        assert_eq!(record.remote_id().map(RemoteId::as_str), Some("R1"));
        assert!(record.has_baseline());
        assert!(!record.is_local_changed(&hash("h0")));
        assert!(record.is_local_changed(&hash("h1")));
    }

    #[test]
    fn ctag_takes_precedence_over_etag() {
        let record = synced_record();
        // metadata-only change: etag moves, ctag stays
        assert!(!record.is_remote_changed(Some("e9"), Some("c0")));
        assert!(record.is_remote_changed(Some("e0"), Some("c1")));
    }

    #[test]
    fn etag_used_when_ctag_missing() {
        let record = synced_record();
        assert!(!record.is_remote_changed(Some("e0"), None));
        assert!(record.is_remote_changed(Some("e1"), None));
        assert!(record.is_remote_changed(None, None));
    }

    #[test]
    fn failure_keeps_baseline() {
        let mut record = synced_record();
        record.mark_failed("network down");
        assert_eq!(record.status(), SyncStatus::Failed);
        assert_eq!(record.last_error(), Some("network down"));
        assert_eq!(record.local_hash(), Some(&hash("h0")));
        assert!(record.is_local_changed(&hash("h1")));
    }

    #[test]
    fn pending_remote_survives_failure_until_synced() {
        let mut record = synced_record();
        let version = RemoteVersion {
            size: 12,
            etag: Some("e1".into()),
            ctag: Some("c1".into()),
            modified: None,
        };
        record.mark_pending_download(version.clone());
        record.mark_failed("disk full");

        assert_eq!(record.pending_remote(), Some(&version));
        // the baseline still holds the previous version
        assert_eq!(record.remote_ctag(), Some("c0"));
        assert!(record.is_remote_changed(Some("e1"), Some("c1")));

        record.mark_synced(
            SyncDirection::Download,
            SyncBaseline {
                size: 12,
                remote_etag: Some("e1".into()),
                remote_ctag: Some("c1".into()),
                ..Default::default()
            },
        );
        assert_eq!(record.pending_remote(), None);
        assert!(!record.is_remote_changed(Some("e1"), Some("c1")));
    }

    #[test]
    fn pending_status_forces_change() {
        let mut record = synced_record();
        record.mark_pending(SyncDirection::Download);
        assert_eq!(record.status(), SyncStatus::PendingDownload);
        assert!(record.is_remote_changed(Some("e0"), Some("c0")));

        record.mark_pending(SyncDirection::Upload);
        assert!(record.is_local_changed(&hash("h0")));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            SyncStatus::Synced,
            SyncStatus::PendingUpload,
            SyncStatus::PendingDownload,
            SyncStatus::Conflicted,
            SyncStatus::Failed,
            SyncStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("weird".parse::<SyncStatus>().is_err());
        assert_eq!("download".parse::<SyncDirection>().unwrap(), SyncDirection::Download);
    }
}
