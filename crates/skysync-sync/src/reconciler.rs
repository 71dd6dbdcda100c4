//! Three-way reconciliation
//!
//! Compares the local snapshot, the remote snapshot and the persisted
//! [`FileRecord`]s and classifies every path in their union into one
//! [`SyncAction`]. Pure: no I/O, deterministic order (paths ascending).
//!
//! ## Rules
//!
//! | local | remote | record | result |
//! |-------|--------|--------|--------|
//! | ✓ | – | – | Upload |
//! | – | ✓ | – | Download |
//! | ✓ | ✓ | – | Adopt if hashes match, else first-sync policy |
//! | ✓ | ✓ | ✓ | by change detection, both changed → Conflict |
//! | ✓ | – | ✓ | Upload, or DeleteLocal when deletions propagate |
//! | – | ✓ | ✓ | Download, or DeleteRemote when deletions propagate |
//! | – | – | ✓ | DropRecord |
//!
//! `Conflicted` records are held until the resolver clears them, and paths
//! outside the selection scope are left alone.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use skysync_core::{
    config::FirstSyncPolicy,
    domain::{newtypes::RelativePath, FileRecord, SelectionScope, SyncStatus},
    ports::{LocalFileState, LocalSnapshot, RemoteItem},
};

/// Remote files by path (folders excluded)
pub type RemoteSnapshot = BTreeMap<RelativePath, RemoteItem>;

/// What the engine should do with one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Upload,
    Download,
    /// Both sides hold the same content; record a baseline without transfer
    Adopt,
    /// Both sides changed since the last sync
    Conflict,
    /// Previously synced, removed remotely, unchanged locally
    DeleteLocal,
    /// Previously synced, removed locally, unchanged remotely
    DeleteRemote,
    /// Gone from both sides
    DropRecord,
    NoOp,
}

impl ActionKind {
    /// True for actions that move file content
    pub fn is_transfer(&self) -> bool {
        matches!(self, ActionKind::Upload | ActionKind::Download)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Upload => "upload",
            ActionKind::Download => "download",
            ActionKind::Adopt => "adopt",
            ActionKind::Conflict => "conflict",
            ActionKind::DeleteLocal => "delete_local",
            ActionKind::DeleteRemote => "delete_remote",
            ActionKind::DropRecord => "drop_record",
            ActionKind::NoOp => "noop",
        };
        f.write_str(s)
    }
}

/// One classified path with the inputs that led to the decision
#[derive(Debug, Clone, PartialEq)]
pub struct SyncAction {
    pub path: RelativePath,
    pub kind: ActionKind,
    pub local: Option<LocalFileState>,
    pub remote: Option<RemoteItem>,
    pub record: Option<FileRecord>,
}

/// Knobs that change how ambiguous cases are classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOptions {
    pub propagate_deletions: bool,
    pub first_sync_policy: FirstSyncPolicy,
}

/// Classify every in-scope path of `local ∪ remote ∪ records`.
pub fn reconcile(
    local: &LocalSnapshot,
    remote: &RemoteSnapshot,
    records: &[FileRecord],
    scope: &SelectionScope,
    options: ReconcileOptions,
) -> Vec<SyncAction> {
    let by_path: BTreeMap<&RelativePath, &FileRecord> = records
        .iter()
        .filter(|r| r.status() != SyncStatus::Deleted)
        .map(|r| (r.path(), r))
        .collect();

    let paths: BTreeSet<&RelativePath> = local
        .keys()
        .chain(remote.keys())
        .chain(by_path.keys().copied())
        .collect();

    paths
        .into_iter()
        .filter(|path| scope.is_in_scope(path))
        .map(|path| {
            let local = local.get(path);
            let remote = remote.get(path);
            let record = by_path.get(path).copied();
            SyncAction {
                path: path.clone(),
                kind: classify(local, remote, record, options),
                local: local.cloned(),
                remote: remote.cloned(),
                record: record.cloned(),
            }
        })
        .collect()
}

fn classify(
    local: Option<&LocalFileState>,
    remote: Option<&RemoteItem>,
    record: Option<&FileRecord>,
    options: ReconcileOptions,
) -> ActionKind {
    if record.is_some_and(|r| r.status() == SyncStatus::Conflicted) {
        return ActionKind::NoOp;
    }

    match (local, remote, record) {
        (Some(_), None, None) => ActionKind::Upload,
        (None, Some(_), None) => ActionKind::Download,
        (Some(l), Some(r), None) => first_sync(l, r, options.first_sync_policy),

        (Some(l), Some(r), Some(rec)) => {
            // never synced: no history to compare against
            if !rec.has_baseline() {
                if r.hash.as_ref() == Some(&l.hash) {
                    return ActionKind::Adopt;
                }
                return match rec.status() {
                    SyncStatus::PendingUpload => ActionKind::Upload,
                    SyncStatus::PendingDownload => ActionKind::Download,
                    _ => first_sync(l, r, options.first_sync_policy),
                };
            }
            let local_changed = rec.is_local_changed(&l.hash);
            let remote_changed = rec.is_remote_changed(r.etag.as_deref(), r.ctag.as_deref());
            match (local_changed, remote_changed) {
                (true, true) if r.hash.as_ref() == Some(&l.hash) => ActionKind::Adopt,
                (true, true) => ActionKind::Conflict,
                (true, false) => ActionKind::Upload,
                (false, true) => ActionKind::Download,
                (false, false) => ActionKind::NoOp,
            }
        }

        (Some(l), None, Some(rec)) => {
            if options.propagate_deletions && rec.has_baseline() && !rec.is_local_changed(&l.hash)
            {
                ActionKind::DeleteLocal
            } else {
                ActionKind::Upload
            }
        }

        (None, Some(r), Some(rec)) => {
            if options.propagate_deletions
                && rec.has_baseline()
                && !rec.is_remote_changed(r.etag.as_deref(), r.ctag.as_deref())
            {
                ActionKind::DeleteRemote
            } else {
                ActionKind::Download
            }
        }

        (None, None, Some(_)) => ActionKind::DropRecord,
        (None, None, None) => ActionKind::NoOp,
    }
}

fn first_sync(local: &LocalFileState, remote: &RemoteItem, policy: FirstSyncPolicy) -> ActionKind {
    if remote.hash.as_ref() == Some(&local.hash) {
        return ActionKind::Adopt;
    }
    match policy {
        FirstSyncPolicy::Conflict => ActionKind::Conflict,
        FirstSyncPolicy::PreferRemote => ActionKind::Download,
        FirstSyncPolicy::PreferLocal => ActionKind::Upload,
        FirstSyncPolicy::PreferNewer => match (local.modified, remote.modified) {
            (Some(l), Some(r)) if l > r => ActionKind::Upload,
            (Some(_), Some(_)) => ActionKind::Download,
            _ => ActionKind::Conflict,
        },
    }
}
