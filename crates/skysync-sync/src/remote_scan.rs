//! Remote snapshot construction
//!
//! With a stored delta token the snapshot is the persisted remote baseline
//! (one entry per record with a remote id) overlaid with the delta page.
//! Without a token, or when the token has expired, the drive is walked from
//! the root. Both paths honour the selection scope.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skysync_core::{
    domain::{
        newtypes::{AccountId, DeltaToken, RelativePath, RemoteId},
        FileRecord, RemoteVersion, SelectionScope, SyncStatus,
    },
    ports::{IRemoteDrive, RemoteError, RemoteItem},
};

use crate::{reconciler::RemoteSnapshot, SyncError};

/// How a snapshot was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Full,
    Delta,
}

/// A remote snapshot and the token to persist once the run succeeds
#[derive(Debug, Clone)]
pub struct RemoteScan {
    pub snapshot: RemoteSnapshot,
    pub next_token: DeltaToken,
    pub mode: ScanMode,
}

pub struct RemoteScanner {
    remote: Arc<dyn IRemoteDrive>,
}

impl RemoteScanner {
    pub fn new(remote: Arc<dyn IRemoteDrive>) -> Self {
        Self { remote }
    }

    #[tracing::instrument(skip_all, fields(account_id = %account_id, has_token = token.is_some()))]
    pub async fn scan(
        &self,
        account_id: AccountId,
        token: Option<&DeltaToken>,
        records: &[FileRecord],
        scope: &SelectionScope,
        cancel: &CancellationToken,
    ) -> Result<RemoteScan, SyncError> {
        if let Some(token) = token {
            match self.remote.get_delta(account_id, token, cancel).await {
                Ok(page) => {
                    debug!(changes = page.items.len(), "Applying delta page");
                    return Ok(RemoteScan {
                        snapshot: overlay_delta(records, page.items, scope),
                        next_token: page.delta_token,
                        mode: ScanMode::Delta,
                    });
                }
                Err(RemoteError::TokenExpired) => {
                    warn!("Delta token expired, falling back to a full scan");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // taken before the walk so changes made during it are seen again next run
        let next_token = self.remote.latest_delta_token(account_id, cancel).await?;
        let snapshot = self.full_walk(account_id, scope, cancel).await?;
        Ok(RemoteScan {
            snapshot,
            next_token,
            mode: ScanMode::Full,
        })
    }

    async fn full_walk(
        &self,
        account_id: AccountId,
        scope: &SelectionScope,
        cancel: &CancellationToken,
    ) -> Result<RemoteSnapshot, SyncError> {
        let root = match self.remote.get_root_item(account_id, cancel).await {
            Ok(root) => root,
            Err(RemoteError::NotFound(msg)) => return Err(SyncError::RemoteRootNotFound(msg)),
            Err(e) => return Err(e.into()),
        };

        let mut snapshot = RemoteSnapshot::new();
        let mut folders = VecDeque::from([root.id]);
        let mut listed = 0usize;

        while let Some(folder_id) = folders.pop_front() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let children = self
                .remote
                .get_children(account_id, &folder_id, cancel)
                .await?;
            listed += 1;

            for child in children {
                if child.is_deleted {
                    continue;
                }
                if child.is_folder {
                    if scope.should_descend(&child.path) {
                        folders.push_back(child.id);
                    }
                } else if scope.is_in_scope(&child.path) {
                    snapshot.insert(child.path.clone(), child);
                }
            }
        }

        info!(folders = listed, files = snapshot.len(), "Full remote scan complete");
        Ok(snapshot)
    }
}

/// Remote state as of the last run, rebuilt from persisted records.
///
/// A record with an unfinished download contributes the version that
/// download was fetching rather than its baseline.
fn baseline_snapshot(records: &[FileRecord], scope: &SelectionScope) -> RemoteSnapshot {
    records
        .iter()
        .filter(|r| r.status() != SyncStatus::Deleted && scope.is_in_scope(r.path()))
        .filter_map(|record| {
            let id = record.remote_id()?.clone();
            let version = match record.pending_remote() {
                Some(pending) => pending.clone(),
                None => RemoteVersion {
                    size: record.size(),
                    etag: record.remote_etag().map(str::to_string),
                    ctag: record.remote_ctag().map(str::to_string),
                    modified: record.remote_modified(),
                },
            };
            Some((
                record.path().clone(),
                RemoteItem {
                    id,
                    name: record.path().file_name().unwrap_or_default().to_string(),
                    path: record.path().clone(),
                    parent_id: None,
                    is_folder: false,
                    size: version.size,
                    etag: version.etag,
                    ctag: version.ctag,
                    modified: version.modified,
                    hash: None,
                    is_deleted: false,
                },
            ))
        })
        .collect()
}

/// Apply delta changes in order on top of the persisted baseline.
pub fn overlay_delta(
    records: &[FileRecord],
    changes: Vec<RemoteItem>,
    scope: &SelectionScope,
) -> RemoteSnapshot {
    let mut snapshot = baseline_snapshot(records, scope);
    let mut by_id: HashMap<RemoteId, RelativePath> = snapshot
        .iter()
        .map(|(path, item)| (item.id.clone(), path.clone()))
        .collect();

    for item in changes {
        if let Some(old_path) = by_id.remove(&item.id) {
            snapshot.remove(&old_path);
        }

        if item.is_deleted {
            if item.is_folder {
                let removed: Vec<RelativePath> = snapshot
                    .keys()
                    .filter(|p| item.path.contains(p))
                    .cloned()
                    .collect();
                for path in removed {
                    if let Some(gone) = snapshot.remove(&path) {
                        by_id.remove(&gone.id);
                    }
                }
            }
            continue;
        }

        if item.is_folder || !scope.is_in_scope(&item.path) {
            continue;
        }

        // another id moved onto this path
        if let Some(previous) = snapshot.remove(&item.path) {
            by_id.remove(&previous.id);
        }
        by_id.insert(item.id.clone(), item.path.clone());
        snapshot.insert(item.path.clone(), item);
    }

    snapshot
}
