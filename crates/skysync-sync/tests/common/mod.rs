//! Shared fixtures for the sync integration tests
//!
//! `MemoryDrive` is an in-process remote with folders, a change log backing
//! delta tokens and per-path fault injection. `FlakyStore` wraps the SQLite
//! repository and can fail writes on demand. `UnreadableFs` wraps the real
//! filesystem adapter and reports chosen paths as unreadable.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use skysync_cache::{DatabasePool, SqliteStateRepository};
use skysync_core::{
    config::{Config, LoggingConfig},
    domain::{
        newtypes::{AccountId, ConflictId, DeltaToken, FileHash, OperationId, RelativePath, RemoteId, UniqueId},
        Account, FileOperationLog, FileRecord, FolderSelection, SyncConflict, SyncStatus,
    },
    ports::{
        DeltaPage, FileSystemState, IAccountRepository, ILocalFileSystem, IRemoteDrive,
        IStateRepository, LocalScan, RemoteError, RemoteItem, TransferProgressFn,
    },
};
use skysync_sync::{LocalFileSystemAdapter, SyncEngine};

pub const ROOT_ID: &str = "root";

pub fn path(s: &str) -> RelativePath {
    RelativePath::new(s).unwrap()
}

pub fn sha256(content: &[u8]) -> FileHash {
    FileHash::from_digest(&Sha256::digest(content))
}

/// Test subscriber driven by `LoggingConfig`; `RUST_LOG` wins when set
pub fn init_tracing() {
    let logging = LoggingConfig {
        level: "skysync_sync=debug".to_string(),
        ..Default::default()
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer();
    let _ = if logging.format == "json" {
        builder.json().try_init()
    } else {
        builder.with_target(true).try_init()
    };
}

// ============================================================================
// MemoryDrive
// ============================================================================

struct Stored {
    item: RemoteItem,
    content: Vec<u8>,
}

#[derive(Default)]
struct DriveState {
    items: BTreeMap<String, Stored>,
    /// Every change in order; a token is an index into this log
    changes: Vec<RemoteItem>,
    next_id: u64,
    version: u64,
    /// path -> (error, remaining failures)
    upload_faults: HashMap<String, (RemoteError, u32)>,
    download_faults: HashMap<String, (RemoteError, u32)>,
    deleted: Vec<String>,
}

#[derive(Default)]
pub struct MemoryDrive {
    state: Mutex<DriveState>,
    expire_tokens: AtomicBool,
    root_missing: AtomicBool,
    pub uploads: AtomicU32,
    pub downloads: AtomicU32,
    pub full_walks: AtomicU32,
    pub delta_calls: AtomicU32,
    /// Cancelled once this many transfers have finished
    cancel_after: Mutex<Option<(u32, CancellationToken)>>,
    finished_transfers: AtomicU32,
}

impl MemoryDrive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create or replace the file at `p`, creating parent folders
    pub fn put(&self, p: &str, content: &[u8]) -> RemoteItem {
        let mut state = self.state.lock().unwrap();
        let target = path(p);
        let parent_id = ensure_folders(&mut state, &target);
        let id = state
            .items
            .iter()
            .find(|(_, s)| s.item.path == target && !s.item.is_folder)
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| next_id(&mut state, "file"));
        state.version += 1;
        let version = state.version;

        let item = RemoteItem {
            id: RemoteId::new(&id).unwrap(),
            name: target.file_name().unwrap_or_default().to_string(),
            path: target,
            parent_id: Some(RemoteId::new(&parent_id).unwrap()),
            is_folder: false,
            size: content.len() as u64,
            etag: Some(format!("e{version}")),
            ctag: Some(format!("c{version}")),
            modified: Some(Utc::now()),
            hash: Some(sha256(content)),
            is_deleted: false,
        };
        state.changes.push(item.clone());
        state.items.insert(
            id,
            Stored {
                item: item.clone(),
                content: content.to_vec(),
            },
        );
        item
    }

    pub fn mkdir(&self, p: &str) {
        let mut state = self.state.lock().unwrap();
        let target = path(&format!("{p}/x"));
        ensure_folders(&mut state, &target);
    }

    /// Delete the file or folder at `p` (and everything below a folder)
    pub fn remove(&self, p: &str) {
        let mut state = self.state.lock().unwrap();
        let target = path(p);
        let gone: Vec<String> = state
            .items
            .iter()
            .filter(|(_, s)| target.contains(&s.item.path))
            .map(|(id, _)| id.clone())
            .collect();
        for id in gone {
            if let Some(stored) = state.items.remove(&id) {
                let mut tombstone = stored.item;
                tombstone.is_deleted = true;
                state.changes.push(tombstone);
            }
        }
    }

    pub fn content(&self, p: &str) -> Option<Vec<u8>> {
        let target = path(p);
        self.state
            .lock()
            .unwrap()
            .items
            .values()
            .find(|s| s.item.path == target && !s.item.is_folder)
            .map(|s| s.content.clone())
    }

    pub fn item(&self, p: &str) -> Option<RemoteItem> {
        let target = path(p);
        self.state
            .lock()
            .unwrap()
            .items
            .values()
            .find(|s| s.item.path == target)
            .map(|s| s.item.clone())
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn fail_uploads(&self, p: &str, error: RemoteError, times: u32) {
        self.state
            .lock()
            .unwrap()
            .upload_faults
            .insert(path(p).as_str().to_string(), (error, times));
    }

    pub fn fail_downloads(&self, p: &str, error: RemoteError, times: u32) {
        self.state
            .lock()
            .unwrap()
            .download_faults
            .insert(path(p).as_str().to_string(), (error, times));
    }

    pub fn expire_tokens(&self, expired: bool) {
        self.expire_tokens.store(expired, Ordering::SeqCst);
    }

    pub fn set_root_missing(&self, missing: bool) {
        self.root_missing.store(missing, Ordering::SeqCst);
    }

    pub fn cancel_after_transfers(&self, count: u32, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((count, token));
    }

    pub fn current_token(&self) -> DeltaToken {
        token_at(self.state.lock().unwrap().changes.len())
    }

    fn take_fault(faults: &mut HashMap<String, (RemoteError, u32)>, p: &RelativePath) -> Option<RemoteError> {
        let (error, remaining) = faults.get_mut(p.as_str())?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(error.clone())
    }

    fn transfer_finished(&self) {
        let done = self.finished_transfers.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((count, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if done >= *count {
                token.cancel();
            }
        }
    }
}

fn next_id(state: &mut DriveState, prefix: &str) -> String {
    state.next_id += 1;
    format!("{prefix}{}", state.next_id)
}

fn token_at(index: usize) -> DeltaToken {
    DeltaToken::new(format!("t{index}")).unwrap()
}

/// Id of the parent folder of `target`, creating missing folders
fn ensure_folders(state: &mut DriveState, target: &RelativePath) -> String {
    let mut parent_id = ROOT_ID.to_string();
    let mut chain: Vec<RelativePath> = target
        .ancestors()
        .filter(|a| !a.is_root() && a != target)
        .collect();
    chain.sort_by_key(|a| a.as_str().len());

    for folder in chain {
        let existing = state
            .items
            .iter()
            .find(|(_, s)| s.item.is_folder && s.item.path == folder)
            .map(|(id, _)| id.clone());
        parent_id = match existing {
            Some(id) => id,
            None => {
                let id = next_id(state, "dir");
                let item = RemoteItem {
                    id: RemoteId::new(&id).unwrap(),
                    name: folder.file_name().unwrap_or_default().to_string(),
                    path: folder.clone(),
                    parent_id: Some(RemoteId::new(&parent_id).unwrap()),
                    is_folder: true,
                    size: 0,
                    etag: None,
                    ctag: None,
                    modified: Some(Utc::now()),
                    hash: None,
                    is_deleted: false,
                };
                state.changes.push(item.clone());
                state.items.insert(
                    id.clone(),
                    Stored {
                        item,
                        content: Vec::new(),
                    },
                );
                id
            }
        };
    }
    parent_id
}

fn check(cancel: &CancellationToken) -> Result<(), RemoteError> {
    if cancel.is_cancelled() {
        Err(RemoteError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait::async_trait]
impl IRemoteDrive for MemoryDrive {
    async fn get_root_item(
        &self,
        _account: AccountId,
        cancel: &CancellationToken,
    ) -> Result<RemoteItem, RemoteError> {
        check(cancel)?;
        if self.root_missing.load(Ordering::SeqCst) {
            return Err(RemoteError::NotFound("root".into()));
        }
        self.full_walks.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteItem {
            id: RemoteId::new(ROOT_ID).unwrap(),
            name: String::new(),
            path: RelativePath::root(),
            parent_id: None,
            is_folder: true,
            size: 0,
            etag: None,
            ctag: None,
            modified: None,
            hash: None,
            is_deleted: false,
        })
    }

    async fn get_children(
        &self,
        _account: AccountId,
        folder_id: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        check(cancel)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .items
            .values()
            .filter(|s| s.item.parent_id.as_ref() == Some(folder_id))
            .map(|s| s.item.clone())
            .collect())
    }

    async fn get_item(
        &self,
        _account: AccountId,
        remote_id: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<RemoteItem, RemoteError> {
        check(cancel)?;
        self.state
            .lock()
            .unwrap()
            .items
            .get(remote_id.as_str())
            .map(|s| s.item.clone())
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))
    }

    async fn upload_file(
        &self,
        _account: AccountId,
        local_path: &Path,
        remote_path: &RelativePath,
        progress: TransferProgressFn,
        cancel: &CancellationToken,
    ) -> Result<RemoteItem, RemoteError> {
        check(cancel)?;
        let fault = Self::take_fault(&mut self.state.lock().unwrap().upload_faults, remote_path);
        if let Some(error) = fault {
            return Err(error);
        }
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| RemoteError::Fatal(e.to_string()))?;
        progress(content.len() as u64);
        let item = self.put(remote_path.as_str(), &content);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.transfer_finished();
        Ok(item)
    }

    async fn download_file(
        &self,
        _account: AccountId,
        remote_id: &RemoteId,
        local_path: &Path,
        progress: TransferProgressFn,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        check(cancel)?;
        let content = {
            let mut state = self.state.lock().unwrap();
            let stored = state
                .items
                .get(remote_id.as_str())
                .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;
            let item_path = stored.item.path.clone();
            let content = stored.content.clone();
            if let Some(error) = Self::take_fault(&mut state.download_faults, &item_path) {
                return Err(error);
            }
            content
        };
        tokio::fs::write(local_path, &content)
            .await
            .map_err(|e| RemoteError::Fatal(e.to_string()))?;
        progress(content.len() as u64);
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.transfer_finished();
        Ok(())
    }

    async fn get_delta(
        &self,
        _account: AccountId,
        token: &DeltaToken,
        cancel: &CancellationToken,
    ) -> Result<DeltaPage, RemoteError> {
        check(cancel)?;
        self.delta_calls.fetch_add(1, Ordering::SeqCst);
        if self.expire_tokens.load(Ordering::SeqCst) {
            return Err(RemoteError::TokenExpired);
        }
        let from: usize = token
            .as_str()
            .strip_prefix('t')
            .and_then(|n| n.parse().ok())
            .ok_or(RemoteError::TokenExpired)?;

        let state = self.state.lock().unwrap();
        if from > state.changes.len() {
            return Err(RemoteError::TokenExpired);
        }
        Ok(DeltaPage {
            items: state.changes[from..].to_vec(),
            delta_token: token_at(state.changes.len()),
        })
    }

    async fn latest_delta_token(
        &self,
        _account: AccountId,
        cancel: &CancellationToken,
    ) -> Result<DeltaToken, RemoteError> {
        check(cancel)?;
        Ok(self.current_token())
    }

    async fn delete_item(
        &self,
        _account: AccountId,
        remote_id: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        check(cancel)?;
        let p = self
            .state
            .lock()
            .unwrap()
            .items
            .get(remote_id.as_str())
            .map(|s| s.item.path.clone())
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;
        self.remove(p.as_str());
        self.state
            .lock()
            .unwrap()
            .deleted
            .push(remote_id.to_string());
        Ok(())
    }
}

// ============================================================================
// FlakyStore
// ============================================================================

/// SQLite repository that can refuse to commit `Synced` records
pub struct FlakyStore {
    inner: Arc<SqliteStateRepository>,
    fail_synced: AtomicBool,
    fail_paths: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStateRepository>) -> Self {
        Self {
            inner,
            fail_synced: AtomicBool::new(false),
            fail_paths: Mutex::new(HashSet::new()),
        }
    }

    /// Fail every write that marks `p` as synced
    pub fn fail_synced_write(&self, p: &str) {
        self.fail_paths.lock().unwrap().insert(path(p).as_str().to_string());
        self.fail_synced.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.fail_synced.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl IStateRepository for FlakyStore {
    async fn upsert_record(&self, record: &FileRecord) -> anyhow::Result<()> {
        if self.fail_synced.load(Ordering::SeqCst)
            && record.status() == SyncStatus::Synced
            && self.fail_paths.lock().unwrap().contains(record.path().as_str())
        {
            anyhow::bail!("disk I/O error");
        }
        self.inner.upsert_record(record).await
    }

    async fn get_record(&self, id: &UniqueId) -> anyhow::Result<Option<FileRecord>> {
        self.inner.get_record(id).await
    }

    async fn get_record_by_path(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<FileRecord>> {
        self.inner.get_record_by_path(account_id, path).await
    }

    async fn get_record_by_remote_id(
        &self,
        account_id: &AccountId,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<FileRecord>> {
        self.inner.get_record_by_remote_id(account_id, remote_id).await
    }

    async fn list_records(&self, account_id: &AccountId) -> anyhow::Result<Vec<FileRecord>> {
        self.inner.list_records(account_id).await
    }

    async fn delete_record(&self, id: &UniqueId) -> anyhow::Result<()> {
        self.inner.delete_record(id).await
    }

    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()> {
        self.inner.save_conflict(conflict).await
    }

    async fn get_conflict(&self, id: &ConflictId) -> anyhow::Result<Option<SyncConflict>> {
        self.inner.get_conflict(id).await
    }

    async fn get_unresolved_conflicts(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<SyncConflict>> {
        self.inner.get_unresolved_conflicts(account_id).await
    }

    async fn get_open_conflict_for_path(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<SyncConflict>> {
        self.inner.get_open_conflict_for_path(account_id, path).await
    }

    async fn list_conflicts(&self, account_id: &AccountId) -> anyhow::Result<Vec<SyncConflict>> {
        self.inner.list_conflicts(account_id).await
    }

    async fn get_delta_token(&self, account_id: &AccountId) -> anyhow::Result<Option<DeltaToken>> {
        self.inner.get_delta_token(account_id).await
    }

    async fn save_delta_token(
        &self,
        account_id: &AccountId,
        token: &DeltaToken,
    ) -> anyhow::Result<()> {
        self.inner.save_delta_token(account_id, token).await
    }

    async fn append_operation(&self, entry: &FileOperationLog) -> anyhow::Result<OperationId> {
        self.inner.append_operation(entry).await
    }

    async fn get_operations(
        &self,
        account_id: &AccountId,
        limit: u32,
    ) -> anyhow::Result<Vec<FileOperationLog>> {
        self.inner.get_operations(account_id, limit).await
    }

    async fn get_folder_selections(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<FolderSelection>> {
        self.inner.get_folder_selections(account_id).await
    }

    async fn save_folder_selection(&self, selection: &FolderSelection) -> anyhow::Result<()> {
        self.inner.save_folder_selection(selection).await
    }

    async fn delete_folder_selection(
        &self,
        account_id: &AccountId,
        path: &RelativePath,
    ) -> anyhow::Result<()> {
        self.inner.delete_folder_selection(account_id, path).await
    }

    async fn replace_folder_selections(
        &self,
        account_id: &AccountId,
        selections: &[FolderSelection],
    ) -> anyhow::Result<()> {
        self.inner.replace_folder_selections(account_id, selections).await
    }
}

// ============================================================================
// UnreadableFs
// ============================================================================

/// Real local filesystem whose scans report chosen paths as unreadable
#[derive(Default)]
pub struct UnreadableFs {
    inner: LocalFileSystemAdapter,
    unreadable: Mutex<HashSet<RelativePath>>,
}

impl UnreadableFs {
    pub fn lock(&self, p: &str) {
        self.unreadable.lock().unwrap().insert(path(p));
    }

    pub fn unlock_all(&self) {
        self.unreadable.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for UnreadableFs {
    async fn scan_tree(&self, root: &Path, cancel: &CancellationToken) -> anyhow::Result<LocalScan> {
        let mut scan = self.inner.scan_tree(root, cancel).await?;
        let locked = self.unreadable.lock().unwrap().clone();
        scan.files.retain(|p, _| !locked.iter().any(|l| l.contains(p)));
        scan.unreadable.extend(locked);
        Ok(scan)
    }

    async fn compute_hash(&self, path: &Path, cancel: &CancellationToken) -> anyhow::Result<FileHash> {
        self.inner.compute_hash(path, cancel).await
    }

    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        self.inner.get_state(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        self.inner.rename(from, to).await
    }

    async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
        self.inner.delete_file(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        self.inner.create_dir_all(path).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    _dir: TempDir,
    pub root: PathBuf,
    pub account: Account,
    pub repo: Arc<SqliteStateRepository>,
    pub store: Arc<dyn IStateRepository>,
    pub drive: Arc<MemoryDrive>,
    pub engine: Arc<SyncEngine>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    pub async fn with_config(config: Config) -> Self {
        Self::build(
            config,
            |repo| repo as Arc<dyn IStateRepository>,
            Arc::new(LocalFileSystemAdapter::new()),
        )
        .await
    }

    /// Harness whose engine scans through an [`UnreadableFs`]
    pub async fn unreadable(config: Config) -> (Self, Arc<UnreadableFs>) {
        let fs = Arc::new(UnreadableFs::default());
        let harness = Self::build(
            config,
            |repo| repo as Arc<dyn IStateRepository>,
            Arc::clone(&fs) as Arc<dyn ILocalFileSystem>,
        )
        .await;
        (harness, fs)
    }

    /// Harness whose engine writes through a [`FlakyStore`]
    pub async fn flaky(config: Config) -> (Self, Arc<FlakyStore>) {
        let mut flaky = None;
        let harness = Self::build(
            config,
            |repo| {
                let store = Arc::new(FlakyStore::new(repo));
                flaky = Some(Arc::clone(&store));
                store as Arc<dyn IStateRepository>
            },
            Arc::new(LocalFileSystemAdapter::new()),
        )
        .await;
        (harness, flaky.unwrap())
    }

    async fn build(
        config: Config,
        wrap: impl FnOnce(Arc<SqliteStateRepository>) -> Arc<dyn IStateRepository>,
        local_fs: Arc<dyn ILocalFileSystem>,
    ) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Drive");
        tokio::fs::create_dir_all(&root).await.unwrap();

        let pool = DatabasePool::in_memory().await.unwrap();
        let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        let account = Account::new("Test", &root).unwrap().with_max_parallel(2);
        repo.save_account(&account).await.unwrap();

        let store = wrap(Arc::clone(&repo));
        let drive = MemoryDrive::new();
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&drive) as Arc<dyn IRemoteDrive>,
            local_fs,
            Arc::clone(&store),
            Arc::clone(&repo) as Arc<dyn IAccountRepository>,
            &config,
        ));

        Self {
            _dir: dir,
            root,
            account,
            repo,
            store,
            drive,
            engine,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account.id()
    }

    pub fn local(&self, p: &str) -> PathBuf {
        path(p).to_local(&self.root)
    }

    pub async fn write_local(&self, p: &str, content: &[u8]) {
        let local = self.local(p);
        tokio::fs::create_dir_all(local.parent().unwrap()).await.unwrap();
        tokio::fs::write(&local, content).await.unwrap();
    }

    pub async fn read_local(&self, p: &str) -> Option<Vec<u8>> {
        tokio::fs::read(self.local(p)).await.ok()
    }

    pub async fn record(&self, p: &str) -> Option<FileRecord> {
        self.repo
            .get_record_by_path(&self.account_id(), &path(p))
            .await
            .unwrap()
    }

    pub async fn token(&self) -> Option<DeltaToken> {
        self.repo.get_delta_token(&self.account_id()).await.unwrap()
    }
}
