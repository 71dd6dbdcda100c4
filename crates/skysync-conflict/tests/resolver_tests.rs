//! Integration tests for ConflictResolver
//!
//! Runs every strategy against a real temp directory, an in-memory SQLite
//! repository and an in-process remote drive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use skysync_cache::{DatabasePool, SqliteStateRepository};
use skysync_conflict::{ConflictResolver, PolicyEngine, ResolveOutcome};
use skysync_core::{
    config::ConflictRuleConfig,
    domain::{
        newtypes::{AccountId, DeltaToken, FileHash, RelativePath, RemoteId},
        Account, ConflictSide, ConflictStrategy, FileRecord, SyncBaseline, SyncConflict,
        SyncDirection, SyncStatus,
    },
    ports::{
        DeltaPage, FileSystemState, IAccountRepository, ILocalFileSystem, IRemoteDrive,
        IStateRepository, LocalScan, RemoteError, RemoteItem, TransferProgressFn,
    },
};

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
struct FakeRemote {
    items: Mutex<HashMap<String, (RemoteItem, Vec<u8>)>>,
    uploads: Mutex<u32>,
    broken_downloads: Mutex<Vec<String>>,
}

impl FakeRemote {
    fn put(&self, id: &str, path: &str, content: &[u8], etag: &str) {
        let item = RemoteItem {
            id: RemoteId::new(id).unwrap(),
            name: path.rsplit('/').next().unwrap().to_string(),
            path: RelativePath::new(path).unwrap(),
            parent_id: None,
            is_folder: false,
            size: content.len() as u64,
            etag: Some(etag.to_string()),
            ctag: Some(format!("c-{etag}")),
            modified: Some(Utc::now()),
            hash: Some(FileHash::from_digest(content)),
            is_deleted: false,
        };
        self.items
            .lock()
            .unwrap()
            .insert(id.to_string(), (item, content.to_vec()));
    }

    fn content(&self, id: &str) -> Vec<u8> {
        self.items.lock().unwrap()[id].1.clone()
    }

    /// Downloads of `id` write half the content and then fail
    fn break_download(&self, id: &str) {
        self.broken_downloads.lock().unwrap().push(id.to_string());
    }

    fn upload_count(&self) -> u32 {
        *self.uploads.lock().unwrap()
    }
}

fn check(cancel: &CancellationToken) -> Result<(), RemoteError> {
    if cancel.is_cancelled() {
        Err(RemoteError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait::async_trait]
impl IRemoteDrive for FakeRemote {
    async fn get_root_item(
        &self,
        _account: AccountId,
        _cancel: &CancellationToken,
    ) -> Result<RemoteItem, RemoteError> {
        Err(RemoteError::Fatal("not used".into()))
    }

    async fn get_children(
        &self,
        _account: AccountId,
        _folder_id: &RemoteId,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        Ok(Vec::new())
    }

    async fn get_item(
        &self,
        _account: AccountId,
        remote_id: &RemoteId,
        cancel: &CancellationToken,
    ) -> Result<RemoteItem, RemoteError> {
        check(cancel)?;
        self.items
            .lock()
            .unwrap()
            .get(remote_id.as_str())
            .map(|(item, _)| item.clone())
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
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| RemoteError::Fatal(e.to_string()))?;
        progress(content.len() as u64);

        let existing = self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|(_, (item, _))| &item.path == remote_path)
            .map(|(id, _)| id.clone());
        let id = existing.unwrap_or_else(|| format!("up-{}", remote_path.as_str().len()));

        *self.uploads.lock().unwrap() += 1;
        let etag = format!("uploaded-{}", self.upload_count());
        self.put(&id, remote_path.as_str(), &content, &etag);
        Ok(self.items.lock().unwrap()[&id].0.clone())
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
        let content = self.content(remote_id.as_str());
        if self
            .broken_downloads
            .lock()
            .unwrap()
            .iter()
            .any(|id| id == remote_id.as_str())
        {
            tokio::fs::write(local_path, &content[..content.len() / 2])
                .await
                .map_err(|e| RemoteError::Fatal(e.to_string()))?;
            return Err(RemoteError::Transient("connection reset".into()));
        }
        tokio::fs::write(local_path, &content)
            .await
            .map_err(|e| RemoteError::Fatal(e.to_string()))?;
        progress(content.len() as u64);
        Ok(())
    }

    async fn get_delta(
        &self,
        _account: AccountId,
        _token: &DeltaToken,
        _cancel: &CancellationToken,
    ) -> Result<DeltaPage, RemoteError> {
        Err(RemoteError::Fatal("not used".into()))
    }

    async fn latest_delta_token(
        &self,
        _account: AccountId,
        _cancel: &CancellationToken,
    ) -> Result<DeltaToken, RemoteError> {
        Err(RemoteError::Fatal("not used".into()))
    }

    async fn delete_item(
        &self,
        _account: AccountId,
        _remote_id: &RemoteId,
        _cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        Err(RemoteError::Fatal("not used".into()))
    }
}

/// Plain tokio::fs adapter; the "hash" is the hex of the content itself
struct TestFs;

#[async_trait::async_trait]
impl ILocalFileSystem for TestFs {
    async fn scan_tree(
        &self,
        _root: &Path,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<LocalScan> {
        Ok(LocalScan::default())
    }

    async fn compute_hash(
        &self,
        path: &Path,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<FileHash> {
        Ok(FileHash::from_digest(&tokio::fs::read(path).await?))
    }

    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(FileSystemState {
                exists: true,
                is_file: meta.is_file(),
                size: meta.len(),
                modified: None,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileSystemState::not_found()),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    account: Account,
    repo: Arc<SqliteStateRepository>,
    remote: Arc<FakeRemote>,
    resolver: ConflictResolver,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let pool = DatabasePool::in_memory().await.unwrap();
    let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));
    let account = Account::new("Test", &root).unwrap();
    repo.save_account(&account).await.unwrap();

    let remote = Arc::new(FakeRemote::default());
    let resolver = ConflictResolver::new(
        Arc::clone(&remote) as Arc<dyn IRemoteDrive>,
        Arc::new(TestFs),
        Arc::clone(&repo) as Arc<dyn IStateRepository>,
        Arc::clone(&repo) as Arc<dyn IAccountRepository>,
    );

    Fixture {
        _dir: dir,
        root,
        account,
        repo,
        remote,
        resolver,
    }
}

impl Fixture {
    /// Local file, remote file and a conflicted record for `path`
    async fn conflict(&self, path: &str, local: &[u8], remote: &[u8]) -> SyncConflict {
        let rel = RelativePath::new(path).unwrap();
        let local_path = rel.to_local(&self.root);
        tokio::fs::create_dir_all(local_path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&local_path, local).await.unwrap();

        let remote_id = format!("id{}", path.replace('/', "-"));
        self.remote.put(&remote_id, path, remote, "e2");

        let mut record = FileRecord::new(self.account.id(), rel.clone()).with_baseline(
            SyncBaseline {
                remote_id: Some(RemoteId::new(&remote_id).unwrap()),
                size: 4,
                local_hash: Some(FileHash::new("base").unwrap()),
                remote_etag: Some("e1".into()),
                ..Default::default()
            },
        );
        record.mark_conflicted();
        self.repo.upsert_record(&record).await.unwrap();

        let conflict = SyncConflict::new(
            self.account.id(),
            rel,
            ConflictSide::new(local.len() as u64, None),
            ConflictSide::new(remote.len() as u64, None),
        );
        self.repo.save_conflict(&conflict).await.unwrap();
        conflict
    }

    async fn record(&self, path: &str) -> FileRecord {
        self.repo
            .get_record_by_path(&self.account.id(), &RelativePath::new(path).unwrap())
            .await
            .unwrap()
            .unwrap()
    }

    async fn read(&self, path: &str) -> Vec<u8> {
        tokio::fs::read(RelativePath::new(path).unwrap().to_local(&self.root))
            .await
            .unwrap()
    }
}

// ============================================================================
// Strategies
// ============================================================================

#[tokio::test]
async fn test_keep_remote_replaces_local_content() {
    let fx = fixture().await;
    let conflict = fx.conflict("/docs/a.txt", b"local", b"remote").await;

    let outcome = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::KeepRemote, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_resolved());
    assert_eq!(fx.read("/docs/a.txt").await, b"remote");

    let record = fx.record("/docs/a.txt").await;
    assert_eq!(record.status(), SyncStatus::Synced);
    assert_eq!(record.last_direction(), SyncDirection::Download);
    assert_eq!(record.remote_etag(), Some("e2"));
    assert_eq!(record.local_hash(), Some(&FileHash::from_digest(b"remote")));

    let stored = fx.repo.get_conflict(&conflict.id()).await.unwrap().unwrap();
    assert!(stored.is_resolved());
    assert_eq!(stored.strategy(), ConflictStrategy::KeepRemote);

    let ops = fx.repo.get_operations(&fx.account.id(), 10).await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation().to_string(), "conflict_resolution");
    assert!(ops[0].outcome().is_success());

    // no partial file left behind
    let mut entries = tokio::fs::read_dir(fx.root.join("docs")).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    assert_eq!(names, vec!["a.txt".to_string()]);
}

#[tokio::test]
async fn test_keep_local_uploads_local_content() {
    let fx = fixture().await;
    let conflict = fx.conflict("/a.txt", b"local", b"remote").await;

    let outcome = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::KeepLocal, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_resolved());
    assert_eq!(fx.remote.upload_count(), 1);
    assert_eq!(fx.remote.content("id-a.txt"), b"local");
    assert_eq!(fx.read("/a.txt").await, b"local");

    let record = fx.record("/a.txt").await;
    assert_eq!(record.status(), SyncStatus::Synced);
    assert_eq!(record.last_direction(), SyncDirection::Upload);
    assert_eq!(record.remote_etag(), Some("uploaded-1"));
}

#[tokio::test]
async fn test_keep_both_preserves_local_copy() {
    let fx = fixture().await;
    let conflict = fx.conflict("/notes/report.docx", b"mine", b"theirs").await;

    let outcome = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::KeepBoth, &CancellationToken::new())
        .await
        .unwrap();

    let ResolveOutcome::Resolved {
        conflict_copy: Some(copy),
        ..
    } = outcome
    else {
        panic!("expected a resolved outcome with a conflict copy, got {outcome:?}");
    };

    assert!(copy.as_str().starts_with("/notes/report (conflicted copy "));
    assert!(copy.as_str().ends_with(").docx"));
    assert_eq!(fx.read(copy.as_str()).await, b"mine");
    assert_eq!(fx.read("/notes/report.docx").await, b"theirs");
    assert_eq!(fx.remote.upload_count(), 0);
}

#[tokio::test]
async fn test_keep_both_failed_download_leaves_local_file_in_place() {
    let fx = fixture().await;
    let conflict = fx.conflict("/notes/report.docx", b"mine", b"theirs").await;
    fx.remote.break_download("id-notes-report.docx");

    let result = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::KeepBoth, &CancellationToken::new())
        .await;
    assert!(result.is_err());

    assert_eq!(fx.read("/notes/report.docx").await, b"mine");
    let mut entries = tokio::fs::read_dir(fx.root.join("notes")).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    assert_eq!(names, vec!["report.docx".to_string()]);

    let stored = fx.repo.get_conflict(&conflict.id()).await.unwrap().unwrap();
    assert!(!stored.is_resolved());
    assert_eq!(fx.record("/notes/report.docx").await.status(), SyncStatus::Conflicted);
}

#[tokio::test]
async fn test_strategy_none_leaves_conflict_open() {
    let fx = fixture().await;
    let conflict = fx.conflict("/a.txt", b"local", b"remote").await;

    let outcome = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, ResolveOutcome::Unchanged);
    assert_eq!(fx.read("/a.txt").await, b"local");
    let open = fx
        .repo
        .get_unresolved_conflicts(&fx.account.id())
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn test_already_resolved_is_reported() {
    let fx = fixture().await;
    let conflict = fx.conflict("/a.txt", b"local", b"remote").await;
    let cancel = CancellationToken::new();

    fx.resolver
        .resolve(conflict.id(), ConflictStrategy::KeepRemote, &cancel)
        .await
        .unwrap();
    let second = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::KeepLocal, &cancel)
        .await
        .unwrap();

    assert_eq!(second, ResolveOutcome::AlreadyResolved);
    assert_eq!(fx.remote.upload_count(), 0);
}

// ============================================================================
// Preconditions
// ============================================================================

#[tokio::test]
async fn test_missing_record_is_metadata_missing() {
    let fx = fixture().await;
    let conflict = SyncConflict::new(
        fx.account.id(),
        RelativePath::new("/ghost.txt").unwrap(),
        ConflictSide::new(1, None),
        ConflictSide::new(1, None),
    );
    fx.repo.save_conflict(&conflict).await.unwrap();

    let outcome = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::KeepRemote, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, ResolveOutcome::MetadataMissing);
}

#[tokio::test]
async fn test_keep_local_without_local_file() {
    let fx = fixture().await;
    let conflict = fx.conflict("/a.txt", b"local", b"remote").await;
    tokio::fs::remove_file(fx.root.join("a.txt")).await.unwrap();

    let outcome = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::KeepLocal, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, ResolveOutcome::LocalFileMissing);
    let stored = fx.repo.get_conflict(&conflict.id()).await.unwrap().unwrap();
    assert!(!stored.is_resolved());
}

#[tokio::test]
async fn test_unknown_conflict_is_an_error() {
    let fx = fixture().await;
    let result = fx
        .resolver
        .resolve(
            skysync_core::domain::newtypes::ConflictId::new(),
            ConflictStrategy::KeepRemote,
            &CancellationToken::new(),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cancelled_resolution_keeps_conflict_open() {
    let fx = fixture().await;
    let conflict = fx.conflict("/a.txt", b"local", b"remote").await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fx
        .resolver
        .resolve(conflict.id(), ConflictStrategy::KeepRemote, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(fx.read("/a.txt").await, b"local");
    let stored = fx.repo.get_conflict(&conflict.id()).await.unwrap().unwrap();
    assert!(!stored.is_resolved());

    let ops = fx.repo.get_operations(&fx.account.id(), 10).await.unwrap();
    assert_eq!(ops.len(), 1);
    assert!(!ops[0].outcome().is_success());
}

// ============================================================================
// Batch and policy
// ============================================================================

#[tokio::test]
async fn test_resolve_all_resolves_every_open_conflict() {
    let fx = fixture().await;
    fx.conflict("/a.txt", b"la", b"ra").await;
    fx.conflict("/b.txt", b"lb", b"rb").await;

    let result = fx
        .resolver
        .resolve_all(
            &fx.account.id(),
            ConflictStrategy::KeepRemote,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.resolved_count(), 2);
    assert!(result.failed.is_empty());
    assert_eq!(fx.read("/a.txt").await, b"ra");
    assert_eq!(fx.read("/b.txt").await, b"rb");
    assert!(fx
        .repo
        .get_unresolved_conflicts(&fx.account.id())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_apply_policy_uses_matching_rule() {
    let fx = fixture().await;
    let tmp = fx.conflict("/cache/x.tmp", b"local", b"remote").await;
    let doc = fx.conflict("/doc.txt", b"local", b"remote").await;
    let policy = PolicyEngine::new(
        ConflictStrategy::None,
        &[ConflictRuleConfig {
            pattern: "**/*.tmp".to_string(),
            strategy: "keep_local".to_string(),
        }],
    );
    let cancel = CancellationToken::new();

    let applied = fx.resolver.apply_policy(&tmp, &policy, &cancel).await.unwrap();
    assert!(applied.is_some_and(|o| o.is_resolved()));

    let skipped = fx.resolver.apply_policy(&doc, &policy, &cancel).await.unwrap();
    assert!(skipped.is_none());
    assert_eq!(fx.remote.upload_count(), 1);
}
