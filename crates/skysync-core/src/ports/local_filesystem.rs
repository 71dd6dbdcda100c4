//! Local filesystem port (driven/secondary port)
//!
//! Scanning, hashing and the handful of file moves the engine performs
//! itself (conflict copies, atomic download placement, deletions).
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - Snapshots are keyed by [`RelativePath`] so they line up with remote
//!   snapshots and persisted records without further conversion.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::domain::newtypes::{FileHash, RelativePath};

/// Suffix of in-progress download files; scanners must ignore them
pub const PARTIAL_SUFFIX: &str = ".skysync-partial";

/// Sibling temp path a download is written to before being renamed into place
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

/// True for paths written by [`partial_path`]
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX))
}

/// Metadata of one path on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemState {
    pub exists: bool,
    /// False for directories and special files
    pub is_file: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// State of a path that does not exist
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
        }
    }

    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }
}

/// One scanned file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileState {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub hash: FileHash,
}

/// Scanned local tree: relative path → file state (files only)
pub type LocalSnapshot = BTreeMap<RelativePath, LocalFileState>;

/// Outcome of a local walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalScan {
    pub files: LocalSnapshot,
    /// Files and folders that could not be read. Their contents are unknown,
    /// not absent, so nothing at or below them may be acted on.
    pub unreadable: BTreeSet<RelativePath>,
}

impl LocalScan {
    /// True if `path` is, or lies below, an unreadable entry
    pub fn is_unreadable(&self, path: &RelativePath) -> bool {
        self.unreadable.iter().any(|entry| entry.contains(path))
    }
}

/// Local filesystem operations used by the sync engine
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Walk `root` and hash every regular file below it.
    ///
    /// Implementations skip their own temporary files and stop early when
    /// `cancel` fires. A file or folder that cannot be read is reported in
    /// [`LocalScan::unreadable`]; only a failure on `root` itself is an error.
    async fn scan_tree(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LocalScan>;

    async fn compute_hash(&self, path: &Path, cancel: &CancellationToken)
        -> anyhow::Result<FileHash>;

    /// Metadata of `path`; a missing path is `FileSystemState::not_found()`
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState>;

    /// Move `from` to `to`, creating parent directories of `to`
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()>;

    async fn delete_file(&self, path: &Path) -> anyhow::Result<()>;

    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()>;
}
