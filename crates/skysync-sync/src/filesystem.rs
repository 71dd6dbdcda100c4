//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **SHA-256 content hash**: hex encoded, streamed in fixed-size chunks so
//!   large files never sit in memory and cancellation is checked per chunk.
//! - **Partial downloads**: files carrying [`PARTIAL_SUFFIX`](skysync_core::ports::PARTIAL_SUFFIX)
//!   are in-flight downloads and never show up in a scan.
//! - **Symlinks and special files** are skipped; the scan walks real
//!   directories only.
//! - **Unreadable entries** are reported in [`LocalScan::unreadable`] and the
//!   walk goes on. Only the sync root itself can fail a scan.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use skysync_core::{
    domain::newtypes::{FileHash, RelativePath},
    ports::{is_partial, FileSystemState, ILocalFileSystem, LocalFileState, LocalScan},
};

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// Zero-sized: every operation takes absolute paths, the sync root lives on
/// the account.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn modified_time(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().and_then(|st| {
        st.duration_since(std::time::UNIX_EPOCH)
            .ok()
            .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
    })
}

fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == ErrorKind::NotFound)
}

fn skip_unreadable(scan: &mut LocalScan, root: &Path, path: &Path, error: &dyn std::fmt::Display) {
    warn!(path = %path.display(), error = %error, "skipping unreadable path");
    match RelativePath::from_local(root, path) {
        Ok(relative) => {
            scan.unreadable.insert(relative);
        }
        Err(e) => debug!(path = %path.display(), error = %e, "unreadable path is not syncable"),
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self, cancel), fields(root = %root.display()))]
    async fn scan_tree(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LocalScan> {
        let root_meta = tokio::fs::metadata(root)
            .await
            .with_context(|| format!("sync root {}", root.display()))?;
        if !root_meta.is_dir() {
            anyhow::bail!("sync root is not a directory: {}", root.display());
        }

        let mut scan = LocalScan::default();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            if cancel.is_cancelled() {
                anyhow::bail!("local scan cancelled");
            }

            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) if dir.as_path() == root => {
                    return Err(e).with_context(|| format!("list sync root {}", root.display()))
                }
                Err(e) => {
                    skip_unreadable(&mut scan, root, &dir, &e);
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    // the rest of this directory cannot be listed
                    Err(e) if dir.as_path() == root => return Err(e.into()),
                    Err(e) => {
                        skip_unreadable(&mut scan, root, &dir, &e);
                        break;
                    }
                };
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => {
                        skip_unreadable(&mut scan, root, &path, &e);
                        continue;
                    }
                };

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    trace!(path = %path.display(), "skipping non-regular file");
                    continue;
                }
                if is_partial(&path) {
                    trace!(path = %path.display(), "skipping partial download");
                    continue;
                }

                let relative = match RelativePath::from_local(root, &path) {
                    Ok(relative) => relative,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unsyncable path");
                        continue;
                    }
                };

                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => {
                        scan.unreadable.insert(relative);
                        warn!(path = %path.display(), error = %e, "skipping unreadable path");
                        continue;
                    }
                };
                let hash = match self.compute_hash(&path, cancel).await {
                    Ok(hash) => hash,
                    Err(e) if cancel.is_cancelled() => return Err(e),
                    // removed between listing and hashing
                    Err(e) if is_not_found(&e) => continue,
                    Err(e) => {
                        scan.unreadable.insert(relative);
                        warn!(path = %path.display(), error = %e, "skipping unreadable path");
                        continue;
                    }
                };

                scan.files.insert(
                    relative,
                    LocalFileState {
                        size: metadata.len(),
                        modified: modified_time(&metadata),
                        hash,
                    },
                );
            }
        }

        debug!(
            files = scan.files.len(),
            unreadable = scan.unreadable.len(),
            "local scan complete"
        );
        Ok(scan)
    }

    #[instrument(skip(self, cancel), fields(path = %path.display()))]
    async fn compute_hash(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<FileHash> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];

        loop {
            if cancel.is_cancelled() {
                anyhow::bail!("hashing cancelled: {}", path.display());
            }
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let hash = FileHash::from_digest(&hasher.finalize());
        trace!(hash = %hash, "hash computed");
        Ok(hash)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(FileSystemState {
            exists: true,
            is_file: metadata.is_file(),
            size: metadata.len(),
            modified: modified_time(&metadata),
        })
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to)
            .await
            .with_context(|| format!("rename {} -> {}", from.display(), to.display()))?;
        debug!("rename complete");
        Ok(())
    }

    /// Removes a regular file; a file that is already gone is not an error.
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }
}
