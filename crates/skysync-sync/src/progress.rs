//! Run progress accounting
//!
//! A [`ProgressTracker`] lives for one run. Transfer workers update its
//! atomic counters concurrently; every state change and file completion is
//! published as a [`SyncProgress`] on the engine's broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::trace;

use skysync_core::{
    domain::{
        newtypes::{AccountId, RelativePath},
        SyncDirection, SyncProgress, SyncState,
    },
    ports::TransferProgressFn,
};

pub struct ProgressTracker {
    account_id: AccountId,
    sender: broadcast::Sender<SyncProgress>,
    transfers_started: OnceLock<Instant>,
    total_files: AtomicU64,
    total_bytes: AtomicU64,
    completed_files: AtomicU64,
    failed_files: AtomicU64,
    completed_bytes: AtomicU64,
    /// Completed bytes plus bytes of in-flight files
    bytes_transferred: AtomicU64,
    active_uploads: AtomicU64,
    active_downloads: AtomicU64,
    current_file: Mutex<Option<RelativePath>>,
}

impl ProgressTracker {
    pub fn new(account_id: AccountId, sender: broadcast::Sender<SyncProgress>) -> Self {
        Self {
            account_id,
            sender,
            transfers_started: OnceLock::new(),
            total_files: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            completed_files: AtomicU64::new(0),
            failed_files: AtomicU64::new(0),
            completed_bytes: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            active_uploads: AtomicU64::new(0),
            active_downloads: AtomicU64::new(0),
            current_file: Mutex::new(None),
        }
    }

    /// Add a batch to the totals and start the throughput clock
    pub fn add_planned(&self, files: u64, bytes: u64) {
        self.transfers_started.get_or_init(Instant::now);
        self.total_files.fetch_add(files, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn file_started(&self, direction: SyncDirection, path: &RelativePath) {
        self.active_counter(direction).fetch_add(1, Ordering::Relaxed);
        if let Ok(mut current) = self.current_file.lock() {
            *current = Some(path.clone());
        }
    }

    /// Per-file byte callback for the remote drive.
    ///
    /// `reported` holds the high-water mark for this file so a retried
    /// transfer restarting at zero is not counted twice.
    pub fn byte_progress(self: &Arc<Self>, reported: Arc<AtomicU64>) -> TransferProgressFn {
        let tracker = Arc::clone(self);
        Arc::new(move |so_far| {
            let previous = reported.fetch_max(so_far, Ordering::Relaxed);
            if so_far > previous {
                tracker
                    .bytes_transferred
                    .fetch_add(so_far - previous, Ordering::Relaxed);
            }
        })
    }

    /// Close out one file and publish a `Syncing` event.
    ///
    /// `size` is `None` for a failed file, whose partial bytes are taken back
    /// out of the transferred total.
    pub fn file_finished(&self, direction: SyncDirection, size: Option<u64>, reported: &AtomicU64) {
        let _ = self
            .active_counter(direction)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });

        match size {
            Some(size) => {
                self.completed_files.fetch_add(1, Ordering::Relaxed);
                self.completed_bytes.fetch_add(size, Ordering::Relaxed);
                let seen = reported.load(Ordering::Relaxed);
                if size > seen {
                    self.bytes_transferred
                        .fetch_add(size - seen, Ordering::Relaxed);
                }
            }
            None => {
                self.failed_files.fetch_add(1, Ordering::Relaxed);
                // bytes of a failed file never arrived
                let seen = reported.swap(0, Ordering::Relaxed);
                let _ = self.bytes_transferred.fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |v| Some(v.saturating_sub(seen)),
                );
            }
        }
        self.emit(SyncState::Syncing);
    }

    /// A transfer interrupted by cancellation: neither completed nor failed
    pub fn file_cancelled(&self, direction: SyncDirection) {
        let _ = self
            .active_counter(direction)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn completed_files(&self) -> u64 {
        self.completed_files.load(Ordering::Relaxed)
    }

    pub fn failed_files(&self) -> u64 {
        self.failed_files.load(Ordering::Relaxed)
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed_bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, state: SyncState) -> SyncProgress {
        let total_bytes = self.total_bytes.load(Ordering::Relaxed);
        let transferred = self.bytes_transferred.load(Ordering::Relaxed);

        let bytes_per_sec = self
            .transfers_started
            .get()
            .map(|started| started.elapsed().as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map_or(0.0, |secs| transferred as f64 / secs);
        let eta_seconds = (bytes_per_sec > 0.0).then(|| {
            let remaining = total_bytes.saturating_sub(transferred);
            (remaining as f64 / bytes_per_sec).ceil() as u64
        });

        SyncProgress {
            account_id: self.account_id,
            state,
            total_files: self.total_files.load(Ordering::Relaxed),
            completed_files: self.completed_files(),
            failed_files: self.failed_files(),
            total_bytes,
            completed_bytes: transferred.min(total_bytes),
            active_uploads: self.active_uploads.load(Ordering::Relaxed),
            active_downloads: self.active_downloads.load(Ordering::Relaxed),
            throughput_mbps: bytes_per_sec / 1_000_000.0,
            eta_seconds,
            current_file: self.current_file.lock().ok().and_then(|c| c.clone()),
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Publish a snapshot; having no subscribers is fine.
    pub fn emit(&self, state: SyncState) {
        self.publish(self.snapshot(state));
    }

    pub fn emit_message(&self, state: SyncState, message: impl Into<String>) {
        self.publish(self.snapshot(state).with_message(message));
    }

    fn publish(&self, event: SyncProgress) {
        trace!(
            state = %event.state,
            completed = event.completed_files,
            failed = event.failed_files,
            total = event.total_files,
            "progress"
        );
        let _ = self.sender.send(event);
    }

    fn active_counter(&self, direction: SyncDirection) -> &AtomicU64 {
        match direction {
            SyncDirection::Download => &self.active_downloads,
            _ => &self.active_uploads,
        }
    }
}
