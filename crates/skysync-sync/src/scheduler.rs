//! Per-account sync scheduling
//!
//! The [`AccountScheduler`] owns one cancellable periodic task per account.
//! Each task waits for its interval, then runs a pass through the shared
//! [`SyncEngine`](super::engine::SyncEngine). A tick that finds a run still
//! in progress is skipped.
//!
//! ```text
//! schedule(a, 60) ──→ DashMap<AccountId, ScheduledSync> ──→ task: interval ─→ start_sync_with
//!                                                               ↑
//!                                                      CancellationToken
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use skysync_core::domain::{account::clamp_interval_minutes, newtypes::AccountId};

use crate::{engine::SyncEngine, SyncError};

/// A running periodic task
struct ScheduledSync {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    interval: Duration,
}

/// Runs each scheduled account on its own interval
pub struct AccountScheduler {
    engine: Arc<SyncEngine>,
    tasks: DashMap<AccountId, ScheduledSync>,
    shutdown: CancellationToken,
}

impl AccountScheduler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            tasks: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run `account_id` every `interval_minutes` (clamped to 60..=1440).
    ///
    /// An existing schedule for the account is cancelled first. The first
    /// pass starts one interval from now.
    pub fn schedule(&self, account_id: AccountId, interval_minutes: u32) -> Duration {
        let interval = Duration::from_secs(u64::from(clamp_interval_minutes(interval_minutes)) * 60);

        if let Some((_, previous)) = self.tasks.remove(&account_id) {
            debug!(account_id = %account_id, "Replacing existing schedule");
            previous.cancel.cancel();
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(
            run_periodic(Arc::clone(&self.engine), account_id, interval, cancel.clone())
                .instrument(tracing::info_span!("scheduler", account_id = %account_id)),
        );
        self.tasks.insert(
            account_id,
            ScheduledSync {
                cancel,
                handle,
                interval,
            },
        );

        info!(
            account_id = %account_id,
            interval_minutes = interval.as_secs() / 60,
            "Account scheduled"
        );
        interval
    }

    /// Stop the periodic task; an in-flight pass is cancelled as well.
    pub fn unschedule(&self, account_id: &AccountId) -> bool {
        match self.tasks.remove(account_id) {
            Some((_, task)) => {
                task.cancel.cancel();
                info!(account_id = %account_id, "Account unscheduled");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, account_id: &AccountId) -> bool {
        self.tasks
            .get(account_id)
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub fn interval(&self, account_id: &AccountId) -> Option<Duration> {
        self.tasks.get(account_id).map(|task| task.interval)
    }

    /// Start a pass right away, outside the interval
    pub fn trigger_now(&self, account_id: AccountId) -> JoinHandle<Result<(), SyncError>> {
        let engine = Arc::clone(&self.engine);
        let cancel = self
            .tasks
            .get(&account_id)
            .map(|task| task.cancel.clone())
            .unwrap_or_else(|| self.shutdown.child_token());

        tokio::spawn(async move {
            info!(account_id = %account_id, "Manual sync triggered");
            engine.start_sync_with(account_id, &cancel).await.map(|_| ())
        })
    }

    /// Cancel every task and wait for them to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let accounts: Vec<AccountId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for account_id in accounts {
            if let Some((_, task)) = self.tasks.remove(&account_id) {
                if let Err(e) = task.handle.await {
                    warn!(account_id = %account_id, error = %e, "Scheduled task ended abnormally");
                }
            }
        }
        info!("Scheduler stopped");
    }
}

impl Drop for AccountScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_periodic(
    engine: Arc<SyncEngine>,
    account_id: AccountId,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Schedule cancelled");
                break;
            }
            _ = ticker.tick() => {
                match engine.start_sync_with(account_id, &cancel).await {
                    Ok(report) => debug!(
                        transferred = report.transferred(),
                        failed = report.failed,
                        "Scheduled pass finished"
                    ),
                    Err(SyncError::AlreadyRunning(_)) => {
                        debug!("Previous pass still running, skipping tick");
                    }
                    Err(SyncError::Cancelled) => break,
                    Err(e) => warn!(error = %e, "Scheduled pass failed"),
                }
            }
        }
    }
}
