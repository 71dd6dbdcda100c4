//! Sync run state machine and progress snapshots

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{AccountId, RelativePath};

/// State of one sync run
///
/// ```text
/// Idle → Scanning → Syncing → Completed
///          │  │        ├────→ Failed
///          │  │        └────→ Cancelled
///          │  └─(empty plan)→ Completed
///          └────────────────→ Failed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Scanning,
    Syncing,
    Completed,
    Failed,
    Cancelled,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Completed | SyncState::Failed | SyncState::Cancelled
        )
    }

    pub fn can_transition_to(&self, target: SyncState) -> bool {
        use SyncState::*;
        match (self, target) {
            (Idle, Scanning) => true,
            (Scanning, Syncing | Completed) => true,
            (Syncing, Completed) => true,
            (Idle | Scanning | Syncing, Failed | Cancelled) => true,
            _ => false,
        }
    }

    /// # Errors
    /// Returns `DomainError::InvalidState` if the transition is not allowed
    pub fn transition_to(&self, target: SyncState) -> Result<SyncState, DomainError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(DomainError::InvalidState {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Idle => "idle",
            SyncState::Scanning => "scanning",
            SyncState::Syncing => "syncing",
            SyncState::Completed => "completed",
            SyncState::Failed => "failed",
            SyncState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A progress event for one account's run.
///
/// Emitted on every state transition and every per-file completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub account_id: AccountId,
    pub state: SyncState,
    pub total_files: u64,
    pub completed_files: u64,
    pub failed_files: u64,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub active_uploads: u64,
    pub active_downloads: u64,
    /// Megabytes per second since the transfer phase started
    pub throughput_mbps: f64,
    /// `None` while throughput is zero
    pub eta_seconds: Option<u64>,
    pub current_file: Option<RelativePath>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncProgress {
    /// An empty snapshot in `state`
    pub fn new(account_id: AccountId, state: SyncState) -> Self {
        Self {
            account_id,
            state,
            total_files: 0,
            completed_files: 0,
            failed_files: 0,
            total_bytes: 0,
            completed_bytes: 0,
            active_uploads: 0,
            active_downloads: 0,
            throughput_mbps: 0.0,
            eta_seconds: None,
            current_file: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Fraction of bytes done, in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            if self.state == SyncState::Completed {
                1.0
            } else {
                0.0
            }
        } else {
            (self.completed_bytes as f64 / self.total_bytes as f64).min(1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let state = SyncState::Idle;
        let state = state.transition_to(SyncState::Scanning).unwrap();
        let state = state.transition_to(SyncState::Syncing).unwrap();
        let state = state.transition_to(SyncState::Completed).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn empty_plan_skips_syncing() {
        assert!(SyncState::Scanning.can_transition_to(SyncState::Completed));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [SyncState::Completed, SyncState::Failed, SyncState::Cancelled] {
            assert!(terminal.transition_to(SyncState::Scanning).is_err());
            assert!(!terminal.can_transition_to(SyncState::Failed));
        }
    }

    #[test]
    fn idle_cannot_jump_to_syncing() {
        assert!(SyncState::Idle.transition_to(SyncState::Syncing).is_err());
    }

    #[test]
    fn fraction_handles_empty_runs() {
        let mut progress = SyncProgress::new(AccountId::new(), SyncState::Completed);
        assert_eq!(progress.fraction(), 1.0);
        progress.total_bytes = 200;
        progress.completed_bytes = 50;
        assert!((progress.fraction() - 0.25).abs() < f64::EPSILON);
    }
}
