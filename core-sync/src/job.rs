//! # Sync Run State Machine
//!
//! ```text
//! Idle → Locking → EnsuringLayout → Scanning → Reconciling → Executing → Logging → Idle
//!          ↓             ↓              ↓            ↓            ↓          ↓
//!          └─────────────┴──────────────┴─── Failed ─┴────────────┴──────────┘
//!                                              ↓
//!                                             Idle
//! ```

use crate::error::{Result, SyncError};
use crate::reconcile::Resolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    Locking,
    EnsuringLayout,
    Scanning,
    Reconciling,
    Executing,
    Logging,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Locking => "locking",
            SyncPhase::EnsuringLayout => "ensuring_layout",
            SyncPhase::Scanning => "scanning",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::Executing => "executing",
            SyncPhase::Logging => "logging",
            SyncPhase::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (self, next),
            (Idle, Locking)
                | (Locking, EnsuringLayout)
                | (EnsuringLayout, Scanning)
                | (Scanning, Reconciling)
                | (Reconciling, Executing)
                | (Executing, Logging)
                | (Logging, Idle)
                | (Failed, Idle)
        ) || (next == Failed && !matches!(self, Idle | Failed))
    }

    /// Validated transition.
    pub fn transition(self, next: SyncPhase) -> Result<SyncPhase> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SyncError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    pub path: String,
    pub reason: String,
}

/// Result of the settings-file flow within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsOutcome {
    Uploaded,
    Downloaded,
    Unchanged,
    /// Neither side has a settings file
    Absent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: RunId,
    /// Paths, in execution order
    pub uploaded: Vec<String>,
    pub downloaded: Vec<String>,
    pub conflicts_local_won: usize,
    pub conflicts_remote_won: usize,
    pub unchanged: usize,
    pub failed: Vec<FailedAction>,
    /// Set when the cancellation token fired mid-run
    pub cancelled: bool,
    /// Set when a fatal storage error stopped the batch
    pub aborted: bool,
    pub settings_outcome: SettingsOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub(crate) fn new(run_id: RunId, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            uploaded: Vec::new(),
            downloaded: Vec::new(),
            conflicts_local_won: 0,
            conflicts_remote_won: 0,
            unchanged: 0,
            failed: Vec::new(),
            cancelled: false,
            aborted: false,
            settings_outcome: SettingsOutcome::Absent,
            started_at,
            finished_at: started_at,
        }
    }

    pub(crate) fn count_conflict(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::LocalWins => self.conflicts_local_won += 1,
            Resolution::RemoteWins => self.conflicts_remote_won += 1,
        }
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts_local_won + self.conflicts_remote_won
    }

    pub fn completed_actions(&self) -> usize {
        self.uploaded.len() + self.downloaded.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled && !self.aborted
    }

    pub fn duration_secs(&self) -> u64 {
        (self.finished_at - self.started_at).num_seconds().max(0) as u64
    }
}
