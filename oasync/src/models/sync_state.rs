//! Persisted run and pass state
//!
//! Every field here lives in the settings table between steps; nothing is
//! carried in memory from one tick to the next.

use oasync_common::db::{STATUS_ERRORED, STATUS_IDLE, STATUS_RUNNING};
use oasync_common::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process-wide run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    /// Breaker tripped; requires a manual Start
    Errored,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => STATUS_IDLE,
            RunStatus::Running => STATUS_RUNNING,
            RunStatus::Errored => STATUS_ERRORED,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            STATUS_IDLE => Ok(RunStatus::Idle),
            STATUS_RUNNING => Ok(RunStatus::Running),
            STATUS_ERRORED => Ok(RunStatus::Errored),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Single process-wide run record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    pub status: RunStatus,
    pub error_count: i64,
    pub error_threshold: i64,
}

/// Per-kind pass cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Last processed listing index; -1 before the first item
    pub checkpoint_index: i64,
    pub total_remote_count: i64,
    /// Stale cleanup already ran for this pass
    pub cleanup_done: bool,
    /// Items whose local write failed this pass
    #[serde(default)]
    pub failed_items: i64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            checkpoint_index: -1,
            total_remote_count: 0,
            cleanup_done: false,
            failed_items: 0,
        }
    }
}

impl SyncState {
    /// Number of listing items already behind the cursor
    ///
    /// Capped at the current total, which can shrink below the cursor when
    /// the remote listing loses items mid-pass.
    pub fn processed(&self) -> i64 {
        (self.checkpoint_index + 1).clamp(0, self.total_remote_count.max(0))
    }
}

/// Result of one bounded engine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Status was not Running; nothing was done
    NotRunning,
    /// Budget exhausted; more work remains
    Yielded,
    /// Transient failure; the step stopped without touching the cursor
    Aborted,
    /// All kinds finished their pass and the run returned to Idle
    Completed,
}

/// Progress of one kind as reported to the control surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindProgress {
    pub kind: EntityKind,
    pub processed: i64,
    pub total: i64,
    pub failed_items: i64,
    pub cleanup_done: bool,
}

/// Answer to GetStatus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub status: RunStatus,
    pub error_count: i64,
    pub kinds: Vec<KindProgress>,
}

impl SyncStatusReport {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindProgress> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}
