//! Progress ledger.
//!
//! The one shared record of the current (or most recent) batch. Workers write
//! to it through the coordinator; callers read it through
//! [`Ledger::snapshot`], which clones the whole record under the lock, so a
//! poll never observes a half-applied update.
//!
//! ```text
//! idle ──begin──▶ running ──finish──▶ completed
//!   ▲                                    │
//!   └───────────────reset────────────────┘
//! ```
//!
//! `begin` on a completed ledger starts a fresh run and discards the previous
//! run's data; `begin` or `reset` while running is refused.
//!
//! ## Size accounting
//!
//! | Outcome | `original_size` | `final_size` | list |
//! |---|---|---|---|
//! | `Success` | + pre-size | + final size | |
//! | `SuccessExpanded` | + pre-size | + total of outputs | |
//! | `SkippedExisting` | + pre-size | + pre-size | `skipped_files` |
//! | `Failed` | + pre-size | + pre-size | `failed_files` |
//! | cancelled before start | | | |

use crate::transform::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("a batch is already running")]
pub struct AlreadyRunning;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
}

/// A consistent copy of the ledger at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Bytes before transformation, over attempted items.
    pub original_size: u64,
    /// Bytes after transformation, over attempted items.
    pub final_size: u64,
    /// Empty when nothing is in flight.
    pub current_file: String,
    pub failed_files: Vec<PathBuf>,
    pub skipped_files: Vec<PathBuf>,
}

impl ProgressSnapshot {
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Bytes saved so far; negative when outputs grew.
    pub fn saved_bytes(&self) -> i64 {
        self.original_size as i64 - self.final_size as i64
    }

    /// Items that neither failed nor were skipped.
    pub fn succeeded(&self) -> usize {
        self.processed
            .saturating_sub(self.failed_files.len() + self.skipped_files.len())
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<ProgressSnapshot>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProgressSnapshot> {
        // Nothing panics while holding this lock; poisoning is a bug.
        self.state.lock().expect("progress ledger lock poisoned")
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state().clone()
    }

    /// Start a new run, replacing whatever the ledger held.
    ///
    /// The total is the number of items to dispatch, or `excluded` when there
    /// is nothing to dispatch. In the latter case the run is recorded as
    /// completed immediately with every selected file processed.
    pub fn begin(&self, items: usize, excluded: usize) -> Result<(), AlreadyRunning> {
        let mut state = self.state();
        if state.is_running() {
            return Err(AlreadyRunning);
        }
        let now = Utc::now();
        *state = ProgressSnapshot {
            total: if items == 0 { excluded } else { items },
            status: RunStatus::Running,
            start_time: Some(now),
            ..ProgressSnapshot::default()
        };
        if items == 0 {
            state.processed = state.total;
            state.status = RunStatus::Completed;
            state.end_time = Some(now);
        }
        Ok(())
    }

    pub fn set_current(&self, path: &Path) {
        self.state().current_file = path.display().to_string();
    }

    /// Apply one item's outcome. `pre_size` is the size captured when the
    /// item was resolved.
    pub fn record(&self, path: &Path, pre_size: u64, outcome: &Outcome) {
        let mut state = self.state();
        if !Self::advance(&mut state, 1) {
            return;
        }
        state.original_size += pre_size;
        match outcome {
            Outcome::Success { final_size } => state.final_size += final_size,
            Outcome::SuccessExpanded {
                total_final_size, ..
            } => state.final_size += total_final_size,
            Outcome::SkippedExisting { .. } => {
                state.final_size += pre_size;
                state.skipped_files.push(path.to_path_buf());
            }
            Outcome::Failed { .. } => {
                state.final_size += pre_size;
                state.failed_files.push(path.to_path_buf());
            }
        }
    }

    /// Count `count` items as processed without attempting them.
    pub fn record_unattempted(&self, count: usize) {
        let mut state = self.state();
        Self::advance(&mut state, count);
    }

    fn advance(state: &mut ProgressSnapshot, count: usize) -> bool {
        if !state.is_running() || state.processed + count > state.total {
            tracing::error!(
                processed = state.processed,
                total = state.total,
                count,
                status = ?state.status,
                "Ledger update outside an active run"
            );
            return false;
        }
        state.processed += count;
        true
    }

    /// Mark the run completed.
    pub fn finish(&self) {
        let mut state = self.state();
        if state.processed != state.total {
            tracing::error!(
                processed = state.processed,
                total = state.total,
                "Run finished with unaccounted items"
            );
        }
        state.status = RunStatus::Completed;
        state.end_time = Some(Utc::now());
        state.current_file.clear();
    }

    /// Return to idle with all counters zeroed.
    pub fn reset(&self) -> Result<(), AlreadyRunning> {
        let mut state = self.state();
        if state.is_running() {
            return Err(AlreadyRunning);
        }
        *state = ProgressSnapshot::default();
        Ok(())
    }
}
