//! Log replay cursor.
//!
//! GET_LOG answers immediately with the newest entry, then walks backwards
//! through the log one slot per timer tick. The walk stops when the cursor
//! comes back round to `last_index`, so every slot is visited exactly once.
//! Never-written slots are skipped but still consume a tick.

use crate::result_log::{ResultEntry, ResultLog, LOG_CAPACITY};

/// Outcome of one replay tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStep {
    /// Send this entry.
    Emit(ResultEntry),
    /// Slot at this index was never written.
    Skip(usize),
    /// Full circle completed; stop the timer.
    Done,
    /// No replay is running (stale tick).
    Idle,
}

/// Replay state. At most one replay runs at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogReplay {
    cursor: Option<usize>,
}

impl LogReplay {
    /// Create an idle replay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a replay and return the entry to send right away.
    pub fn start(&mut self, log: &ResultLog) -> ResultEntry {
        self.cursor = Some(step_back(log.last_index()));
        log.latest()
    }

    /// Advance by one tick.
    pub fn tick(&mut self, log: &ResultLog) -> ReplayStep {
        let Some(cursor) = self.cursor else {
            return ReplayStep::Idle;
        };

        if cursor == log.last_index() {
            self.cursor = None;
            return ReplayStep::Done;
        }

        let entry = log.entry(cursor);
        self.cursor = Some(step_back(cursor));
        if entry.is_written() {
            ReplayStep::Emit(entry)
        } else {
            ReplayStep::Skip(cursor)
        }
    }

    /// True while a replay is in progress.
    pub fn is_active(&self) -> bool {
        self.cursor.is_some()
    }
}

fn step_back(index: usize) -> usize {
    (index + LOG_CAPACITY - 1) % LOG_CAPACITY
}
