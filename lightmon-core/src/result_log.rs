//! Circular result log for a sensor node.
//!
//! The log keeps the last [`LOG_CAPACITY`] test outcomes. `last_index` always
//! points at the most recently written slot; a write advances it (wrapping)
//! and overwrites the oldest entry. A slot whose timestamp is zero has never
//! been written.
//!
//! The log is persisted verbatim after every write as a fixed-size blob
//! (see [`ResultLog::to_bytes`]) and reloaded verbatim at startup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of slots in the log.
pub const LOG_CAPACITY: usize = 8;

/// Bytes per persisted entry: `passed:u8` + `timestamp:u32 LE`.
const ENTRY_LEN: usize = 5;

/// Size of the persisted blob: all entries followed by `last_index:u8`.
pub const PERSISTED_LEN: usize = LOG_CAPACITY * ENTRY_LEN + 1;

/// Errors decoding a persisted log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// Blob has the wrong size.
    #[error("invalid log blob length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Length found.
        actual: usize,
    },
    /// Stored cursor points outside the log.
    #[error("invalid last index: {0}")]
    InvalidIndex(u8),
}

/// One test outcome. Immutable once written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// True when the campaign passed.
    pub passed: bool,
    /// Campaign start, epoch seconds. Zero marks a never-written slot.
    pub timestamp: u32,
}

impl ResultEntry {
    /// Create a new entry.
    pub fn new(passed: bool, timestamp: u32) -> Self {
        Self { passed, timestamp }
    }

    /// False for slots that were never written.
    pub fn is_written(&self) -> bool {
        self.timestamp != 0
    }
}

/// Fixed-capacity circular buffer of test outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultLog {
    entries: [ResultEntry; LOG_CAPACITY],
    last_index: usize,
}

impl ResultLog {
    /// Create an empty log (all slots unwritten, cursor at 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, evicting the oldest one.
    ///
    /// Returns the slot index that was written.
    pub fn append(&mut self, entry: ResultEntry) -> usize {
        self.last_index = (self.last_index + 1) % LOG_CAPACITY;
        self.entries[self.last_index] = entry;
        self.last_index
    }

    /// Index of the most recently written slot.
    pub fn last_index(&self) -> usize {
        self.last_index
    }

    /// The most recently written entry.
    pub fn latest(&self) -> ResultEntry {
        self.entries[self.last_index]
    }

    /// Entry at a slot index (taken modulo the capacity).
    pub fn entry(&self, index: usize) -> ResultEntry {
        self.entries[index % LOG_CAPACITY]
    }

    /// All slots in storage order.
    pub fn entries(&self) -> &[ResultEntry; LOG_CAPACITY] {
        &self.entries
    }

    /// Number of slots that hold a real entry.
    pub fn written_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_written()).count()
    }

    /// Encode as the fixed-size persistence blob.
    pub fn to_bytes(&self) -> [u8; PERSISTED_LEN] {
        let mut buf = [0u8; PERSISTED_LEN];
        for (i, entry) in self.entries.iter().enumerate() {
            let at = i * ENTRY_LEN;
            buf[at] = u8::from(entry.passed);
            buf[at + 1..at + ENTRY_LEN].copy_from_slice(&entry.timestamp.to_le_bytes());
        }
        // last_index < LOG_CAPACITY, always fits a byte
        buf[PERSISTED_LEN - 1] = self.last_index as u8;
        buf
    }

    /// Decode a blob produced by [`ResultLog::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LogError> {
        if bytes.len() != PERSISTED_LEN {
            return Err(LogError::InvalidLength {
                expected: PERSISTED_LEN,
                actual: bytes.len(),
            });
        }

        let last = bytes[PERSISTED_LEN - 1];
        if usize::from(last) >= LOG_CAPACITY {
            return Err(LogError::InvalidIndex(last));
        }

        let mut entries = [ResultEntry::default(); LOG_CAPACITY];
        for (i, chunk) in bytes[..PERSISTED_LEN - 1].chunks_exact(ENTRY_LEN).enumerate() {
            entries[i] = ResultEntry {
                passed: chunk[0] != 0,
                timestamp: u32::from_le_bytes([chunk[1], chunk[2], chunk[3], chunk[4]]),
            };
        }

        Ok(Self {
            entries,
            last_index: usize::from(last),
        })
    }
}
