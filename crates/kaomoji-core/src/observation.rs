//! Bounded observation log: human-readable notes describing every core decision.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of observations retained; the oldest are evicted first.
pub const OBSERVATION_CAPACITY: usize = 100;

/// One (message, adjustment) pair shown in the "system observations" panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationEntry {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub adjustment: String,
    /// Unix timestamp (milliseconds) when the observation was recorded.
    #[serde(default)]
    pub timestamp: i64,
}

impl ObservationEntry {
    pub fn new(message: impl Into<String>, adjustment: impl Into<String>, timestamp: i64) -> Self {
        Self {
            message: message.into(),
            adjustment: adjustment.into(),
            timestamp,
        }
    }
}

/// Append-only FIFO ring capped at [`OBSERVATION_CAPACITY`].
///
/// Serializes as a plain list so the persisted document keeps the
/// `observations: [{message, adjustment, timestamp}]` shape. Decoding goes through
/// [`FromIterator`], so an oversized list is trimmed to capacity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ObservationEntry>", into = "Vec<ObservationEntry>")]
pub struct ObservationLog {
    entries: VecDeque<ObservationEntry>,
}

impl ObservationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail and evicts from the head once over capacity.
    pub fn push(&mut self, entry: ObservationEntry) {
        self.entries.push_back(entry);
        self.enforce_capacity();
    }

    pub fn record(
        &mut self,
        message: impl Into<String>,
        adjustment: impl Into<String>,
        timestamp: i64,
    ) {
        self.push(ObservationEntry::new(message, adjustment, timestamp));
    }

    /// Drops the oldest entries until the log fits its capacity. Needed after
    /// deserializing a document written by an older build with a larger cap.
    pub fn enforce_capacity(&mut self) {
        while self.entries.len() > OBSERVATION_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of all entries in insertion order (oldest first).
    pub fn snapshot(&self) -> Vec<ObservationEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<ObservationEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn latest(&self) -> Option<&ObservationEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObservationEntry> {
        self.entries.iter()
    }
}

impl FromIterator<ObservationEntry> for ObservationLog {
    fn from_iter<I: IntoIterator<Item = ObservationEntry>>(iter: I) -> Self {
        let mut log = Self {
            entries: iter.into_iter().collect(),
        };
        log.enforce_capacity();
        log
    }
}

impl From<Vec<ObservationEntry>> for ObservationLog {
    fn from(entries: Vec<ObservationEntry>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<ObservationLog> for Vec<ObservationEntry> {
    fn from(log: ObservationLog) -> Self {
        log.entries.into()
    }
}
