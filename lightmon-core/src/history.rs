//! Historical results collected from log replays.
//!
//! Entries are kept per node, keyed by campaign timestamp. Replays overlap
//! (every GET_LOG resends the whole log), so the first value seen for a
//! timestamp wins and later copies are dropped.

use std::collections::BTreeMap;

use serde::Serialize;

use lightmon_types::NodeAddress;

/// Per-node history of logged outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryBook {
    nodes: BTreeMap<NodeAddress, BTreeMap<u32, bool>>,
}

impl HistoryBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a logged outcome. Returns false if the timestamp was already known.
    pub fn record(&mut self, node: NodeAddress, timestamp: u32, passed: bool) -> bool {
        let entries = self.nodes.entry(node).or_default();
        if entries.contains_key(&timestamp) {
            return false;
        }
        entries.insert(timestamp, passed);
        true
    }

    /// Entries for one node, oldest first.
    pub fn node(&self, node: NodeAddress) -> impl Iterator<Item = (u32, bool)> + '_ {
        self.nodes
            .get(&node)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|(ts, passed)| (*ts, *passed)))
    }

    /// Nodes with at least one entry.
    pub fn nodes(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        self.nodes.keys().copied()
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.nodes.values().map(BTreeMap::len).sum()
    }

    /// Check if the book is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
