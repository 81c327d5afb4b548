//! Node roster and per-phase reply tracking.
//!
//! The roster is the ordered list of node addresses the coordinator polls.
//! It is bounded by [`ROSTER_CAPACITY`], grows by appending and is cleared in
//! bulk. The sentinel address 0 may be stored; polling skips it.

use std::collections::BTreeSet;

use lightmon_types::NodeAddress;
use thiserror::Error;

/// Maximum number of roster entries.
pub const ROSTER_CAPACITY: usize = 512;

/// Error type for roster operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    /// Roster is at capacity.
    #[error("roster full (capacity: {capacity})")]
    Full {
        /// Roster capacity.
        capacity: usize,
    },
}

/// Ordered, capacity-bounded list of node addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRoster {
    capacity: usize,
    nodes: Vec<NodeAddress>,
}

impl NodeRoster {
    /// Create an empty roster with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(ROSTER_CAPACITY)
    }

    /// Create an empty roster with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            nodes: Vec::new(),
        }
    }

    /// Append an address.
    pub fn push(&mut self, address: NodeAddress) -> Result<(), RosterError> {
        if self.nodes.len() >= self.capacity {
            return Err(RosterError::Full {
                capacity: self.capacity,
            });
        }
        self.nodes.push(address);
        Ok(())
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Address at a position, if within the current length.
    pub fn get(&self, index: usize) -> Option<NodeAddress> {
        self.nodes.get(index).copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries in roster order.
    pub fn iter(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        self.nodes.iter().copied()
    }
}

impl Default for NodeRoster {
    fn default() -> Self {
        Self::new()
    }
}

/// Set of nodes that answered during the current polling phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingSet {
    answered: BTreeSet<NodeAddress>,
}

impl TrackingSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node as answered.
    pub fn mark(&mut self, address: NodeAddress) {
        self.answered.insert(address);
    }

    /// Check if a node answered.
    pub fn contains(&self, address: NodeAddress) -> bool {
        self.answered.contains(&address)
    }

    /// Forget every answer.
    pub fn clear(&mut self) {
        self.answered.clear();
    }

    /// Number of nodes that answered.
    pub fn len(&self) -> usize {
        self.answered.len()
    }

    /// Check if no node answered.
    pub fn is_empty(&self) -> bool {
        self.answered.is_empty()
    }

    /// Answered nodes in address order.
    pub fn iter(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        self.answered.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut roster = NodeRoster::new();
        for a in [7, 0, 5] {
            roster.push(NodeAddress::new(a)).unwrap();
        }

        let listed: Vec<u16> = roster.iter().map(|a| a.value()).collect();
        assert_eq!(listed, vec![7, 0, 5]);
        assert_eq!(roster.get(1), Some(NodeAddress::UNASSIGNED));
        assert_eq!(roster.get(3), None);
    }

    #[test]
    fn rejects_past_capacity() {
        let mut roster = NodeRoster::new();
        for a in 1..=ROSTER_CAPACITY as u16 {
            roster.push(NodeAddress::new(a)).unwrap();
        }

        let result = roster.push(NodeAddress::new(999));
        assert_eq!(result, Err(RosterError::Full { capacity: 512 }));
        assert_eq!(roster.len(), ROSTER_CAPACITY);
    }

    #[test]
    fn clear_empties_roster() {
        let mut roster = NodeRoster::with_capacity(2);
        roster.push(NodeAddress::new(1)).unwrap();
        roster.push(NodeAddress::new(2)).unwrap();
        roster.clear();

        assert!(roster.is_empty());
        assert!(roster.push(NodeAddress::new(3)).is_ok());
    }

    #[test]
    fn error_display() {
        let err = RosterError::Full { capacity: 512 };
        assert_eq!(err.to_string(), "roster full (capacity: 512)");
    }

    #[test]
    fn tracking_set_marks_and_clears() {
        let mut set = TrackingSet::new();
        set.mark(NodeAddress::new(5));
        set.mark(NodeAddress::new(5));

        assert!(set.contains(NodeAddress::new(5)));
        assert!(!set.contains(NodeAddress::new(7)));
        assert_eq!(set.len(), 1);

        set.clear();
        assert!(set.is_empty());
    }
}
