//! Node addressing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mesh address of a node.
///
/// Addresses are opaque 16-bit values. `0` is reserved as the empty-slot
/// sentinel and is never a valid node; `0xFFFF` is the all-nodes group
/// address used for publish/broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(u16);

impl NodeAddress {
    /// The empty-slot sentinel.
    pub const UNASSIGNED: Self = Self(0);

    /// Group address reaching every node.
    pub const ALL_NODES: Self = Self(0xFFFF);

    /// Create an address from its raw value.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// True for the reserved `0` sentinel.
    pub const fn is_unassigned(&self) -> bool {
        self.0 == 0
    }

    /// True for the all-nodes group address.
    pub const fn is_broadcast(&self) -> bool {
        self.0 == Self::ALL_NODES.0
    }

    /// Little-endian wire bytes.
    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Parse from little-endian wire bytes.
    pub const fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }
}

impl From<u16> for NodeAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_and_broadcast() {
        assert!(NodeAddress::UNASSIGNED.is_unassigned());
        assert!(!NodeAddress::new(5).is_unassigned());
        assert!(NodeAddress::ALL_NODES.is_broadcast());
        assert!(!NodeAddress::new(5).is_broadcast());
    }

    #[test]
    fn le_bytes() {
        let addr = NodeAddress::new(0x1234);
        assert_eq!(addr.to_le_bytes(), [0x34, 0x12]);
        assert_eq!(NodeAddress::from_le_bytes([0x34, 0x12]), addr);
    }

    #[test]
    fn display_is_hex() {
        assert_eq!(NodeAddress::new(7).to_string(), "0x0007");
    }

    #[test]
    fn serializes_as_plain_number() {
        let json = serde_json::to_string(&NodeAddress::new(42)).unwrap();
        assert_eq!(json, "42");
    }
}
