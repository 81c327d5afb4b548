//! Envelope - source/destination framing for a protocol message.
//!
//! The mesh stack normally carries addressing out of band. The bundled
//! transports (in-memory mesh, UDP) have no such side channel, so they put
//! the two addresses in front of the message frame.

use crate::{Message, NodeAddress, WireError};

/// Size of the address header in bytes.
const HEADER_LEN: usize = 4;

/// A message together with its source and destination addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Sender address
    pub source: NodeAddress,
    /// Receiver address, or [`NodeAddress::ALL_NODES`]
    pub destination: NodeAddress,
    /// The protocol message
    pub message: Message,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(source: NodeAddress, destination: NodeAddress, message: Message) -> Self {
        Self {
            source,
            destination,
            message,
        }
    }

    /// Encode as `source:u16 LE ‖ destination:u16 LE ‖ frame`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let frame = self.message.to_bytes();
        let mut buf = Vec::with_capacity(HEADER_LEN + frame.len());
        buf.extend_from_slice(&self.source.to_le_bytes());
        buf.extend_from_slice(&self.destination.to_le_bytes());
        buf.extend_from_slice(&frame);
        buf
    }

    /// Decode from bytes produced by [`Envelope::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let source = NodeAddress::from_le_bytes([bytes[0], bytes[1]]);
        let destination = NodeAddress::from_le_bytes([bytes[2], bytes[3]]);
        let message = Message::from_bytes(&bytes[HEADER_LEN..])?;
        Ok(Self {
            source,
            destination,
            message,
        })
    }

    /// True when `address` should accept this envelope.
    pub fn is_for(&self, address: NodeAddress) -> bool {
        self.destination == address || self.destination.is_broadcast()
    }
}
