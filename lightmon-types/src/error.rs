//! Error types for the lightmon wire protocol.

use thiserror::Error;

use crate::Opcode;

/// Errors that can occur while decoding protocol frames.
///
/// Every variant means the frame is dropped: no reply, no state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Frame had no opcode byte at all
    #[error("empty frame")]
    Empty,

    /// Opcode byte is not part of the protocol
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Payload length does not match the fixed length for its opcode
    #[error("length mismatch for {opcode:?}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Opcode of the rejected frame
        opcode: Opcode,
        /// Fixed payload length for this opcode
        expected: usize,
        /// Payload length actually received
        actual: usize,
    },

    /// Envelope header shorter than required
    #[error("truncated envelope: need {needed} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes
        needed: usize,
        /// Bytes available
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::UnknownOpcode(0x42);
        assert_eq!(err.to_string(), "unknown opcode: 0x42");

        let err = WireError::LengthMismatch {
            opcode: Opcode::TestStart,
            expected: 6,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "length mismatch for TestStart: expected 6 bytes, got 1"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
