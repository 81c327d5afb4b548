//! Protocol messages for lightmon.
//!
//! Every message is an opcode byte followed by a fixed-length payload of
//! little-endian fields. There is no padding, checksum or sequence number;
//! integrity is left to the transport.

use serde::{Deserialize, Serialize};

use crate::WireError;

/// Opcode discriminator for protocol messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Request the latest raw sample
    GetStatus = 0x01,
    /// Test accepted / running
    TestAck = 0x02,
    /// Final (or latest logged) outcome
    TestResult = 0x03,
    /// Latest raw sample value
    UpdateStatus = 0x04,
    /// Start a test campaign
    TestStart = 0x05,
    /// Historical entry from the result log
    ResultLog = 0x06,
    /// Request a replay of the result log
    GetLog = 0x07,
    /// Poll for a test acknowledgement
    GetAck = 0x08,
    /// Ask the coordinator to resend the current TEST_START
    GetStart = 0x09,
    /// Poll for the latest result
    GetResult = 0x0A,
    /// Recalibrate the failure threshold
    Calibrate = 0x0C,
    /// Calibration done
    CalibrateOk = 0x0D,
}

impl Opcode {
    /// Fixed payload length in bytes for this opcode.
    pub const fn payload_len(self) -> usize {
        match self {
            Opcode::TestStart => 6,
            Opcode::TestResult => 1,
            Opcode::ResultLog => 5,
            Opcode::UpdateStatus => 2,
            Opcode::GetStatus
            | Opcode::TestAck
            | Opcode::GetLog
            | Opcode::GetAck
            | Opcode::GetStart
            | Opcode::GetResult
            | Opcode::Calibrate
            | Opcode::CalibrateOk => 0,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Opcode::GetStatus),
            0x02 => Ok(Opcode::TestAck),
            0x03 => Ok(Opcode::TestResult),
            0x04 => Ok(Opcode::UpdateStatus),
            0x05 => Ok(Opcode::TestStart),
            0x06 => Ok(Opcode::ResultLog),
            0x07 => Ok(Opcode::GetLog),
            0x08 => Ok(Opcode::GetAck),
            0x09 => Ok(Opcode::GetStart),
            0x0A => Ok(Opcode::GetResult),
            0x0C => Ok(Opcode::Calibrate),
            0x0D => Ok(Opcode::CalibrateOk),
            _ => Err(WireError::UnknownOpcode(value)),
        }
    }
}

/// All possible protocol messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Request the latest raw sample
    GetStatus,
    /// Start (or solicit) a test campaign
    TestStart(TestStart),
    /// Test accepted / running
    TestAck,
    /// Outcome of a test
    TestResult(TestResult),
    /// Historical log entry
    ResultLog(LoggedResult),
    /// Latest raw sample value
    UpdateStatus(StatusUpdate),
    /// Request a log replay
    GetLog,
    /// Poll for an acknowledgement
    GetAck,
    /// Request the current TEST_START parameters
    GetStart,
    /// Poll for the latest result
    GetResult,
    /// Recalibrate the threshold
    Calibrate,
    /// Calibration done
    CalibrateOk,
}

/// Start a test campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStart {
    /// Campaign length in seconds
    pub duration: u16,
    /// Campaign start, epoch seconds
    pub timestamp: u32,
}

/// Outcome of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// True when no sample exceeded the threshold
    pub passed: bool,
}

/// A historical entry replayed from a node's result log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedResult {
    /// Outcome of that campaign
    pub passed: bool,
    /// Campaign start, epoch seconds
    pub timestamp: u32,
}

/// Latest raw sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Sample value
    pub value: u16,
}

impl Message {
    /// Opcode of this message.
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::GetStatus => Opcode::GetStatus,
            Message::TestStart(_) => Opcode::TestStart,
            Message::TestAck => Opcode::TestAck,
            Message::TestResult(_) => Opcode::TestResult,
            Message::ResultLog(_) => Opcode::ResultLog,
            Message::UpdateStatus(_) => Opcode::UpdateStatus,
            Message::GetLog => Opcode::GetLog,
            Message::GetAck => Opcode::GetAck,
            Message::GetStart => Opcode::GetStart,
            Message::GetResult => Opcode::GetResult,
            Message::Calibrate => Opcode::Calibrate,
            Message::CalibrateOk => Opcode::CalibrateOk,
        }
    }

    /// Encode to the wire frame: opcode byte followed by the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let opcode = self.opcode();
        let mut buf = Vec::with_capacity(1 + opcode.payload_len());
        buf.push(opcode as u8);
        match self {
            Message::TestStart(start) => {
                buf.extend_from_slice(&start.duration.to_le_bytes());
                buf.extend_from_slice(&start.timestamp.to_le_bytes());
            }
            Message::TestResult(result) => buf.push(u8::from(result.passed)),
            Message::ResultLog(logged) => {
                buf.push(u8::from(logged.passed));
                buf.extend_from_slice(&logged.timestamp.to_le_bytes());
            }
            Message::UpdateStatus(status) => buf.extend_from_slice(&status.value.to_le_bytes()),
            _ => {}
        }
        buf
    }

    /// Decode a wire frame.
    ///
    /// Rejects unknown opcodes and any payload whose length differs from the
    /// fixed length of its opcode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let (&op, payload) = bytes.split_first().ok_or(WireError::Empty)?;
        let opcode = Opcode::try_from(op)?;
        if payload.len() != opcode.payload_len() {
            return Err(WireError::LengthMismatch {
                opcode,
                expected: opcode.payload_len(),
                actual: payload.len(),
            });
        }

        let message = match opcode {
            Opcode::GetStatus => Message::GetStatus,
            Opcode::TestAck => Message::TestAck,
            Opcode::GetLog => Message::GetLog,
            Opcode::GetAck => Message::GetAck,
            Opcode::GetStart => Message::GetStart,
            Opcode::GetResult => Message::GetResult,
            Opcode::Calibrate => Message::Calibrate,
            Opcode::CalibrateOk => Message::CalibrateOk,
            Opcode::TestStart => Message::TestStart(TestStart {
                duration: u16::from_le_bytes([payload[0], payload[1]]),
                timestamp: u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]),
            }),
            Opcode::TestResult => Message::TestResult(TestResult {
                passed: payload[0] != 0,
            }),
            Opcode::ResultLog => Message::ResultLog(LoggedResult {
                passed: payload[0] != 0,
                timestamp: u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]),
            }),
            Opcode::UpdateStatus => Message::UpdateStatus(StatusUpdate {
                value: u16::from_le_bytes([payload[0], payload[1]]),
            }),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_layout_is_little_endian() {
        let msg = Message::TestStart(TestStart {
            duration: 60,
            timestamp: 1000,
        });

        let bytes = msg.to_bytes();
        assert_eq!(bytes, vec![0x05, 60, 0, 0xE8, 0x03, 0, 0]);
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn result_log_puts_outcome_before_timestamp() {
        let msg = Message::ResultLog(LoggedResult {
            passed: true,
            timestamp: 0x0102_0304,
        });

        assert_eq!(msg.to_bytes(), vec![0x06, 1, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn update_status_roundtrip() {
        let msg = Message::UpdateStatus(StatusUpdate { value: 3460 });
        let restored = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(restored, msg);
    }

    #[test]
    fn empty_payload_messages_are_one_byte() {
        for msg in [
            Message::GetStatus,
            Message::TestAck,
            Message::GetLog,
            Message::GetAck,
            Message::GetStart,
            Message::GetResult,
            Message::Calibrate,
            Message::CalibrateOk,
        ] {
            let bytes = msg.to_bytes();
            assert_eq!(bytes.len(), 1, "{:?}", msg);
            assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn nonzero_bool_decodes_as_true() {
        let msg = Message::from_bytes(&[0x03, 0x7F]).unwrap();
        assert_eq!(msg, Message::TestResult(TestResult { passed: true }));

        let msg = Message::from_bytes(&[0x03, 0x00]).unwrap();
        assert_eq!(msg, Message::TestResult(TestResult { passed: false }));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        // The original console sent TEST_START with a short declared length
        let err = Message::from_bytes(&[0x05, 60]).unwrap_err();
        assert_eq!(
            err,
            WireError::LengthMismatch {
                opcode: Opcode::TestStart,
                expected: 6,
                actual: 1,
            }
        );

        // Trailing bytes on an empty-payload opcode
        assert!(matches!(
            Message::from_bytes(&[0x07, 0x00]),
            Err(WireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert_eq!(
            Message::from_bytes(&[0x0B]),
            Err(WireError::UnknownOpcode(0x0B))
        );
        assert_eq!(Message::from_bytes(&[]), Err(WireError::Empty));
    }

    #[test]
    fn opcode_try_from_covers_table() {
        for val in [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 12, 13] {
            let op = Opcode::try_from(val).unwrap();
            assert_eq!(op as u8, val);
        }
        assert!(Opcode::try_from(0).is_err());
        assert!(Opcode::try_from(11).is_err());
        assert!(Opcode::try_from(14).is_err());
    }

    #[test]
    fn message_json_is_tagged() {
        let msg = Message::TestResult(TestResult { passed: false });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"TestResult","passed":false}"#);
    }
}
