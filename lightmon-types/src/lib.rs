//! # lightmon-types
//!
//! Wire format types for the lightmon light-integrity test protocol.
//!
//! This crate provides the foundational types shared by the coordinator and
//! the sensor nodes:
//! - [`NodeAddress`] - Mesh address of a node (0 is the empty-slot sentinel)
//! - [`Opcode`] / [`Message`] - The closed set of protocol messages and their codec
//! - [`Envelope`] - Source/destination framing used by the bundled transports
//! - [`WireError`] - Decode errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod address;
mod envelope;
mod error;
mod messages;

pub use address::NodeAddress;
pub use envelope::Envelope;
pub use error::WireError;
pub use messages::{LoggedResult, Message, Opcode, StatusUpdate, TestResult, TestStart};
