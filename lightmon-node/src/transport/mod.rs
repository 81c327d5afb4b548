//! Transport abstraction for lightmon.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying mesh (in-process mesh for tests, UDP for real deployments).
//!
//! # Design
//!
//! The transport trait is async and datagram-oriented:
//! - `send()` transmits one envelope, fire-and-forget
//! - `recv()` waits for the next envelope addressed to anyone
//!
//! Delivery is best effort. A frame that fails to decode is surfaced as
//! [`TransportError::Decode`] so the caller can log it and keep receiving.
//!
//! # Example
//!
//! ```ignore
//! let mesh = MemoryMesh::new();
//! let node = mesh.join(NodeAddress::new(5));
//! node.send(Envelope::new(node.local_address(), NodeAddress::ALL_NODES, Message::TestAck)).await?;
//! let envelope = node.recv().await?;
//! ```

mod mock;
mod udp;

pub use mock::{MemoryMesh, MeshEndpoint};
pub use udp::{UdpTransport, MAX_DATAGRAM_SIZE};

use async_trait::async_trait;
use lightmon_types::{Envelope, NodeAddress, WireError};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transport shut down; no more frames will arrive.
    #[error("transport closed")]
    Closed,

    /// No route to the destination.
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeAddress),

    /// Inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Decode(#[from] WireError),

    /// Datagram to one peer could not be sent.
    #[error("send to {peer} failed: {source}")]
    SendFailed {
        /// Destination of the lost datagram.
        peer: NodeAddress,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True when the transport is still usable after this error.
    ///
    /// Sends are fire-and-forget, so a datagram lost on the way out is
    /// recoverable like a malformed one on the way in.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::UnknownPeer(_) | Self::SendFailed { .. }
        )
    }
}

/// Transport trait for sending and receiving protocol envelopes.
///
/// Implementations must keep `recv()` cancel safe: the runtimes poll it
/// inside `tokio::select!` alongside timers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address this endpoint sends from.
    fn local_address(&self) -> NodeAddress;

    /// Send one envelope.
    ///
    /// [`NodeAddress::ALL_NODES`] reaches every other endpoint.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Receive the next envelope.
    ///
    /// Envelopes are not filtered by destination; use [`Envelope::is_for`].
    async fn recv(&self) -> Result<Envelope, TransportError>;
}
