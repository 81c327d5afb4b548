//! UDP transport.
//!
//! Each node binds one socket and knows its peers from a static address map.
//! One datagram carries one envelope. A send to [`NodeAddress::ALL_NODES`]
//! is fanned out to every peer; a peer that cannot be reached is skipped.

use super::{Transport, TransportError};
use async_trait::async_trait;
use lightmon_types::{Envelope, NodeAddress};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

/// Largest datagram accepted. The biggest envelope is 11 bytes.
pub const MAX_DATAGRAM_SIZE: usize = 64;

/// UDP-backed transport with a static peer map.
#[derive(Debug)]
pub struct UdpTransport {
    address: NodeAddress,
    socket: UdpSocket,
    peers: BTreeMap<NodeAddress, SocketAddr>,
}

impl UdpTransport {
    /// Bind a socket for `address`.
    pub async fn bind(
        address: NodeAddress,
        bind: SocketAddr,
        peers: BTreeMap<NodeAddress, SocketAddr>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind).await?;
        debug!(%address, local = %socket.local_addr()?, peers = peers.len(), "udp transport bound");
        Ok(Self {
            address,
            socket,
            peers,
        })
    }

    /// Socket address actually bound (useful with port 0).
    pub fn local_socket(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Add or replace a peer route.
    pub fn add_peer(&mut self, address: NodeAddress, socket: SocketAddr) {
        self.peers.insert(address, socket);
    }

    async fn send_to(
        &self,
        peer: NodeAddress,
        socket: SocketAddr,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        self.socket
            .send_to(bytes, socket)
            .await
            .map(|_| ())
            .map_err(|source| TransportError::SendFailed { peer, source })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_address(&self) -> NodeAddress {
        self.address
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let bytes = envelope.to_bytes();

        if envelope.destination.is_broadcast() {
            for (address, socket) in &self.peers {
                if *address == self.address {
                    continue;
                }
                if let Err(e) = self.send_to(*address, *socket, &bytes).await {
                    warn!(%socket, error = %e, "broadcast skipped peer");
                }
            }
            return Ok(());
        }

        let socket = self
            .peers
            .get(&envelope.destination)
            .ok_or(TransportError::UnknownPeer(envelope.destination))?;
        self.send_to(envelope.destination, *socket, &bytes).await
    }

    async fn recv(&self) -> Result<Envelope, TransportError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        trace!(%from, len, "datagram received");
        Ok(Envelope::from_bytes(&buf[..len])?)
    }
}
