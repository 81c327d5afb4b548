//! In-process mesh for testing.
//!
//! Every endpoint that joins a [`MemoryMesh`] can reach every other one.
//! Frames travel as encoded bytes so the wire codec is exercised end to end.
//! The mesh records every envelope sent and can drop frames on demand, which
//! lets tests simulate a lossy radio with many nodes in one process.

use super::{Transport, TransportError};
use async_trait::async_trait;
use lightmon_types::{Envelope, NodeAddress};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Shared in-process mesh.
///
/// Clones share the same mesh.
#[derive(Debug, Default, Clone)]
pub struct MemoryMesh {
    inner: Arc<Mutex<MeshInner>>,
}

#[derive(Debug, Default)]
struct MeshInner {
    endpoints: BTreeMap<NodeAddress, mpsc::UnboundedSender<Vec<u8>>>,
    sent: Vec<Envelope>,
    drop_next: usize,
    isolated: BTreeSet<NodeAddress>,
    dropped: usize,
}

impl MemoryMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint. Joining twice with one address replaces the first.
    pub fn join(&self, address: NodeAddress) -> MeshEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().endpoints.insert(address, tx);
        MeshEndpoint {
            address,
            mesh: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Every envelope sent so far, including dropped ones.
    pub fn sent(&self) -> Vec<Envelope> {
        self.lock().sent.clone()
    }

    /// Envelopes sent by one endpoint.
    pub fn sent_by(&self, address: NodeAddress) -> Vec<Envelope> {
        self.lock()
            .sent
            .iter()
            .filter(|e| e.source == address)
            .copied()
            .collect()
    }

    /// Drop the next `count` frames sent by anyone.
    pub fn drop_next(&self, count: usize) {
        self.lock().drop_next = count;
    }

    /// Cut an endpoint off: nothing it sends or should receive is delivered.
    pub fn isolate(&self, address: NodeAddress) {
        self.lock().isolated.insert(address);
    }

    /// Undo [`MemoryMesh::isolate`].
    pub fn reconnect(&self, address: NodeAddress) {
        self.lock().isolated.remove(&address);
    }

    /// Number of frames dropped so far.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }

    /// Deliver raw bytes to an endpoint, bypassing encoding.
    pub fn inject(&self, to: NodeAddress, bytes: Vec<u8>) {
        if let Some(tx) = self.lock().endpoints.get(&to) {
            let _ = tx.send(bytes);
        }
    }

    fn deliver(&self, envelope: Envelope) {
        let mut inner = self.lock();
        inner.sent.push(envelope);

        if inner.drop_next > 0 {
            inner.drop_next -= 1;
            inner.dropped += 1;
            return;
        }
        if inner.isolated.contains(&envelope.source) {
            inner.dropped += 1;
            return;
        }

        let bytes = envelope.to_bytes();
        for (address, tx) in &inner.endpoints {
            if *address == envelope.source || inner.isolated.contains(address) {
                continue;
            }
            if envelope.is_for(*address) {
                // A closed receiver just means that endpoint went away
                let _ = tx.send(bytes.clone());
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, MeshInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One node's attachment to a [`MemoryMesh`].
#[derive(Debug)]
pub struct MeshEndpoint {
    address: NodeAddress,
    mesh: MemoryMesh,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MeshEndpoint {
    /// The mesh this endpoint belongs to.
    pub fn mesh(&self) -> &MemoryMesh {
        &self.mesh
    }
}

#[async_trait]
impl Transport for MeshEndpoint {
    fn local_address(&self) -> NodeAddress {
        self.address
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.mesh.deliver(envelope);
        Ok(())
    }

    async fn recv(&self) -> Result<Envelope, TransportError> {
        let mut rx = self.rx.lock().await;
        let bytes = rx.recv().await.ok_or(TransportError::Closed)?;
        Ok(Envelope::from_bytes(&bytes)?)
    }
}
