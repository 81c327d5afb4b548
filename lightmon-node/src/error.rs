//! Runtime errors.

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Errors that stop a node runtime.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The runtime is no longer running.
    #[error("runtime stopped")]
    Stopped,
}
