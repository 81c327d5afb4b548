//! # lightmon-node
//!
//! Async runtime for lightmon sensor nodes and coordinators.
//!
//! The protocol logic lives in `lightmon-core` as pure state machines. This
//! crate gives them a home on tokio:
//!
//! - **Transports**: pluggable [`Transport`] trait with an in-process
//!   [`MemoryMesh`] (lossy, for tests) and a [`UdpTransport`]
//! - **Timers**: [`TimerWheel`] with cancel-and-replace semantics
//! - **Hardware seams**: [`Sensor`] and [`Indicator`] traits
//! - **Persistence**: [`LogStore`] for the result log
//! - **Runtimes**: [`ServerRuntime`] and [`CoordinatorRuntime`]
//!
//! ## Example
//!
//! ```ignore
//! use lightmon_node::{MemoryMesh, ServerRuntime, FixedSensor, LoggingIndicator};
//!
//! let mesh = MemoryMesh::new();
//! let runtime = ServerRuntime::new(
//!     mesh.join(NodeAddress::new(5)),
//!     FixedSensor(100),
//!     LoggingIndicator,
//!     ServerSettings::default(),
//! );
//! runtime.run(shutdown).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod error;
pub mod sensor;
pub mod server;
pub mod store;
pub mod timers;
pub mod transport;

pub use coordinator::{CoordinatorHandle, CoordinatorRuntime};
pub use error::NodeError;
pub use sensor::{
    FileSensor, FixedSensor, Indicator, LdrSensor, LoggingIndicator, RecordingIndicator,
    ScriptedSensor, Sensor, SensorError,
};
pub use server::ServerRuntime;
pub use store::{LogStore, StoreError, LOG_FILE_NAME};
pub use timers::TimerWheel;
pub use transport::{
    MemoryMesh, MeshEndpoint, Transport, TransportError, UdpTransport, MAX_DATAGRAM_SIZE,
};
