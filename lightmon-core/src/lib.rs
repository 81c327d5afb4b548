//! # lightmon-core
//!
//! Pure logic for lightmon (no I/O, instant tests).
//!
//! This crate implements the state machines for both roles of the light
//! integrity test without any network, sensor or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Many simulated nodes in one test process
//!
//! The actual I/O (mesh, sensor, storage, timers) is performed by
//! `lightmon-node`, which interprets the actions produced by
//! [`TestServer`] and [`Orchestrator`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod calibration;
pub mod engine;
pub mod history;
pub mod orchestrator;
pub mod replay;
pub mod result_log;
pub mod roster;
pub mod schedule;
pub mod server;

pub use calibration::{Calibration, DEFAULT_MARGIN, DEFAULT_THRESHOLD};
pub use engine::{ActiveTest, Step, TestEngine};
pub use history::HistoryBook;
pub use orchestrator::{
    CampaignReport, Command, CoordinatorAction, CoordinatorEvent, CoordinatorReport,
    CoordinatorTimer, Orchestrator, OrchestratorSettings, Phase,
};
pub use replay::{LogReplay, ReplayStep};
pub use result_log::{LogError, ResultEntry, ResultLog, LOG_CAPACITY, PERSISTED_LEN};
pub use roster::{NodeRoster, RosterError, TrackingSet, ROSTER_CAPACITY};
pub use schedule::Schedule;
pub use server::{
    SamplePurpose, ServerAction, ServerEvent, ServerReport, ServerSettings, ServerTimer,
    TestServer,
};
