//! CLI command implementations.

pub mod coordinator;
pub mod init;
pub mod node;
