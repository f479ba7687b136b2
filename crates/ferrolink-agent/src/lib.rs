//! # Ferrolink Agent
//!
//! The serving side of the protocol: accepts encrypted connections and
//! dispatches file transfer, module load, and module execution commands
//! against local state.

#![warn(missing_docs)]

/// Listener and per-connection task management
pub mod agent;

/// Command routing for one connection
pub mod dispatcher;

/// Request path validation
pub mod sandbox;

/// Agent error types
pub mod error;

pub use agent::{Agent, AgentConfig};
pub use dispatcher::Dispatcher;
pub use error::AgentError;
