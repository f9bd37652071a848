//! Core types for the agent-swarm orchestration engine.
//!
//! This crate defines the shared vocabulary of the engine: tasks, plans,
//! execution-flow DAGs, role templates, agent instances, quality reports,
//! events, the error taxonomy, and the configuration surface. Everything
//! here is runtime-agnostic; the scheduling and model-facing logic lives
//! in `swarm-runtime` and `swarm-gateway`.

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub mod events;

pub use cancel::CancelToken;
pub use config::{SupervisorConfig, SwarmConfig};
pub use error::{ErrorKind, SwarmError};
pub use events::{Event, EventKind};

/// Convenience result alias used across the workspace.
pub type SwarmResult<T> = Result<T, SwarmError>;
