// src/lib.rs
//! Sentra Lab Agent Runtime Library
//!
//! This library provides the building blocks of a distributed agent
//! runtime: controllable agents, a pool supervisor, and a presence protocol
//! that keeps runtimes informed about each other's agents and environments.
//!
//! # Architecture
//!
//! The runtime is structured into several key modules:
//!
//! - **runtime**: Agent lifecycle, capabilities, pool supervision
//! - **registry**: Remote presence events, environment ports, peer tracking
//! - **transport**: In-process and TCP message boxes
//! - **node**: One fully wired runtime instance
//! - **observability**: Tracing setup
//! - **utils**: Configuration, errors, identities, observer fan-out

// Public module exports
pub mod node;
pub mod observability;
pub mod registry;
pub mod runtime;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use node::{NodeTransport, RuntimeNode};
pub use registry::{EnvironmentPortRegistry, RemoteRuntimeEvent, RuntimeRegistry};
pub use runtime::{Agent, AgentController, AgentService, AgentServiceConfig, ControllerState};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result, TransportError};
pub use utils::ids::{AgentId, MessageBoxId};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
