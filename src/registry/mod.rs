// src/registry/mod.rs
//! Presence tracking across runtimes
//!
//! - **Events**: `RemoteRuntimeEvent` and its versioned wire form
//! - **Environment Ports**: environments hosted by this runtime
//! - **Runtime Registry**: announce/catch-up protocol and the peer map

pub mod environment_ports;
pub mod events;
pub mod runtime_registry;

pub use environment_ports::{EnvironmentPort, EnvironmentPortEvent, EnvironmentPortObserver, EnvironmentPortRegistry, PortState};
pub use events::{RemoteRuntimeEvent, WIRE_VERSION};
pub use runtime_registry::{PeerRecord, RemoteRuntimeListener, RuntimeRegistry};
