// src/utils/mod.rs
//! Common utilities and helpers
//!
//! - **config**: Layered engine configuration (defaults, file, environment)
//! - **errors**: Engine and transport error types
//! - **ids**: Agent and message box identities
//! - **observers**: Ordered observer fan-out shared by the registries

pub mod config;
pub mod errors;
pub mod ids;
pub mod observers;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::EngineConfig;
pub use errors::{EngineError, Result, TransportError};
pub use ids::{AgentId, MessageBoxId};
pub use observers::ObserverSet;
