// src/utils/errors.rs
//! Error types for the runtime
//!
//! Lifecycle errors are programming errors and surface synchronously to the
//! caller. Transport errors on outbound publishes are logged by the caller
//! and dropped.

use crate::utils::ids::{AgentId, MessageBoxId};
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation is not valid for the current lifecycle state
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// One or more agents failed to start; started agents keep running
    #[error("failed to launch {} of {} agents", .failed.len(), .failed.len() + .started.len())]
    LaunchFailure {
        started: Vec<AgentId>,
        failed: Vec<(AgentId, String)>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Dispose attempted before termination
    #[error("dispose refused: {reason}")]
    Dispose {
        reason: String,
        pending: Vec<AgentId>,
    },

    #[error("agent {0} is already registered")]
    DuplicateAgent(AgentId),

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("environment port {0} is already registered")]
    DuplicateEnvironment(MessageBoxId),

    #[error("unknown environment port {0}")]
    UnknownEnvironment(MessageBoxId),

    #[error("failed to spawn agent thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("agent factory failed for {agent}: {reason}")]
    AgentFactory { agent: AgentId, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    pub(crate) fn invalid_state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        EngineError::InvalidState {
            operation,
            state: format!("{:?}", state),
        }
    }
}

/// Errors raised by the messaging fabric
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no message box named {0}")]
    UnknownMessageBox(MessageBoxId),

    #[error("message box {0} is already open")]
    AddressInUse(MessageBoxId),

    #[error("message box {0} is closed")]
    Closed(MessageBoxId),

    #[error("no route to {0}")]
    NoRoute(MessageBoxId),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_failure_message() {
        let err = EngineError::LaunchFailure {
            started: vec![AgentId::new("a"), AgentId::new("b")],
            failed: vec![(AgentId::new("c"), "boom".into())],
        };
        assert_eq!(err.to_string(), "failed to launch 1 of 3 agents");
    }

    #[test]
    fn test_transport_error_converts() {
        let err: EngineError = TransportError::NoRoute(MessageBoxId::new("peer")).into();
        assert!(matches!(err, EngineError::Transport(TransportError::NoRoute(_))));
        assert_eq!(err.to_string(), "no route to peer");
    }
}
