// src/utils/ids.rs
//! Opaque identities for agents and message boxes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique name of one agent instance within a runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_owned())
    }

    /// Generate a fresh id (`agent-<ulid>`)
    pub fn generate() -> Self {
        Self::new(format!("agent-{}", ulid::Ulid::new().to_string().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AgentId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Addressable messaging endpoint: a runtime, an agent mailbox or an environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBoxId(String);

impl MessageBoxId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_owned())
    }

    pub fn generate() -> Self {
        Self::new(format!("mbox-{}", ulid::Ulid::new().to_string().to_lowercase()))
    }

    /// Messaging endpoint of `agent` hosted by `runtime`
    pub fn for_agent(runtime: &MessageBoxId, agent: &AgentId) -> Self {
        Self::new(format!("{}/{}", runtime, agent))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageBoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageBoxId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MessageBoxId {
    fn from(name: String) -> Self {
        Self(name)
    }
}
