// src/registry/events.rs
//! Presence events exchanged between runtime instances
//!
//! Each event travels as a JSON `WireEvent` carrying a schema version.
//! Receivers reject versions they do not speak.

use crate::utils::errors::TransportError;
use crate::utils::ids::{AgentId, MessageBoxId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Current wire schema version
pub const WIRE_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RemoteRuntimeEvent {
    NewAgent(AgentId),
    DeadAgent(AgentId),
    NewEnvironment(MessageBoxId),
    RemovedEnvironment(MessageBoxId),
    RuntimeLaunched(MessageBoxId),
}

impl RemoteRuntimeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteRuntimeEvent::NewAgent(_) => "new_agent",
            RemoteRuntimeEvent::DeadAgent(_) => "dead_agent",
            RemoteRuntimeEvent::NewEnvironment(_) => "new_environment",
            RemoteRuntimeEvent::RemovedEnvironment(_) => "removed_environment",
            RemoteRuntimeEvent::RuntimeLaunched(_) => "runtime_launched",
        }
    }

    pub fn encode(&self) -> Result<Bytes, TransportError> {
        let wire = WireEvent {
            version: WIRE_VERSION,
            event: self.clone(),
        };
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, TransportError> {
        let wire: WireEvent = serde_json::from_slice(payload)?;
        if wire.version != WIRE_VERSION {
            return Err(TransportError::Codec(format!(
                "unsupported event schema version {}",
                wire.version
            )));
        }
        Ok(wire.event)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEvent {
    version: u16,
    event: RemoteRuntimeEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_event() -> impl Strategy<Value = RemoteRuntimeEvent> {
        let name = "[a-zA-Z0-9/_.:-]{1,32}";
        prop_oneof![
            name.prop_map(|n| RemoteRuntimeEvent::NewAgent(AgentId::new(n))),
            name.prop_map(|n| RemoteRuntimeEvent::DeadAgent(AgentId::new(n))),
            name.prop_map(|n| RemoteRuntimeEvent::NewEnvironment(MessageBoxId::new(n))),
            name.prop_map(|n| RemoteRuntimeEvent::RemovedEnvironment(MessageBoxId::new(n))),
            name.prop_map(|n| RemoteRuntimeEvent::RuntimeLaunched(MessageBoxId::new(n))),
        ]
    }

    proptest! {
        #[test]
        fn prop_payload_survives_encoding(event in any_event()) {
            let encoded = event.encode().unwrap();
            prop_assert_eq!(RemoteRuntimeEvent::decode(&encoded).unwrap(), event);
        }
    }

    #[test]
    fn test_wire_shape() {
        let encoded = RemoteRuntimeEvent::NewAgent(AgentId::new("alice")).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"version": 1, "event": {"type": "new_agent", "id": "alice"}})
        );
    }

    #[test]
    fn test_unknown_version_rejected() {
        let payload = br#"{"version":2,"event":{"type":"dead_agent","id":"x"}}"#;
        let result = RemoteRuntimeEvent::decode(payload);
        assert!(matches!(result, Err(TransportError::Codec(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(RemoteRuntimeEvent::decode(b"not json").is_err());
    }
}
