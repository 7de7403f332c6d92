// src/registry/environment_ports.rs
//! Environment ports hosted by this runtime
//!
//! A port is the message box through which an environment is reached.
//! Registration and removal are republished to observers with the same
//! ordering and panic isolation as the agent service.

use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::MessageBoxId;
use crate::utils::observers::ObserverSet;
use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub struct EnvironmentPort {
    id: MessageBoxId,
    state: AtomicCell<PortState>,
    connected_at: DateTime<Utc>,
}

impl EnvironmentPort {
    fn new(id: MessageBoxId) -> Self {
        Self {
            id,
            state: AtomicCell::new(PortState::Connected),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &MessageBoxId {
        &self.id
    }

    pub fn state(&self) -> PortState {
        self.state.load()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

#[derive(Debug, Clone)]
pub enum EnvironmentPortEvent {
    Added(Arc<EnvironmentPort>),
    Removed(Arc<EnvironmentPort>),
}

impl EnvironmentPortEvent {
    pub fn port(&self) -> &Arc<EnvironmentPort> {
        match self {
            EnvironmentPortEvent::Added(port) | EnvironmentPortEvent::Removed(port) => port,
        }
    }
}

pub trait EnvironmentPortObserver: Send + Sync {
    fn environment_port_event(&self, event: &EnvironmentPortEvent);
}

pub struct EnvironmentPortRegistry {
    ports: RwLock<BTreeMap<MessageBoxId, Arc<EnvironmentPort>>>,
    observers: ObserverSet<dyn EnvironmentPortObserver>,
}

impl EnvironmentPortRegistry {
    pub fn new() -> Self {
        Self {
            ports: RwLock::new(BTreeMap::new()),
            observers: ObserverSet::new("environment port"),
        }
    }

    pub fn add_port(&self, id: MessageBoxId) -> Result<Arc<EnvironmentPort>> {
        let port = {
            let mut ports = self.ports.write();
            if ports.contains_key(&id) {
                return Err(EngineError::DuplicateEnvironment(id));
            }
            let port = Arc::new(EnvironmentPort::new(id.clone()));
            ports.insert(id, Arc::clone(&port));
            port
        };

        info!("Environment port {} connected", port.id());
        self.observers
            .emit(|observer| observer.environment_port_event(&EnvironmentPortEvent::Added(Arc::clone(&port))));
        Ok(port)
    }

    pub fn remove_port(&self, id: &MessageBoxId) -> Result<Arc<EnvironmentPort>> {
        let port = self
            .ports
            .write()
            .remove(id)
            .ok_or_else(|| EngineError::UnknownEnvironment(id.clone()))?;
        port.state.store(PortState::Disconnected);

        info!("Environment port {} disconnected", id);
        self.observers
            .emit(|observer| observer.environment_port_event(&EnvironmentPortEvent::Removed(Arc::clone(&port))));
        Ok(port)
    }

    pub fn get(&self, id: &MessageBoxId) -> Option<Arc<EnvironmentPort>> {
        self.ports.read().get(id).cloned()
    }

    /// Ports in id order
    pub fn ports(&self) -> Vec<Arc<EnvironmentPort>> {
        self.ports.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.read().is_empty()
    }

    pub fn add_observer(&self, observer: Arc<dyn EnvironmentPortObserver>) {
        debug!("Environment port observer registered");
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn EnvironmentPortObserver>) -> bool {
        self.observers.remove(observer)
    }
}

impl Default for EnvironmentPortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(bool, MessageBoxId)>>,
    }

    impl EnvironmentPortObserver for Recorder {
        fn environment_port_event(&self, event: &EnvironmentPortEvent) {
            let added = matches!(event, EnvironmentPortEvent::Added(_));
            self.seen.lock().push((added, event.port().id().clone()));
        }
    }

    struct Panicking;

    impl EnvironmentPortObserver for Panicking {
        fn environment_port_event(&self, _event: &EnvironmentPortEvent) {
            panic!("observer failure");
        }
    }

    #[test]
    fn test_add_and_remove_port() {
        let registry = EnvironmentPortRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add_observer(recorder.clone());

        let port = registry.add_port(MessageBoxId::new("grid-world")).unwrap();
        assert_eq!(port.state(), PortState::Connected);
        assert!(port.connected_at() <= Utc::now());
        assert_eq!(registry.len(), 1);

        let removed = registry.remove_port(&MessageBoxId::new("grid-world")).unwrap();
        assert_eq!(removed.state(), PortState::Disconnected);
        assert!(registry.is_empty());

        let seen = recorder.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                (true, MessageBoxId::new("grid-world")),
                (false, MessageBoxId::new("grid-world")),
            ]
        );
    }

    #[test]
    fn test_duplicate_and_unknown_ports() {
        let registry = EnvironmentPortRegistry::new();
        registry.add_port(MessageBoxId::new("env")).unwrap();

        assert!(matches!(
            registry.add_port(MessageBoxId::new("env")),
            Err(EngineError::DuplicateEnvironment(_))
        ));
        assert!(matches!(
            registry.remove_port(&MessageBoxId::new("other")),
            Err(EngineError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let registry = EnvironmentPortRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add_observer(Arc::new(Panicking));
        registry.add_observer(recorder.clone());

        registry.add_port(MessageBoxId::new("a")).unwrap();
        registry.add_port(MessageBoxId::new("b")).unwrap();

        assert_eq!(recorder.seen.lock().len(), 2);
        assert_eq!(registry.ports().len(), 2);
        assert!(registry.get(&MessageBoxId::new("a")).is_some());
    }
}
