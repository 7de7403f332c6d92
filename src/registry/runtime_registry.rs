// src/registry/runtime_registry.rs
//! Distributed presence registry
//!
//! Every runtime owns one registry bound to its own message box. Local
//! presence changes (agents joining or leaving the pool, environment ports
//! connecting or disconnecting) are published to every known peer; inbound
//! events update the peer map and are handed to local listeners.
//!
//! # Protocol
//!
//! ```text
//! runtime A                                  runtime B
//!    │  launch()                                │
//!    │ ── RuntimeLaunched(A) ─────────────────► │  reset record of A
//!    │ ◄──────────────── NewEnvironment(e) ──── │  catch-up: whole inventory
//!    │ ◄──────────────── NewAgent(x) ────────── │
//!    │                                          │
//!    │ ◄──────────────── DeadAgent(x) ───────── │  later, on removal
//! ```
//!
//! There is no acknowledgment or retry at this layer. Convergence is
//! eventual and only as reliable as the transport underneath.

use crate::registry::environment_ports::{EnvironmentPortEvent, EnvironmentPortObserver};
use crate::registry::events::RemoteRuntimeEvent;
use crate::runtime::agent_service::{AgentService, AgentServiceEvent, AgentServiceObserver};
use crate::transport::{Envelope, MessageBox, Transport};
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::{AgentId, MessageBoxId};
use crate::utils::observers::ObserverSet;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Default bound on tracked peers
pub const DEFAULT_MAX_PEERS: usize = 256;

/// What one runtime is known to host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRecord {
    pub agents: BTreeSet<AgentId>,
    pub environments: BTreeSet<MessageBoxId>,
}

impl PeerRecord {
    /// Fold one presence event into the record
    fn apply(&mut self, event: &RemoteRuntimeEvent) {
        match event {
            RemoteRuntimeEvent::NewAgent(id) => {
                self.agents.insert(id.clone());
            }
            RemoteRuntimeEvent::DeadAgent(id) => {
                self.agents.remove(id);
            }
            RemoteRuntimeEvent::NewEnvironment(id) => {
                self.environments.insert(id.clone());
            }
            RemoteRuntimeEvent::RemovedEnvironment(id) => {
                self.environments.remove(id);
            }
            RemoteRuntimeEvent::RuntimeLaunched(_) => {}
        }
    }

    /// Announcements replaying the whole record, environments first
    fn announcements(&self) -> Vec<RemoteRuntimeEvent> {
        self.environments
            .iter()
            .cloned()
            .map(RemoteRuntimeEvent::NewEnvironment)
            .chain(self.agents.iter().cloned().map(RemoteRuntimeEvent::NewAgent))
            .collect()
    }
}

/// Receives every inbound event after the peer map has been updated
pub trait RemoteRuntimeListener: Send + Sync {
    fn remote_runtime_event(&self, origin: &MessageBoxId, event: &RemoteRuntimeEvent);
}

impl<F> RemoteRuntimeListener for F
where
    F: Fn(&MessageBoxId, &RemoteRuntimeEvent) + Send + Sync,
{
    fn remote_runtime_event(&self, origin: &MessageBoxId, event: &RemoteRuntimeEvent) {
        self(origin, event)
    }
}

pub struct RuntimeRegistry {
    local_id: MessageBoxId,

    mailbox: Arc<dyn MessageBox>,

    /// Remote runtimes and what they host
    peers: RwLock<HashMap<MessageBoxId, PeerRecord>>,

    max_peers: usize,

    /// What this runtime hosts; replayed to runtimes that launch after us
    hosted: RwLock<PeerRecord>,

    listeners: ObserverSet<dyn RemoteRuntimeListener>,

    launched: AtomicBool,
}

impl RuntimeRegistry {
    /// Open the registry box on `transport` and start listening
    pub fn bind(transport: &dyn Transport, local_id: MessageBoxId) -> Result<Arc<Self>> {
        Self::bind_with_capacity(transport, local_id, DEFAULT_MAX_PEERS)
    }

    pub fn bind_with_capacity(
        transport: &dyn Transport,
        local_id: MessageBoxId,
        max_peers: usize,
    ) -> Result<Arc<Self>> {
        let mailbox = transport.open(local_id.clone())?;

        let registry = Arc::new(Self {
            local_id,
            mailbox,
            peers: RwLock::new(HashMap::new()),
            max_peers,
            hosted: RwLock::new(PeerRecord::default()),
            listeners: ObserverSet::new("remote runtime"),
            launched: AtomicBool::new(false),
        });

        let weak: Weak<Self> = Arc::downgrade(&registry);
        registry.mailbox.register_receiver(Arc::new(move |envelope: Envelope| {
            if let Some(registry) = weak.upgrade() {
                registry.receive(envelope);
            }
        }));

        info!("Runtime registry {} listening", registry.local_id);
        Ok(registry)
    }

    pub fn local_id(&self) -> &MessageBoxId {
        &self.local_id
    }

    /// Seed a remote runtime to announce to
    pub fn add_peer(&self, peer: MessageBoxId) -> bool {
        if peer == self.local_id {
            return false;
        }

        let mut peers = self.peers.write();
        if peers.contains_key(&peer) {
            return false;
        }
        if peers.len() >= self.max_peers {
            warn!("Peer limit {} reached; ignoring {}", self.max_peers, peer);
            return false;
        }

        debug!("Registry {} tracking peer {}", self.local_id, peer);
        peers.insert(peer, PeerRecord::default());
        true
    }

    /// Broadcast `RuntimeLaunched` to every known peer; only once
    pub fn launch(&self) -> Result<()> {
        if self.launched.swap(true, Ordering::AcqRel) {
            return Err(EngineError::InvalidState {
                operation: "launch the registry",
                state: "launched".to_string(),
            });
        }

        info!("Runtime {} launched; announcing to {} peers", self.local_id, self.peers.read().len());
        self.publish(RemoteRuntimeEvent::RuntimeLaunched(self.local_id.clone()));
        Ok(())
    }

    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::Acquire)
    }

    /// Send `event` to every known peer; failures are logged and dropped
    pub fn publish(&self, event: RemoteRuntimeEvent) {
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {} event: {}", event.kind(), e);
                return;
            }
        };

        for peer in self.peers() {
            match self.mailbox.send(&peer, payload.clone()) {
                Ok(()) => {
                    metrics::counter!("runtime_events_published_total").increment(1);
                }
                Err(e) => {
                    warn!("Dropping {} event for {}: {}", event.kind(), peer, e);
                    metrics::counter!("runtime_events_dropped_total").increment(1);
                }
            }
        }
    }

    /// Known remote runtimes, sorted
    pub fn peers(&self) -> Vec<MessageBoxId> {
        let mut peers: Vec<MessageBoxId> = self.peers.read().keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn peer_agents(&self, peer: &MessageBoxId) -> Vec<AgentId> {
        self.peers
            .read()
            .get(peer)
            .map(|record| record.agents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn peer_environments(&self, peer: &MessageBoxId) -> Vec<MessageBoxId> {
        self.peers
            .read()
            .get(peer)
            .map(|record| record.environments.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Everything announced to peers as hosted here
    pub fn hosted(&self) -> PeerRecord {
        self.hosted.read().clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn RemoteRuntimeListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RemoteRuntimeListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Stop receiving; later publishes fail and are dropped
    pub fn close(&self) {
        info!("Closing runtime registry {}", self.local_id);
        self.mailbox.close();
    }

    /// Record a local presence change and publish it
    ///
    /// The hosted record stays locked until the event is queued, so a
    /// concurrent catch-up never replays an announcement after its removal.
    fn announce(&self, event: RemoteRuntimeEvent) {
        let mut hosted = self.hosted.write();
        hosted.apply(&event);
        self.publish(event);
        drop(hosted);
    }

    fn receive(&self, envelope: Envelope) {
        let origin = envelope.from;
        let event = match RemoteRuntimeEvent::decode(&envelope.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping undecodable event from {}: {}", origin, e);
                return;
            }
        };

        if origin == self.local_id {
            return;
        }
        debug!("Registry {} received {} from {}", self.local_id, event.kind(), origin);

        {
            let mut peers = self.peers.write();
            if !peers.contains_key(&origin) && peers.len() >= self.max_peers {
                warn!("Peer limit {} reached; ignoring {} from {}", self.max_peers, event.kind(), origin);
                return;
            }
            peers.entry(origin.clone()).or_default().apply(&event);

            // A (re)launched runtime starts from an empty record
            if let RemoteRuntimeEvent::RuntimeLaunched(launched) = &event {
                if let Some(record) = peers.get_mut(launched) {
                    *record = PeerRecord::default();
                }
            }
        }

        if let RemoteRuntimeEvent::RuntimeLaunched(launched) = &event {
            self.catch_up(launched);
        }

        self.listeners
            .emit(|listener| listener.remote_runtime_event(&origin, &event));
    }

    /// Replay the local inventory to a runtime that just launched
    fn catch_up(&self, peer: &MessageBoxId) {
        // Held across the sends; see `announce`
        let hosted = self.hosted.read();
        let announcements = hosted.announcements();
        debug!("Replaying {} announcements to {}", announcements.len(), peer);

        for event in announcements {
            let sent = event
                .encode()
                .and_then(|payload| self.mailbox.send(peer, payload));
            match sent {
                Ok(()) => metrics::counter!("runtime_events_published_total").increment(1),
                Err(e) => {
                    warn!("Dropping {} catch-up for {}: {}", event.kind(), peer, e);
                    metrics::counter!("runtime_events_dropped_total").increment(1);
                }
            }
        }
        drop(hosted);
    }
}

impl AgentServiceObserver for RuntimeRegistry {
    fn agent_service_event(&self, _service: &AgentService, event: &AgentServiceEvent) {
        match event {
            AgentServiceEvent::LocalAgentAdded(agent) => {
                self.announce(RemoteRuntimeEvent::NewAgent(agent.id().clone()))
            }
            AgentServiceEvent::AgentRemoved { id, remote: false } => {
                self.announce(RemoteRuntimeEvent::DeadAgent(id.clone()))
            }
            // Learnt from peers; never republished
            AgentServiceEvent::RemoteAgentAdded(_) | AgentServiceEvent::AgentRemoved { remote: true, .. } => {}
        }
    }
}

impl EnvironmentPortObserver for RuntimeRegistry {
    fn environment_port_event(&self, event: &EnvironmentPortEvent) {
        match event {
            EnvironmentPortEvent::Added(port) => self.announce(RemoteRuntimeEvent::NewEnvironment(port.id().clone())),
            EnvironmentPortEvent::Removed(port) => {
                self.announce(RemoteRuntimeEvent::RemovedEnvironment(port.id().clone()))
            }
        }
    }
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("local_id", &self.local_id)
            .field("peers", &self.peers.read().len())
            .field("launched", &self.is_launched())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::environment_ports::EnvironmentPortRegistry;
    use crate::runtime::agent::{Agent, AgentFactory, IdleBehaviour};
    use crate::runtime::agent_service::AgentServiceConfig;
    use crate::runtime::capabilities::Capabilities;
    use crate::transport::{LocalTransport, TcpTransport};
    use crate::utils::test_support::wait_until;
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn idle_factory() -> Arc<dyn AgentFactory> {
        Arc::new(|id: &AgentId| -> Result<Agent> {
            Ok(Agent::new(
                id.clone(),
                Box::new(IdleBehaviour::new(Duration::from_millis(5))),
                Capabilities::detached(id),
            ))
        })
    }

    fn service(agents: &[&str]) -> Arc<AgentService> {
        let config = AgentServiceConfig::with_roster(agents.iter().map(|a| AgentId::new(*a)));
        Arc::new(AgentService::new(config, idle_factory()))
    }

    fn ids(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::new(*n)).collect()
    }

    type Seen = Arc<Mutex<Vec<(MessageBoxId, RemoteRuntimeEvent)>>>;

    fn record(registry: &RuntimeRegistry) -> Seen {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.add_listener(Arc::new(move |origin: &MessageBoxId, event: &RemoteRuntimeEvent| {
            sink.lock().push((origin.clone(), event.clone()));
        }));
        seen
    }

    /// B hosts agents and an environment before A exists; A launches and catches up
    fn late_joiner_catches_up(transport_a: &dyn Transport, transport_b: &dyn Transport) {
        let a_id = MessageBoxId::new("runtime-a");
        let b_id = MessageBoxId::new("runtime-b");

        let registry_b = RuntimeRegistry::bind(transport_b, b_id.clone()).unwrap();
        let service_b = service(&["x", "y"]);
        let ports_b = EnvironmentPortRegistry::new();
        service_b.add_observer(registry_b.clone());
        ports_b.add_observer(registry_b.clone());
        registry_b.launch().unwrap();
        service_b.start().unwrap();
        ports_b.add_port(MessageBoxId::new("env-1")).unwrap();
        assert_eq!(registry_b.hosted().agents.len(), 2);

        let registry_a = RuntimeRegistry::bind(transport_a, a_id.clone()).unwrap();
        let seen = record(&registry_a);
        registry_a.add_peer(b_id.clone());
        registry_a.launch().unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            registry_a.peer_agents(&b_id).len() == 2 && registry_a.peer_environments(&b_id).len() == 1
        }));
        assert_eq!(registry_a.peer_agents(&b_id), ids(&["x", "y"]));
        assert_eq!(registry_a.peer_environments(&b_id), vec![MessageBoxId::new("env-1")]);
        assert!(seen.lock().iter().all(|(origin, _)| origin == &b_id));

        // B learnt about A from the launch announcement
        assert!(wait_until(Duration::from_secs(5), || registry_b.peers() == vec![a_id.clone()]));

        // Removal reaches A
        let x = service_b.get_agent(&AgentId::new("x")).unwrap();
        x.terminate();
        x.await_termination().unwrap();
        service_b.remove_agent(&AgentId::new("x")).unwrap();
        assert!(wait_until(Duration::from_secs(5), || registry_a.peer_agents(&b_id) == ids(&["y"])));

        service_b.shut_down();
        service_b.await_termination().unwrap();
        registry_a.close();
        registry_b.close();
    }

    #[test]
    fn test_late_joiner_over_local_transport() {
        let transport = LocalTransport::new();
        late_joiner_catches_up(&transport, &transport);
    }

    #[test]
    fn test_late_joiner_over_tcp() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        let tcp_a = TcpTransport::bind(loopback, runtime.handle().clone()).unwrap();
        let tcp_b = TcpTransport::bind(loopback, runtime.handle().clone()).unwrap();
        tcp_a.add_route(MessageBoxId::new("runtime-b"), tcp_b.local_addr());

        late_joiner_catches_up(&tcp_a, &tcp_b);

        tcp_a.shutdown();
        tcp_b.shutdown();
    }

    #[test]
    fn test_every_event_kind_crosses_tcp() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        let tcp_a = TcpTransport::bind(loopback, runtime.handle().clone()).unwrap();
        let tcp_b = TcpTransport::bind(loopback, runtime.handle().clone()).unwrap();
        tcp_a.add_route(MessageBoxId::new("runtime-b"), tcp_b.local_addr());

        let registry_a = RuntimeRegistry::bind(&tcp_a, MessageBoxId::new("runtime-a")).unwrap();
        let registry_b = RuntimeRegistry::bind(&tcp_b, MessageBoxId::new("runtime-b")).unwrap();
        let seen = record(&registry_b);
        registry_a.add_peer(MessageBoxId::new("runtime-b"));

        let events = vec![
            RemoteRuntimeEvent::RuntimeLaunched(MessageBoxId::new("runtime-a")),
            RemoteRuntimeEvent::NewAgent(AgentId::new("x")),
            RemoteRuntimeEvent::NewEnvironment(MessageBoxId::new("env")),
            RemoteRuntimeEvent::RemovedEnvironment(MessageBoxId::new("env")),
            RemoteRuntimeEvent::DeadAgent(AgentId::new("x")),
        ];
        for event in &events {
            registry_a.publish(event.clone());
        }

        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == events.len()));
        let received: Vec<RemoteRuntimeEvent> = seen.lock().iter().map(|(_, e)| e.clone()).collect();
        assert_eq!(received, events);
        assert!(registry_b.peer_agents(&MessageBoxId::new("runtime-a")).is_empty());

        tcp_a.shutdown();
        tcp_b.shutdown();
    }

    #[test]
    fn test_remote_service_events_not_republished() {
        let transport = LocalTransport::new();
        let registry_a = RuntimeRegistry::bind(&transport, MessageBoxId::new("runtime-a")).unwrap();
        let registry_b = RuntimeRegistry::bind(&transport, MessageBoxId::new("runtime-b")).unwrap();
        let seen = record(&registry_b);
        registry_a.add_peer(MessageBoxId::new("runtime-b"));

        let service_a = service(&[]);
        service_a.add_observer(registry_a.clone());
        service_a.add_remote_agent(AgentId::new("elsewhere"));
        service_a.remove_remote_agent(&AgentId::new("elsewhere"));

        // A marker published afterwards arrives alone
        registry_a.publish(RemoteRuntimeEvent::NewEnvironment(MessageBoxId::new("marker")));
        assert!(wait_until(Duration::from_secs(2), || !seen.lock().is_empty()));
        std::thread::sleep(Duration::from_millis(50));
        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, RemoteRuntimeEvent::NewEnvironment(MessageBoxId::new("marker")));
        assert!(registry_a.hosted().agents.is_empty());
    }

    #[test]
    fn test_publish_without_reachable_peer_is_dropped() {
        let transport = LocalTransport::new();
        let registry = RuntimeRegistry::bind(&transport, MessageBoxId::new("runtime-a")).unwrap();
        registry.add_peer(MessageBoxId::new("gone"));

        registry.publish(RemoteRuntimeEvent::NewAgent(AgentId::new("x")));
        registry.launch().unwrap();
        assert!(registry.launch().is_err());
        assert_eq!(registry.peers(), vec![MessageBoxId::new("gone")]);
    }

    #[test]
    fn test_peer_limit() {
        let transport = LocalTransport::new();
        let registry = RuntimeRegistry::bind_with_capacity(&transport, MessageBoxId::new("runtime-a"), 1).unwrap();

        assert!(!registry.add_peer(MessageBoxId::new("runtime-a")));
        assert!(registry.add_peer(MessageBoxId::new("runtime-b")));
        assert!(!registry.add_peer(MessageBoxId::new("runtime-b")));
        assert!(!registry.add_peer(MessageBoxId::new("runtime-c")));
        assert_eq!(registry.peers().len(), 1);
    }

    #[test]
    fn test_relaunch_resets_peer_record() {
        let transport = LocalTransport::new();
        let registry = RuntimeRegistry::bind(&transport, MessageBoxId::new("runtime-a")).unwrap();
        let seen = record(&registry);
        let sender = transport.open(MessageBoxId::new("runtime-b")).unwrap();

        let send = |event: RemoteRuntimeEvent| {
            sender
                .send(&MessageBoxId::new("runtime-a"), event.encode().unwrap())
                .unwrap();
        };
        send(RemoteRuntimeEvent::NewAgent(AgentId::new("stale")));
        send(RemoteRuntimeEvent::RuntimeLaunched(MessageBoxId::new("runtime-b")));
        send(RemoteRuntimeEvent::NewAgent(AgentId::new("fresh")));

        assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 3));
        assert_eq!(registry.peer_agents(&MessageBoxId::new("runtime-b")), ids(&["fresh"]));
    }

    #[test]
    fn test_catch_up_racing_removals_converges() {
        let transport = LocalTransport::new();
        let b_id = MessageBoxId::new("runtime-b");
        let registry_b = RuntimeRegistry::bind(&transport, b_id.clone()).unwrap();
        let ports_b = Arc::new(EnvironmentPortRegistry::new());
        ports_b.add_observer(registry_b.clone());
        registry_b.launch().unwrap();
        ports_b.add_port(MessageBoxId::new("env-keep")).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let churn = {
            let ports_b = Arc::clone(&ports_b);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut round = 0u64;
                while !stop.load(Ordering::Acquire) {
                    let id = MessageBoxId::new(format!("env-{}", round % 8));
                    ports_b.add_port(id.clone()).unwrap();
                    ports_b.remove_port(&id).unwrap();
                    round += 1;
                }
            })
        };

        let joiners: Vec<Arc<RuntimeRegistry>> = (0..10)
            .map(|i| {
                let registry = RuntimeRegistry::bind(&transport, MessageBoxId::new(format!("runtime-a{}", i))).unwrap();
                registry.add_peer(b_id.clone());
                registry.launch().unwrap();
                std::thread::sleep(Duration::from_millis(2));
                registry
            })
            .collect();

        stop.store(true, Ordering::Release);
        churn.join().unwrap();

        for joiner in &joiners {
            assert!(wait_until(Duration::from_secs(5), || {
                joiner.peer_environments(&b_id) == vec![MessageBoxId::new("env-keep")]
            }));
        }

        for joiner in joiners {
            joiner.close();
        }
        registry_b.close();
    }
}
