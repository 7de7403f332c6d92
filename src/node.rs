// src/node.rs
//! One runtime instance, fully wired
//!
//! ```text
//! AgentService ──events──► RuntimeRegistry ──publish──► peers
//! EnvironmentPortRegistry ─┘      │
//!                                 └─inbound NewAgent/DeadAgent──► AgentService (remote set)
//! ```

use crate::registry::runtime_registry::DEFAULT_MAX_PEERS;
use crate::registry::{EnvironmentPortRegistry, RemoteRuntimeEvent, RuntimeRegistry};
use crate::runtime::agent::AgentFactory;
use crate::runtime::agent_service::{AgentService, AgentServiceConfig};
use crate::transport::{LocalTransport, TcpTransport, Transport};
use crate::utils::config::{EngineConfig, TransportKind};
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::MessageBoxId;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Messaging fabric owned by a node
#[derive(Clone)]
pub enum NodeTransport {
    Local(LocalTransport),
    Tcp(TcpTransport),
}

impl NodeTransport {
    pub fn as_transport(&self) -> &dyn Transport {
        match self {
            NodeTransport::Local(local) => local as &dyn Transport,
            NodeTransport::Tcp(tcp) => tcp,
        }
    }
}

pub struct RuntimeNode {
    transport: NodeTransport,
    service: Arc<AgentService>,
    registry: Arc<RuntimeRegistry>,
    ports: Arc<EnvironmentPortRegistry>,
}

impl RuntimeNode {
    pub fn new(
        transport: NodeTransport,
        local_id: MessageBoxId,
        service_config: AgentServiceConfig,
        factory: Arc<dyn AgentFactory>,
    ) -> Result<Self> {
        Self::with_capacity(transport, local_id, service_config, factory, DEFAULT_MAX_PEERS)
    }

    fn with_capacity(
        transport: NodeTransport,
        local_id: MessageBoxId,
        service_config: AgentServiceConfig,
        factory: Arc<dyn AgentFactory>,
        max_peers: usize,
    ) -> Result<Self> {
        let registry = RuntimeRegistry::bind_with_capacity(transport.as_transport(), local_id, max_peers)?;
        let service = Arc::new(AgentService::new(service_config, factory));
        let ports = Arc::new(EnvironmentPortRegistry::new());

        service.add_observer(registry.clone());
        ports.add_observer(registry.clone());

        let remote_view = Arc::downgrade(&service);
        registry.add_listener(Arc::new(move |_origin: &MessageBoxId, event: &RemoteRuntimeEvent| {
            let Some(service) = remote_view.upgrade() else {
                return;
            };
            match event {
                RemoteRuntimeEvent::NewAgent(id) => service.add_remote_agent(id.clone()),
                RemoteRuntimeEvent::DeadAgent(id) => service.remove_remote_agent(id),
                _ => {}
            }
        }));

        Ok(Self {
            transport,
            service,
            registry,
            ports,
        })
    }

    /// Build the transport selected by `config` and seed its peers
    pub fn from_config(config: &EngineConfig, factory: Arc<dyn AgentFactory>, handle: Handle) -> Result<Self> {
        let transport = match config.transport.kind {
            TransportKind::Local => NodeTransport::Local(LocalTransport::new()),
            TransportKind::Tcp => {
                let bind = parse_address(&config.transport.bind)?;
                let advertise = config.transport.advertise.as_deref().map(parse_address).transpose()?;
                let tcp = TcpTransport::bind_advertised(bind, advertise, handle)?;
                for peer in &config.transport.peers {
                    match &peer.address {
                        Some(address) => tcp.add_route(MessageBoxId::new(&peer.id), parse_address(address)?),
                        None => warn!("Peer {} has no address; waiting for it to announce itself", peer.id),
                    }
                }
                NodeTransport::Tcp(tcp)
            }
        };

        let node = Self::with_capacity(
            transport,
            config.node.message_box_id(),
            AgentServiceConfig::with_roster(config.pool.roster()),
            factory,
            config.node.max_peers,
        )?;
        for peer in &config.transport.peers {
            node.registry.add_peer(MessageBoxId::new(&peer.id));
        }
        Ok(node)
    }

    /// Announce this runtime, then start the pool
    pub fn launch(&self) -> Result<()> {
        info!("Launching runtime {}", self.registry.local_id());
        self.registry.launch()?;
        self.service.start()
    }

    /// Stop and dispose every agent, withdraw the environment ports, then leave the network
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down runtime {}", self.registry.local_id());
        self.service.shut_down();
        self.service.await_termination()?;
        self.service.dispose()?;

        for port in self.ports.ports() {
            if let Err(e) = self.ports.remove_port(port.id()) {
                warn!("Failed to remove environment port {}: {}", port.id(), e);
            }
        }
        self.registry.close();

        if let NodeTransport::Tcp(tcp) = &self.transport {
            tcp.shutdown();
        }
        Ok(())
    }

    pub fn transport(&self) -> &NodeTransport {
        &self.transport
    }

    /// Listen address when running over TCP
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            NodeTransport::Tcp(tcp) => Some(tcp.local_addr()),
            NodeTransport::Local(_) => None,
        }
    }

    pub fn service(&self) -> &Arc<AgentService> {
        &self.service
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    pub fn ports(&self) -> &Arc<EnvironmentPortRegistry> {
        &self.ports
    }
}

fn parse_address(address: &str) -> Result<SocketAddr> {
    address.parse().map_err(|e| {
        EngineError::Config(config::ConfigError::Message(format!(
            "invalid socket address {:?}: {}",
            address, e
        )))
    })
}
