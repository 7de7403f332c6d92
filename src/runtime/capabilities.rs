// src/runtime/capabilities.rs
//! Capability interfaces injected into agents
//!
//! The runtime only calls these; what an environment means or how an agent
//! reasons about messages lives behind them.
//!
//! - **Environment**: percept retrieval, action execution
//! - **Messaging**: send/receive keyed by message box id
//! - **Logging**: per-agent log sink

use crate::transport::{Envelope, MessageBox, Transport};
use crate::utils::errors::{Result, TransportError};
use crate::utils::ids::{AgentId, MessageBoxId};
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn, Level};

pub type Percept = serde_json::Value;
pub type Action = serde_json::Value;

pub trait EnvironmentCapability: Send {
    fn percepts(&mut self) -> anyhow::Result<Vec<Percept>>;

    fn act(&mut self, action: &Action) -> anyhow::Result<()>;

    fn dispose(&mut self) -> anyhow::Result<()>;
}

pub trait MessagingCapability: Send {
    fn send(&mut self, to: &MessageBoxId, payload: Bytes) -> std::result::Result<(), TransportError>;

    /// Next queued message, if any (never blocks)
    fn receive(&mut self) -> Option<Envelope>;

    fn dispose(&mut self) -> anyhow::Result<()>;
}

pub trait AgentLogger: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Collaborators owned by one agent
pub struct Capabilities {
    pub environment: Box<dyn EnvironmentCapability>,
    pub messaging: Box<dyn MessagingCapability>,
    pub logger: Arc<dyn AgentLogger>,
}

impl Capabilities {
    /// No environment, no messaging, tracing logger
    pub fn detached(agent: &AgentId) -> Self {
        Self {
            environment: Box::new(DetachedEnvironment),
            messaging: Box::new(DetachedMessaging),
            logger: Arc::new(TracingLogger::new(agent.clone())),
        }
    }

    /// No environment; messaging through a box named after the agent
    pub fn with_mailbox(transport: &dyn Transport, runtime: &MessageBoxId, agent: &AgentId) -> Result<Self> {
        Ok(Self {
            environment: Box::new(DetachedEnvironment),
            messaging: Box::new(MailboxMessaging::open(transport, MessageBoxId::for_agent(runtime, agent))?),
            logger: Arc::new(TracingLogger::new(agent.clone())),
        })
    }
}

/// Environment of an agent not attached to any environment
pub struct DetachedEnvironment;

impl EnvironmentCapability for DetachedEnvironment {
    fn percepts(&mut self) -> anyhow::Result<Vec<Percept>> {
        Ok(vec![])
    }

    fn act(&mut self, action: &Action) -> anyhow::Result<()> {
        anyhow::bail!("no environment attached; cannot perform {}", action)
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct DetachedMessaging;

impl MessagingCapability for DetachedMessaging {
    fn send(&mut self, to: &MessageBoxId, _payload: Bytes) -> std::result::Result<(), TransportError> {
        Err(TransportError::NoRoute(to.clone()))
    }

    fn receive(&mut self) -> Option<Envelope> {
        None
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Messaging over a transport message box
pub struct MailboxMessaging {
    mailbox: Arc<dyn MessageBox>,
    inbox: Receiver<Envelope>,
}

impl MailboxMessaging {
    pub fn open(transport: &dyn Transport, id: MessageBoxId) -> std::result::Result<Self, TransportError> {
        let mailbox = transport.open(id)?;
        let (tx, inbox) = unbounded();
        mailbox.register_receiver(Arc::new(move |envelope: Envelope| {
            // The agent may already be gone
            let _ = tx.send(envelope);
        }));

        Ok(Self { mailbox, inbox })
    }

    pub fn id(&self) -> &MessageBoxId {
        self.mailbox.id()
    }
}

impl MessagingCapability for MailboxMessaging {
    fn send(&mut self, to: &MessageBoxId, payload: Bytes) -> std::result::Result<(), TransportError> {
        self.mailbox.send(to, payload)
    }

    fn receive(&mut self) -> Option<Envelope> {
        self.inbox.try_recv().ok()
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        debug!("Closing message box {}", self.mailbox.id());
        self.mailbox.close();
        Ok(())
    }
}

/// Logger forwarding to `tracing` with the agent id attached
pub struct TracingLogger {
    agent: AgentId,
}

impl TracingLogger {
    pub fn new(agent: AgentId) -> Self {
        Self { agent }
    }
}

impl AgentLogger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        let agent = self.agent.as_str();
        match level {
            Level::ERROR => error!(agent, "{}", message),
            Level::WARN => warn!(agent, "{}", message),
            Level::INFO => info!(agent, "{}", message),
            Level::DEBUG => debug!(agent, "{}", message),
            _ => trace!(agent, "{}", message),
        }
    }
}
