// src/utils/config.rs
//! Engine configuration
//!
//! Layers, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. `sentra-runtime.{toml,yaml,json}` in the working directory (optional)
//! 3. `SENTRA__<SECTION>__<KEY>` environment variables

use crate::utils::errors::Result;
use crate::utils::ids::{AgentId, MessageBoxId};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub node: NodeConfig,
    pub transport: TransportConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

/// Identity of this runtime instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Message box id of the runtime registry
    pub name: String,

    /// Upper bound on remote runtimes tracked by the registry
    pub max_peers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "runtime".to_string(),
            max_peers: 256,
        }
    }
}

impl NodeConfig {
    pub fn message_box_id(&self) -> MessageBoxId {
        MessageBoxId::new(&self.name)
    }
}

/// Which messaging fabric to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Local,
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,

    /// Listen address for the TCP transport
    pub bind: String,

    /// Address peers should reply to, when `bind` is not reachable as written
    pub advertise: Option<String>,

    /// Runtimes announced to on launch
    pub peers: Vec<PeerConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Local,
            bind: "127.0.0.1:7400".to_string(),
            advertise: None,
            peers: vec![],
        }
    }
}

/// A known remote runtime
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Remote registry message box id
    pub id: String,

    /// Remote listen address (TCP transport only)
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Roster of agents launched by `start()`
    pub agents: Vec<String>,

    /// Idle interval of the bundled idle behaviour
    pub idle_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            agents: vec![],
            idle_interval_ms: 250,
        }
    }
}

impl PoolConfig {
    pub fn roster(&self) -> Vec<AgentId> {
        self.agents.iter().map(AgentId::new).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by RUST_LOG)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load from the default file name and the environment
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name("sentra-runtime").required(false))
            .add_source(Environment::with_prefix("SENTRA").separator("__"))
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        debug!("Loaded engine configuration for node {}", config.node.name);
        Ok(config)
    }

    /// Load from an explicit file (format chosen by extension)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
