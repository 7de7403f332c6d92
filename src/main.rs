// src/main.rs
//! Sentra Lab Agent Runtime
//!
//! Runs one runtime instance: loads configuration, starts the rostered
//! agents with the idle behaviour, announces itself to its peers and
//! serves until interrupted.

use anyhow::{Context, Result};
use sentra_lab_runtime::observability::init_tracing;
use sentra_lab_runtime::runtime::{Agent, AgentFactory, Capabilities, IdleBehaviour};
use sentra_lab_runtime::utils::config::EngineConfig;
use sentra_lab_runtime::{AgentId, EngineError, NodeTransport, RuntimeNode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load().context("failed to load configuration")?;

    // Initialize observability
    init_tracing(&config.logging);
    info!("Starting Sentra Lab Agent Runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let runtime = tokio::runtime::Runtime::new().context("failed to start I/O runtime")?;

    let idle = Duration::from_millis(config.pool.idle_interval_ms);
    let factory: Arc<dyn AgentFactory> = Arc::new(move |id: &AgentId| -> sentra_lab_runtime::Result<Agent> {
        Ok(Agent::new(id.clone(), Box::new(IdleBehaviour::new(idle)), Capabilities::detached(id)))
    });

    let node = RuntimeNode::from_config(&config, factory, runtime.handle().clone())?;
    if let NodeTransport::Tcp(tcp) = node.transport() {
        info!("Listening on {}", tcp.local_addr());
    }

    match node.launch() {
        Ok(()) => {}
        Err(EngineError::LaunchFailure { started, failed }) => {
            warn!("{} agents running; {} failed to launch", started.len(), failed.len());
            for (agent, reason) in &failed {
                warn!("  {}: {}", agent, reason);
            }
        }
        Err(e) => return Err(e.into()),
    }

    // Graceful shutdown handler
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to install CTRL+C signal handler")?;
    info!("Received shutdown signal, cleaning up...");

    node.shutdown()?;
    info!("Runtime stopped gracefully");
    Ok(())
}
