// src/runtime/agent_service.rs
//! Agent pool supervisor
//!
//! Owns the roster of agents of one runtime, drives bulk start and
//! shutdown, and republishes presence changes to registered observers.
//!
//! # Architecture
//!
//! ```text
//! AgentService
//! ├─ Agents: {id → Agent}          (local, one thread each)
//! ├─ Remote agents: {id}           (learnt from the runtime registry)
//! └─ Observers: [o1, o2, ...]      (synchronous fan-out, registration order)
//! ```
//!
//! # Events
//!
//! One presence event per agent, at the moment it becomes known to the
//! pool, and one removal event when it leaves. Lifecycle transitions in
//! between are not republished; query the agent's controller for those.

use crate::runtime::agent::{Agent, AgentFactory};
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::AgentId;
use crate::utils::observers::ObserverSet;
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for the agent service
#[derive(Debug, Clone, Default)]
pub struct AgentServiceConfig {
    /// Agents created by `start()`
    pub roster: Vec<AgentId>,
}

impl AgentServiceConfig {
    pub fn with_roster(roster: impl IntoIterator<Item = AgentId>) -> Self {
        Self {
            roster: roster.into_iter().collect(),
        }
    }
}

/// Aggregate pool state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Disposed,
}

#[derive(Debug, Clone)]
pub enum AgentServiceEvent {
    /// An agent instantiated in this runtime joined the pool
    LocalAgentAdded(Arc<Agent>),

    /// An agent known only through the runtime registry
    RemoteAgentAdded(AgentId),

    AgentRemoved { id: AgentId, remote: bool },
}

impl AgentServiceEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            AgentServiceEvent::LocalAgentAdded(agent) => agent.id(),
            AgentServiceEvent::RemoteAgentAdded(id) => id,
            AgentServiceEvent::AgentRemoved { id, .. } => id,
        }
    }

    pub fn is_presence(&self) -> bool {
        !matches!(self, AgentServiceEvent::AgentRemoved { .. })
    }
}

pub trait AgentServiceObserver: Send + Sync {
    /// Must not block indefinitely; panics are logged and swallowed
    fn agent_service_event(&self, service: &AgentService, event: &AgentServiceEvent);
}

pub struct AgentService {
    config: AgentServiceConfig,

    factory: Arc<dyn AgentFactory>,

    state: RwLock<PoolState>,

    /// Serializes pool transitions with admission of agents into the pool
    lifecycle: ReentrantMutex<()>,

    agents: RwLock<HashMap<AgentId, Arc<Agent>>>,

    remote_agents: RwLock<BTreeSet<AgentId>>,

    observers: ObserverSet<dyn AgentServiceObserver>,
}

impl AgentService {
    pub fn new(config: AgentServiceConfig, factory: Arc<dyn AgentFactory>) -> Self {
        info!("Initializing agent service with {} rostered agents", config.roster.len());

        Self {
            config,
            factory,
            state: RwLock::new(PoolState::Idle),
            lifecycle: ReentrantMutex::new(()),
            agents: RwLock::new(HashMap::new()),
            remote_agents: RwLock::new(BTreeSet::new()),
            observers: ObserverSet::new("agent service"),
        }
    }

    pub fn state(&self) -> PoolState {
        *self.state.read()
    }

    /// Create and run every rostered agent
    ///
    /// Agents that fail to start are reported in `LaunchFailure`; agents that
    /// did start keep running. A `shut_down()` landing mid-start stops the
    /// remaining launches and terminates anything admitted afterwards.
    pub fn start(&self) -> Result<()> {
        {
            let _lifecycle = self.lifecycle.lock();
            self.transition("start", &[PoolState::Idle], PoolState::Starting)?;
        }
        info!("Starting agent service");

        let mut started = Vec::new();
        let mut failed = Vec::new();

        for id in &self.config.roster {
            if self.state() != PoolState::Starting {
                failed.push((id.clone(), "pool shut down during start".to_string()));
                continue;
            }
            if self.agents.read().contains_key(id) {
                continue;
            }

            // Factory and thread spawn run outside the lifecycle lock
            match self.launch(id).and_then(|agent| self.admit(agent)) {
                Ok(()) => started.push(id.clone()),
                Err(e) => {
                    warn!("Failed to launch agent {}: {}", id, e);
                    failed.push((id.clone(), e.to_string()));
                }
            }
        }

        {
            let _lifecycle = self.lifecycle.lock();

            // Agents added on demand before start() that never ran
            if self.state() == PoolState::Starting {
                for agent in self.get_agents() {
                    if agent.controller().launch_count() == 0 && !agent.is_disposed() {
                        match agent.run() {
                            Ok(()) => started.push(agent.id().clone()),
                            Err(e) => failed.push((agent.id().clone(), e.to_string())),
                        }
                    }
                }
            }

            let mut state = self.state.write();
            if *state == PoolState::Starting {
                *state = PoolState::Running;
            }
        }

        if failed.is_empty() {
            info!("Agent service running with {} agents", started.len());
            Ok(())
        } else {
            warn!("{} agents started, {} failed", started.len(), failed.len());
            Err(EngineError::LaunchFailure { started, failed })
        }
    }

    /// Ask every agent to stop; does not wait
    pub fn shut_down(&self) {
        let agents = {
            let _lifecycle = self.lifecycle.lock();
            let mut state = self.state.write();
            if matches!(*state, PoolState::Starting | PoolState::Running) {
                *state = PoolState::ShuttingDown;
            }
            drop(state);
            self.get_agents()
        };

        info!("Shutting down {} agents", agents.len());
        for agent in agents {
            agent.terminate();
        }
    }

    /// Block until every agent is terminated
    pub fn await_termination(&self) -> Result<()> {
        for agent in self.get_agents() {
            agent.await_termination()?;
        }
        debug!("All agents terminated");
        Ok(())
    }

    /// Dispose every agent and release the pool; refused while any agent is alive
    pub fn dispose(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.state() == PoolState::Disposed {
            return Err(EngineError::invalid_state("dispose", PoolState::Disposed));
        }

        let pending: Vec<AgentId> = self
            .get_agents()
            .iter()
            .filter(|agent| !agent.is_terminated())
            .map(|agent| agent.id().clone())
            .collect();

        if !pending.is_empty() {
            return Err(EngineError::Dispose {
                reason: format!("{} agents have not terminated", pending.len()),
                pending,
            });
        }

        let agents: Vec<Arc<Agent>> = self.agents.write().drain().map(|(_, agent)| agent).collect();
        for agent in agents {
            if let Err(e) = agent.dispose() {
                warn!("Agent {} failed to dispose: {}", agent.id(), e);
            }
            self.emit(AgentServiceEvent::AgentRemoved {
                id: agent.id().clone(),
                remote: false,
            });
        }

        *self.state.write() = PoolState::Disposed;
        info!("Agent service disposed");
        Ok(())
    }

    /// Add an agent on demand; it runs immediately once the pool has started
    pub fn add_agent(&self, agent: Agent) -> Result<Arc<Agent>> {
        let _lifecycle = self.lifecycle.lock();
        let state = self.state();
        if matches!(state, PoolState::ShuttingDown | PoolState::Disposed) {
            return Err(EngineError::invalid_state("add an agent", state));
        }

        let agent = Arc::new(agent);
        if matches!(state, PoolState::Starting | PoolState::Running) {
            agent.run()?;
        }

        if let Err(e) = self.insert(Arc::clone(&agent)) {
            agent.terminate();
            let _ = agent.await_termination();
            return Err(e);
        }
        Ok(agent)
    }

    /// Remove a terminated agent from the pool and dispose it
    pub fn remove_agent(&self, id: &AgentId) -> Result<()> {
        let agent = self
            .get_agent(id)
            .ok_or_else(|| EngineError::UnknownAgent(id.clone()))?;

        agent.dispose()?;
        self.agents.write().remove(id);

        debug!("Removed agent {}", id);
        self.emit(AgentServiceEvent::AgentRemoved {
            id: id.clone(),
            remote: false,
        });
        Ok(())
    }

    /// Record an agent hosted by another runtime
    pub fn add_remote_agent(&self, id: AgentId) {
        let inserted = {
            let agents = self.agents.read();
            if agents.contains_key(&id) {
                warn!("Ignoring remote announcement of local agent {}", id);
                return;
            }
            self.remote_agents.write().insert(id.clone())
        };

        if inserted {
            debug!("Remote agent {} joined", id);
            self.emit(AgentServiceEvent::RemoteAgentAdded(id));
        }
    }

    pub fn remove_remote_agent(&self, id: &AgentId) {
        if self.remote_agents.write().remove(id) {
            debug!("Remote agent {} left", id);
            self.emit(AgentServiceEvent::AgentRemoved {
                id: id.clone(),
                remote: true,
            });
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn AgentServiceObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn AgentServiceObserver>) -> bool {
        self.observers.remove(observer)
    }

    /// Full roster, including terminated agents not yet disposed
    pub fn get_agents(&self) -> Vec<Arc<Agent>> {
        self.agents.read().values().cloned().collect()
    }

    /// Agents whose controller currently reports running
    pub fn get_alive_agents(&self) -> Vec<Arc<Agent>> {
        self.agents
            .read()
            .values()
            .filter(|agent| agent.is_running())
            .cloned()
            .collect()
    }

    pub fn get_agent(&self, id: &AgentId) -> Option<Arc<Agent>> {
        self.agents.read().get(id).cloned()
    }

    pub fn remote_agents(&self) -> Vec<AgentId> {
        self.remote_agents.read().iter().cloned().collect()
    }

    pub fn stats(&self) -> ServiceStats {
        let agents = self.agents.read();
        let alive = agents.values().filter(|agent| agent.is_running()).count();

        ServiceStats {
            state: self.state(),
            total_agents: agents.len(),
            alive_agents: alive,
            remote_agents: self.remote_agents.read().len(),
            observers: self.observers.len(),
        }
    }

    fn launch(&self, id: &AgentId) -> Result<Arc<Agent>> {
        let agent = self.factory.create(id).map_err(|e| match e {
            EngineError::AgentFactory { .. } => e,
            other => EngineError::AgentFactory {
                agent: id.clone(),
                reason: other.to_string(),
            },
        })?;

        if agent.id() != id {
            return Err(EngineError::AgentFactory {
                agent: id.clone(),
                reason: format!("factory produced agent {}", agent.id()),
            });
        }

        let agent = Arc::new(agent);
        if let Err(e) = agent.run() {
            let _ = agent.dispose();
            return Err(e);
        }
        Ok(agent)
    }

    /// Admit a freshly launched roster agent, unless the pool stopped starting
    fn admit(&self, agent: Arc<Agent>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let state = self.state();
        let admitted = if state == PoolState::Starting {
            self.insert(Arc::clone(&agent))
        } else {
            Err(EngineError::invalid_state("admit an agent", state))
        };

        if admitted.is_err() {
            agent.terminate();
            let _ = agent.await_termination();
            let _ = agent.dispose();
        }
        admitted
    }

    /// Local ids may not shadow a remote agent nor another local one
    fn insert(&self, agent: Arc<Agent>) -> Result<()> {
        {
            let mut agents = self.agents.write();
            if agents.contains_key(agent.id()) || self.remote_agents.read().contains(agent.id()) {
                return Err(EngineError::DuplicateAgent(agent.id().clone()));
            }
            agents.insert(agent.id().clone(), Arc::clone(&agent));
        }

        debug!("Agent {} joined the pool", agent.id());
        self.emit(AgentServiceEvent::LocalAgentAdded(agent));
        Ok(())
    }

    fn emit(&self, event: AgentServiceEvent) {
        self.observers.emit(|observer| observer.agent_service_event(self, &event));
    }

    fn transition(&self, operation: &'static str, from: &[PoolState], to: PoolState) -> Result<()> {
        let mut state = self.state.write();
        if !from.contains(&*state) {
            return Err(EngineError::invalid_state(operation, *state));
        }
        *state = to;
        Ok(())
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub state: PoolState,
    pub total_agents: usize,
    pub alive_agents: usize,
    pub remote_agents: usize,
    pub observers: usize,
}
