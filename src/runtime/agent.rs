// src/runtime/agent.rs
//! Agent: identity + controller + capabilities
//!
//! The agent's reasoning is supplied from outside as an [`AgentBehaviour`];
//! the controller drives it one step at a time on the agent's own thread,
//! handing it the agent's capabilities through an [`AgentContext`].

use crate::runtime::agent_controller::{AgentController, ControllerState, ExecutionUnit, Step};
use crate::runtime::capabilities::{AgentLogger, Capabilities, EnvironmentCapability, MessagingCapability};
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::AgentId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// What a behaviour sees during one step
pub struct AgentContext<'a> {
    pub id: &'a AgentId,
    pub environment: &'a mut dyn EnvironmentCapability,
    pub messaging: &'a mut dyn MessagingCapability,
    pub logger: &'a dyn AgentLogger,
}

/// Externally supplied agent logic
pub trait AgentBehaviour: Send + 'static {
    fn step(&mut self, ctx: &mut AgentContext<'_>) -> anyhow::Result<Step>;

    /// Forget everything learnt during the previous run
    fn reset(&mut self) {}
}

/// Behaviour that does nothing but stay alive
#[derive(Debug, Clone)]
pub struct IdleBehaviour {
    pub interval: Duration,
}

impl IdleBehaviour {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl AgentBehaviour for IdleBehaviour {
    fn step(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<Step> {
        Ok(Step::Idle(self.interval))
    }
}

/// Behaviour + capabilities, driven by the controller
struct AgentExecution {
    id: AgentId,
    behaviour: Box<dyn AgentBehaviour>,
    capabilities: Capabilities,
}

impl ExecutionUnit for AgentExecution {
    fn step(&mut self) -> anyhow::Result<Step> {
        let Capabilities {
            environment,
            messaging,
            logger,
        } = &mut self.capabilities;

        let mut ctx = AgentContext {
            id: &self.id,
            environment: &mut **environment,
            messaging: &mut **messaging,
            logger: &**logger,
        };
        self.behaviour.step(&mut ctx)
    }

    fn reset(&mut self) {
        self.behaviour.reset();
    }
}

pub struct Agent {
    id: AgentId,

    controller: AgentController,

    execution: Arc<Mutex<AgentExecution>>,

    /// Held by run / reset / dispose so a run never starts on released capabilities
    lifecycle: Mutex<()>,

    disposed: AtomicBool,
}

impl Agent {
    pub fn new(id: AgentId, behaviour: Box<dyn AgentBehaviour>, capabilities: Capabilities) -> Self {
        let execution = Arc::new(Mutex::new(AgentExecution {
            id: id.clone(),
            behaviour,
            capabilities,
        }));
        let unit: Arc<Mutex<dyn ExecutionUnit>> = execution.clone();

        Self {
            controller: AgentController::new(id.as_str(), unit),
            id,
            execution,
            lifecycle: Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn controller(&self) -> &AgentController {
        &self.controller
    }

    pub fn state(&self) -> ControllerState {
        self.controller.state()
    }

    pub fn run(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.ensure_not_disposed("run")?;
        self.controller.run()
    }

    pub fn reset(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.ensure_not_disposed("reset")?;
        self.controller.reset()
    }

    pub fn terminate(&self) {
        self.controller.terminate();
    }

    pub fn await_termination(&self) -> Result<()> {
        self.controller.await_termination()
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn is_terminated(&self) -> bool {
        self.controller.is_terminated()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release the agent's capabilities; refused unless terminated
    pub fn dispose(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if !self.controller.is_terminated() {
            let err = EngineError::Dispose {
                reason: format!("agent {} is {:?}", self.id, self.controller.state()),
                pending: vec![self.id.clone()],
            };
            error!("Cannot dispose agent {}: {}", self.id, err);
            return Err(err);
        }

        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("Disposing agent {}", self.id);
        let mut execution = self.execution.lock();
        if let Err(e) = execution.capabilities.environment.dispose() {
            warn!("Environment of agent {} failed to dispose: {:#}", self.id, e);
        }
        if let Err(e) = execution.capabilities.messaging.dispose() {
            warn!("Messaging of agent {} failed to dispose: {:#}", self.id, e);
        }
        Ok(())
    }

    fn ensure_not_disposed(&self, operation: &'static str) -> Result<()> {
        if self.is_disposed() {
            return Err(EngineError::InvalidState {
                operation,
                state: "disposed".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("state", &self.controller.state())
            .finish()
    }
}

/// Builds agents for a pool roster
pub trait AgentFactory: Send + Sync {
    fn create(&self, id: &AgentId) -> Result<Agent>;
}

impl<F> AgentFactory for F
where
    F: Fn(&AgentId) -> Result<Agent> + Send + Sync,
{
    fn create(&self, id: &AgentId) -> Result<Agent> {
        self(id)
    }
}
