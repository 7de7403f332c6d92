// src/runtime/agent_controller.rs
//! Lifecycle state machine for one agent's thread of execution
//!
//! ```text
//!              run() / reset()
//!  Terminated ───────────────────► Running
//!      ▲                              │
//!      │ worker exits                 │ terminate()
//!      │                              ▼
//!      └──────────────────────────  Stopping
//! ```
//!
//! Each run owns a dedicated OS thread. `terminate()` is cooperative: the
//! worker checks the stop flag between steps and is woken early from idle
//! waits. Only the worker stores the final `Terminated` state, so
//! `await_termination()` joins the worker instead of polling the flag.
//!
//! State queries are single atomic loads.

use crate::utils::errors::{EngineError, Result};
use crossbeam::atomic::AtomicCell;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControllerState {
    Running,
    Stopping,
    Terminated,
}

/// Outcome of one execution step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Step again immediately
    Continue,

    /// Nothing to do; wait up to the given duration (cut short by `terminate()`)
    Idle(Duration),

    /// The run is complete
    Finished,
}

/// The work driven by a controller
pub trait ExecutionUnit: Send + 'static {
    fn step(&mut self) -> anyhow::Result<Step>;

    /// Discard transient state of the previous run
    fn reset(&mut self) {}
}

/// State shared between the controller and its worker thread
struct Shared {
    state: AtomicCell<ControllerState>,
    stop: AtomicBool,
    signal: Mutex<()>,
    changed: Condvar,
}

impl Shared {
    fn state(&self) -> ControllerState {
        self.state.load()
    }

    /// Wake idle workers and termination waiters
    fn notify(&self) {
        let _signal = self.signal.lock();
        self.changed.notify_all();
    }

    fn idle(&self, timeout: Duration) {
        let mut signal = self.signal.lock();
        if !self.stop.load(Ordering::Acquire) {
            self.changed.wait_for(&mut signal, timeout);
        }
    }
}

/// Stores `Terminated` when the worker exits, even by unwinding
struct TerminationGuard {
    shared: Arc<Shared>,
    name: String,
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("Agent {} panicked; marking terminated", self.name);
        }
        self.shared.state.store(ControllerState::Terminated);
        self.shared.notify();
        debug!("Agent {} terminated", self.name);
    }
}

pub struct AgentController {
    /// Used for thread names and log lines
    name: String,

    shared: Arc<Shared>,

    unit: Arc<Mutex<dyn ExecutionUnit>>,

    /// Serializes run / reset / terminate
    lifecycle: Mutex<()>,

    /// Worker of the latest run, until someone joins it
    worker: Mutex<Option<JoinHandle<()>>>,

    worker_thread: Mutex<Option<ThreadId>>,

    launches: AtomicU64,
}

impl AgentController {
    pub fn new(name: impl Into<String>, unit: Arc<Mutex<dyn ExecutionUnit>>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                state: AtomicCell::new(ControllerState::Terminated),
                stop: AtomicBool::new(false),
                signal: Mutex::new(()),
                changed: Condvar::new(),
            }),
            unit,
            lifecycle: Mutex::new(()),
            worker: Mutex::new(None),
            worker_thread: Mutex::new(None),
            launches: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ControllerState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ControllerState::Terminated
    }

    /// Number of times `run()` or `reset()` launched a worker
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Start a worker; only valid while `Terminated`
    pub fn run(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.ensure_terminated("run")?;
        self.launch()
    }

    /// Wipe execution state and start a new run; only valid while `Terminated`
    pub fn reset(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.ensure_terminated("reset")?;

        debug!("Resetting agent {}", self.name);
        self.unit.lock().reset();
        self.launch()
    }

    /// Request a cooperative stop; no-op unless `Running`
    pub fn terminate(&self) {
        let _lifecycle = self.lifecycle.lock();

        if self
            .shared
            .state
            .compare_exchange(ControllerState::Running, ControllerState::Stopping)
            .is_ok()
        {
            debug!("Stopping agent {}", self.name);
            self.shared.stop.store(true, Ordering::Release);
            self.shared.notify();
        }
    }

    /// Block until `Terminated`; safe for any number of concurrent callers
    pub fn await_termination(&self) -> Result<()> {
        if *self.worker_thread.lock() == Some(std::thread::current().id()) && !self.is_terminated() {
            return Err(EngineError::invalid_state(
                "await termination from the agent's own thread",
                self.state(),
            ));
        }

        // First caller joins; the rest wait for the state change below
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Worker of agent {} ended by panic", self.name);
            }
        }

        let mut signal = self.shared.signal.lock();
        while !self.is_terminated() {
            self.shared.changed.wait(&mut signal);
        }
        Ok(())
    }

    fn ensure_terminated(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            ControllerState::Terminated => Ok(()),
            state => Err(EngineError::invalid_state(operation, state)),
        }
    }

    /// Caller holds the lifecycle lock and has checked `Terminated`
    fn launch(&self) -> Result<()> {
        // Reap the previous worker; it has already stored Terminated
        if let Some(previous) = self.worker.lock().take() {
            let _ = previous.join();
        }

        self.shared.stop.store(false, Ordering::Release);
        // Publish Running before the worker can possibly store Terminated
        self.shared.state.store(ControllerState::Running);

        let shared = Arc::clone(&self.shared);
        let unit = Arc::clone(&self.unit);
        let name = self.name.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("agent-{}", self.name))
            .spawn(move || work_loop(shared, unit, name));

        match spawned {
            Ok(handle) => {
                *self.worker_thread.lock() = Some(handle.thread().id());
                *self.worker.lock() = Some(handle);
                self.launches.fetch_add(1, Ordering::Relaxed);
                info!("Agent {} running", self.name);
                Ok(())
            }
            Err(e) => {
                self.shared.state.store(ControllerState::Terminated);
                Err(EngineError::ThreadSpawn(e))
            }
        }
    }
}

fn work_loop(shared: Arc<Shared>, unit: Arc<Mutex<dyn ExecutionUnit>>, name: String) {
    let _guard = TerminationGuard {
        shared: Arc::clone(&shared),
        name: name.clone(),
    };

    while !shared.stop.load(Ordering::Acquire) {
        let outcome = unit.lock().step();
        match outcome {
            Ok(Step::Continue) => {}
            Ok(Step::Idle(timeout)) => shared.idle(timeout),
            Ok(Step::Finished) => {
                debug!("Agent {} finished its run", name);
                break;
            }
            Err(e) => {
                error!("Agent {} step failed: {:#}", name, e);
                break;
            }
        }
    }
}

impl Drop for AgentController {
    fn drop(&mut self) {
        // Best-effort: never leave a detached worker behind
        if !self.is_terminated() {
            warn!("Dropping agent {} while {:?}; stopping it", self.name, self.state());
            self.terminate();
            let _ = self.await_termination();
        }
    }
}
