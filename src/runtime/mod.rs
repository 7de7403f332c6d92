// src/runtime/mod.rs
//! Agent execution runtime
//!
//! This module provides the local half of the platform:
//!
//! - **Agent Controller**: Run/terminate/await/reset lifecycle on a dedicated thread
//! - **Agent**: Identity, controller and injected capabilities
//! - **Capabilities**: Environment, messaging and logging interfaces
//! - **Agent Service**: Pool supervisor with an ordered observer bus
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Agent Service                       │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐              │
//! │  │ Agent    │  │ Agent    │  │ Agent    │  ...         │
//! │  │ (thread) │  │ (thread) │  │ (thread) │              │
//! │  └──────────┘  └──────────┘  └──────────┘              │
//! │         │            │            │                     │
//! │         └────────────┴────────────┘                     │
//! │                      │                                  │
//! │            Observers (registration order)               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod agent_controller;
pub mod agent_service;
pub mod capabilities;

// Re-export commonly used types
pub use agent::{Agent, AgentBehaviour, AgentContext, AgentFactory, IdleBehaviour};
pub use agent_controller::{AgentController, ControllerState, ExecutionUnit, Step};
pub use agent_service::{AgentService, AgentServiceConfig, AgentServiceEvent, AgentServiceObserver, PoolState};
pub use capabilities::{AgentLogger, Capabilities, EnvironmentCapability, MessagingCapability};
