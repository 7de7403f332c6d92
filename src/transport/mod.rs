// src/transport/mod.rs
//! Pluggable messaging fabric
//!
//! A [`Transport`] opens addressable [`MessageBox`]es. Two implementations
//! are interchangeable behind the trait:
//!
//! - **Local**: in-process hub, envelopes go straight into the target queue
//! - **Tcp**: length-delimited frames over TCP with a learnt routing table
//!
//! # Delivery
//!
//! ```text
//! send(target, payload)
//!     │
//!     ├─ Local ──────────────────────────────┐
//!     │                                       ▼
//!     └─ Tcp → writer task → socket → reader → Mailbox queue → delivery thread → receivers
//! ```
//!
//! Both preserve per-sender FIFO order. Delivery is best effort: there is
//! no acknowledgment and no retry.

pub mod frame;
pub mod local;
pub mod mailbox;
pub mod routing_table;
pub mod tcp;

use crate::utils::errors::TransportError;
use crate::utils::ids::MessageBoxId;
use bytes::Bytes;
use std::sync::Arc;

pub use local::LocalTransport;
pub use routing_table::RoutingTable;
pub use tcp::TcpTransport;

/// One delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: MessageBoxId,
    pub to: MessageBoxId,
    pub payload: Bytes,
}

/// Inbound callback, invoked on the box's delivery thread
pub type Receiver = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Factory for message boxes
pub trait Transport: Send + Sync {
    /// Open a box named `local`; fails if that name is already open
    fn open(&self, local: MessageBoxId) -> Result<Arc<dyn MessageBox>, TransportError>;
}

/// Handle to one open endpoint
pub trait MessageBox: Send + Sync {
    fn id(&self) -> &MessageBoxId;

    fn send(&self, target: &MessageBoxId, payload: Bytes) -> Result<(), TransportError>;

    /// Receivers registered before the first envelope arrives see every envelope
    fn register_receiver(&self, receiver: Receiver);

    fn close(&self);
}
