// src/transport/mailbox.rs
//! Inbound queue of one message box
//!
//! Every open box, local or networked, owns a `Mailbox`: an unbounded MPSC
//! queue drained by one dedicated delivery thread. The thread starts with
//! the first registered receiver, so envelopes that arrive earlier stay
//! queued instead of being lost.

use crate::transport::{Envelope, Receiver};
use crate::utils::errors::TransportError;
use crate::utils::ids::MessageBoxId;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, trace};

enum Slot {
    Deliver(Envelope),
    Shutdown,
}

pub struct Mailbox {
    id: MessageBoxId,

    tx: Sender<Slot>,
    rx: crossbeam_channel::Receiver<Slot>,

    receivers: Arc<RwLock<Vec<Receiver>>>,

    /// Delivery thread, spawned lazily
    worker: Mutex<Option<JoinHandle<()>>>,

    closed: AtomicBool,

    enqueued: AtomicU64,
    delivered: Arc<AtomicU64>,
}

impl Mailbox {
    pub fn new(id: MessageBoxId) -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            id,
            tx,
            rx,
            receivers: Arc::new(RwLock::new(Vec::new())),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            delivered: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn id(&self) -> &MessageBoxId {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue an envelope for delivery (never blocks)
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.id.clone()));
        }

        trace!("Queueing envelope {} -> {}", envelope.from, envelope.to);
        self.tx
            .send(Slot::Deliver(envelope))
            .map_err(|_| TransportError::Closed(self.id.clone()))?;
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn register_receiver(&self, receiver: Receiver) {
        self.receivers.write().push(receiver);

        let mut worker = self.worker.lock();
        if worker.is_some() || self.is_closed() {
            return;
        }

        let rx = self.rx.clone();
        let receivers = Arc::clone(&self.receivers);
        let delivered = Arc::clone(&self.delivered);
        let id = self.id.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("mailbox-{}", self.id))
            .spawn(move || {
                for slot in rx.iter() {
                    let envelope = match slot {
                        Slot::Deliver(envelope) => envelope,
                        Slot::Shutdown => break,
                    };

                    let snapshot: Vec<Receiver> = receivers.read().clone();
                    for receiver in snapshot {
                        let envelope = envelope.clone();
                        if catch_unwind(AssertUnwindSafe(|| receiver(envelope))).is_err() {
                            error!("Receiver of {} panicked while handling an envelope", id);
                        }
                    }

                    delivered.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("mailbox_envelopes_delivered_total").increment(1);
                }
                debug!("Delivery thread for {} stopped", id);
            });

        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => error!("Failed to spawn delivery thread for {}: {}", self.id, e),
        }
    }

    /// Stop delivery; queued envelopes behind the shutdown marker are dropped
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.tx.send(Slot::Shutdown);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // A receiver may close its own box from the delivery thread
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }

        debug!("Mailbox {} closed", self.id);
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            pending: self.rx.len(),
        }
    }
}

/// Mailbox counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub pending: usize,
}
