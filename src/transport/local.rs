// src/transport/local.rs
//! In-process transport
//!
//! All boxes of one `LocalTransport` share a hub; cloning the transport
//! shares the hub, so several runtimes in one process can talk through it.

use crate::transport::mailbox::Mailbox;
use crate::transport::{Envelope, MessageBox, Receiver, Transport};
use crate::utils::errors::TransportError;
use crate::utils::ids::MessageBoxId;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Default)]
pub struct LocalTransport {
    boxes: Arc<DashMap<MessageBoxId, Arc<Mailbox>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open boxes
    pub fn open_boxes(&self) -> usize {
        self.boxes.len()
    }
}

impl Transport for LocalTransport {
    fn open(&self, local: MessageBoxId) -> Result<Arc<dyn MessageBox>, TransportError> {
        let mailbox = match self.boxes.entry(local.clone()) {
            Entry::Occupied(_) => return Err(TransportError::AddressInUse(local)),
            Entry::Vacant(slot) => {
                let mailbox = Mailbox::new(local.clone());
                slot.insert(Arc::clone(&mailbox));
                mailbox
            }
        };

        debug!("Opened local message box {}", local);

        Ok(Arc::new(LocalMessageBox {
            mailbox,
            boxes: Arc::clone(&self.boxes),
        }))
    }
}

struct LocalMessageBox {
    mailbox: Arc<Mailbox>,
    boxes: Arc<DashMap<MessageBoxId, Arc<Mailbox>>>,
}

impl MessageBox for LocalMessageBox {
    fn id(&self) -> &MessageBoxId {
        self.mailbox.id()
    }

    fn send(&self, target: &MessageBoxId, payload: Bytes) -> Result<(), TransportError> {
        if self.mailbox.is_closed() {
            return Err(TransportError::Closed(self.id().clone()));
        }

        // Clone out of the map so no shard lock is held while enqueueing
        let destination = self
            .boxes
            .get(target)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::UnknownMessageBox(target.clone()))?;

        destination.enqueue(Envelope {
            from: self.id().clone(),
            to: target.clone(),
            payload,
        })
    }

    fn register_receiver(&self, receiver: Receiver) {
        self.mailbox.register_receiver(receiver);
    }

    fn close(&self) {
        self.boxes
            .remove_if(self.mailbox.id(), |_, open| Arc::ptr_eq(open, &self.mailbox));
        self.mailbox.close();
    }
}

impl Drop for LocalMessageBox {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_support::wait_until;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_send_and_receive() {
        let transport = LocalTransport::new();
        let a = transport.open(MessageBoxId::new("a")).unwrap();
        let b = transport.open(MessageBoxId::new("b")).unwrap();

        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = inbox.clone();
        b.register_receiver(Arc::new(move |e: Envelope| sink.lock().push(e)));

        a.send(b.id(), Bytes::from_static(b"hello")).unwrap();

        assert!(wait_until(Duration::from_secs(2), || inbox.lock().len() == 1));
        let received = inbox.lock()[0].clone();
        assert_eq!(received.from, MessageBoxId::new("a"));
        assert_eq!(received.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_per_sender_order() {
        let transport = LocalTransport::new();
        let a = transport.open(MessageBoxId::new("a")).unwrap();
        let b = transport.open(MessageBoxId::new("b")).unwrap();

        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = inbox.clone();
        b.register_receiver(Arc::new(move |e: Envelope| sink.lock().push(e.payload[0])));

        for n in 0..100u8 {
            a.send(b.id(), Bytes::from(vec![n])).unwrap();
        }

        assert!(wait_until(Duration::from_secs(2), || inbox.lock().len() == 100));
        assert_eq!(*inbox.lock(), (0..100u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_duplicate_open_rejected() {
        let transport = LocalTransport::new();
        let _a = transport.open(MessageBoxId::new("a")).unwrap();
        let again = transport.open(MessageBoxId::new("a"));
        assert!(matches!(again, Err(TransportError::AddressInUse(_))));
    }

    #[test]
    fn test_close_releases_name() {
        let transport = LocalTransport::new();
        let a = transport.open(MessageBoxId::new("a")).unwrap();
        let b = transport.open(MessageBoxId::new("b")).unwrap();
        b.close();

        assert_eq!(transport.open_boxes(), 1);
        let result = a.send(&MessageBoxId::new("b"), Bytes::new());
        assert!(matches!(result, Err(TransportError::UnknownMessageBox(_))));

        // The name can be opened again
        assert!(transport.open(MessageBoxId::new("b")).is_ok());
    }

    #[test]
    fn test_dropped_box_is_closed() {
        let transport = LocalTransport::new();
        let a = transport.open(MessageBoxId::new("a")).unwrap();
        let b = transport.open(MessageBoxId::new("b")).unwrap();
        drop(b);

        assert_eq!(transport.open_boxes(), 1);
        let result = a.send(&MessageBoxId::new("b"), Bytes::new());
        assert!(matches!(result, Err(TransportError::UnknownMessageBox(_))));
        assert!(transport.open(MessageBoxId::new("b")).is_ok());
    }
}
