// src/transport/tcp.rs
//! Networked transport over TCP
//!
//! One `TcpTransport` listens on one socket and hosts any number of message
//! boxes. Outbound traffic to each remote address goes through a single
//! connection owned by a single writer task, which keeps per-sender FIFO
//! order. Inbound frames are decoded on the reader task and handed to the
//! target box's mailbox; user callbacks never run on tokio worker threads.
//!
//! # Architecture
//!
//! ```text
//! MessageBox::send ──► UnboundedSender ──► writer task ──► TcpStream
//!                        (per address)       (connect on demand)
//!
//! TcpListener ──► reader task ──► Frame::decode ──► RoutingTable::learn
//!                                      │
//!                                      ▼
//!                               Mailbox (delivery thread)
//! ```

use crate::transport::frame::Frame;
use crate::transport::mailbox::Mailbox;
use crate::transport::routing_table::{Route, RoutingTable};
use crate::transport::{Envelope, MessageBox, Receiver, Transport};
use crate::utils::errors::TransportError;
use crate::utils::ids::MessageBoxId;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

struct TcpInner {
    /// Address the listener is bound to
    local_addr: SocketAddr,

    /// Address written into outbound frames as `reply_to`
    advertise: SocketAddr,

    /// Runtime driving socket I/O
    handle: Handle,

    /// Boxes hosted by this transport
    boxes: DashMap<MessageBoxId, Arc<Mailbox>>,

    routes: RoutingTable,

    /// Outbound queue per remote address
    connections: DashMap<SocketAddr, mpsc::UnboundedSender<Bytes>>,

    shutdown: CancellationToken,
}

impl TcpTransport {
    /// Bind the listener and start accepting on `handle`
    pub fn bind(addr: SocketAddr, handle: Handle) -> Result<Self, TransportError> {
        Self::bind_advertised(addr, None, handle)
    }

    /// Bind, telling peers to reply on `advertise` instead of the bound address
    ///
    /// Without an advertised address, a listener bound to an unspecified IP
    /// advertises only its port and peers pair it with the IP they see.
    pub fn bind_advertised(
        addr: SocketAddr,
        advertise: Option<SocketAddr>,
        handle: Handle,
    ) -> Result<Self, TransportError> {
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let listener = {
            let _runtime = handle.enter();
            TcpListener::from_std(std_listener)?
        };

        let advertise = advertise.unwrap_or(local_addr);
        let inner = Arc::new(TcpInner {
            local_addr,
            advertise,
            handle: handle.clone(),
            boxes: DashMap::new(),
            routes: RoutingTable::new(),
            connections: DashMap::new(),
            shutdown: CancellationToken::new(),
        });

        handle.spawn(accept_loop(Arc::clone(&inner), listener));
        info!("TCP transport listening on {} (advertised as {})", local_addr, advertise);

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn advertised_addr(&self) -> SocketAddr {
        self.inner.advertise
    }

    /// Configure the address hosting `target`
    pub fn add_route(&self, target: MessageBoxId, address: SocketAddr) {
        self.inner.routes.add_route(Route::new(target, address));
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.inner.routes
    }

    /// Stop accepting, reading and writing; open boxes stay open locally
    pub fn shutdown(&self) {
        info!("Shutting down TCP transport on {}", self.inner.local_addr);
        self.inner.shutdown.cancel();
        self.inner.connections.clear();
    }
}

impl Transport for TcpTransport {
    fn open(&self, local: MessageBoxId) -> Result<Arc<dyn MessageBox>, TransportError> {
        let mailbox = match self.inner.boxes.entry(local.clone()) {
            Entry::Occupied(_) => return Err(TransportError::AddressInUse(local)),
            Entry::Vacant(slot) => {
                let mailbox = Mailbox::new(local.clone());
                slot.insert(Arc::clone(&mailbox));
                mailbox
            }
        };

        debug!("Opened TCP message box {} on {}", local, self.inner.local_addr);

        Ok(Arc::new(TcpMessageBox {
            mailbox,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct TcpMessageBox {
    mailbox: Arc<Mailbox>,
    inner: Arc<TcpInner>,
}

impl MessageBox for TcpMessageBox {
    fn id(&self) -> &MessageBoxId {
        self.mailbox.id()
    }

    fn send(&self, target: &MessageBoxId, payload: Bytes) -> Result<(), TransportError> {
        if self.mailbox.is_closed() {
            return Err(TransportError::Closed(self.id().clone()));
        }
        self.inner.send(self.id(), target, payload)
    }

    fn register_receiver(&self, receiver: Receiver) {
        self.mailbox.register_receiver(receiver);
    }

    fn close(&self) {
        self.inner
            .boxes
            .remove_if(self.mailbox.id(), |_, open| Arc::ptr_eq(open, &self.mailbox));
        self.mailbox.close();
    }
}

impl Drop for TcpMessageBox {
    fn drop(&mut self) {
        self.close();
    }
}

impl TcpInner {
    fn send(
        self: &Arc<Self>,
        from: &MessageBoxId,
        target: &MessageBoxId,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        // Co-hosted boxes skip the socket
        let local = self.boxes.get(target).map(|entry| Arc::clone(entry.value()));
        if let Some(mailbox) = local {
            return mailbox.enqueue(Envelope {
                from: from.clone(),
                to: target.clone(),
                payload,
            });
        }

        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed(from.clone()));
        }

        let address = self
            .routes
            .lookup(target)
            .ok_or_else(|| TransportError::NoRoute(target.clone()))?;

        let frame = Frame {
            from: from.clone(),
            to: target.clone(),
            reply_to: self.advertise,
            payload,
        }
        .encode()?;

        // The first attempt may hit a connection whose writer just died
        let mut frame = frame;
        for _ in 0..2 {
            match self.connection(address).send(frame) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    self.connections.remove_if(&address, |_, tx| tx.is_closed());
                    frame = returned;
                }
            }
        }

        Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("connection to {} unavailable", address),
        )))
    }

    fn connection(self: &Arc<Self>, address: SocketAddr) -> mpsc::UnboundedSender<Bytes> {
        self.connections
            .entry(address)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                self.handle.spawn(write_loop(Arc::clone(self), address, rx));
                tx
            })
            .clone()
    }

    fn dispatch(&self, raw: Bytes, peer: SocketAddr) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return;
            }
        };

        self.routes.learn(&frame.from, reply_route(frame.reply_to, peer));

        let mailbox = self.boxes.get(&frame.to).map(|entry| Arc::clone(entry.value()));
        match mailbox {
            Some(mailbox) => {
                let envelope = Envelope {
                    from: frame.from,
                    to: frame.to,
                    payload: frame.payload,
                };
                if let Err(e) = mailbox.enqueue(envelope) {
                    warn!("Dropping inbound frame: {}", e);
                }
            }
            None => warn!("Dropping frame for unknown box {} from {}", frame.to, frame.from),
        }
    }
}

/// Route back to a sender; an unspecified `reply_to` IP is replaced by the connection's
fn reply_route(reply_to: SocketAddr, peer: SocketAddr) -> SocketAddr {
    if reply_to.ip().is_unspecified() {
        SocketAddr::new(peer.ip(), reply_to.port())
    } else {
        reply_to
    }
}

async fn accept_loop(inner: Arc<TcpInner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    tokio::spawn(read_loop(Arc::clone(&inner), stream, peer));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            }
        }
    }
    debug!("Accept loop on {} stopped", inner.local_addr);
}

async fn read_loop(inner: Arc<TcpInner>, stream: TcpStream, peer: SocketAddr) {
    let mut frames = FramedRead::new(stream, LengthDelimitedCodec::new());

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = frames.next() => match next {
                Some(Ok(raw)) => inner.dispatch(raw.freeze(), peer),
                Some(Err(e)) => {
                    warn!("Read error from {}: {}", peer, e);
                    break;
                }
                None => break,
            }
        }
    }
    debug!("Connection from {} closed", peer);
}

async fn write_loop(inner: Arc<TcpInner>, address: SocketAddr, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    let stream = match TcpStream::connect(address).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}; dropping queued frames", address, e);
            metrics::counter!("transport_frames_dropped_total").increment(rx.len() as u64);
            drop(rx);
            inner.connections.remove_if(&address, |_, tx| tx.is_closed());
            return;
        }
    };
    let _ = stream.set_nodelay(true);

    let mut sink = FramedWrite::new(stream, LengthDelimitedCodec::new());

    // Frames queued before shutdown are flushed first
    loop {
        tokio::select! {
            biased;
            next = rx.recv() => match next {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!("Write to {} failed: {}", address, e);
                        break;
                    }
                }
                None => break,
            },
            _ = inner.shutdown.cancelled() => break,
        }
    }

    drop(rx);
    inner.connections.remove_if(&address, |_, tx| tx.is_closed());
    debug!("Writer for {} stopped", address);
}
