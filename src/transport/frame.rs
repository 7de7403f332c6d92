// src/transport/frame.rs
//! Binary frame layout for the TCP transport
//!
//! Frames travel inside a length-delimited stream, so the frame itself only
//! delimits its header fields:
//!
//! ```text
//! ┌────────┬──────┬────────┬────┬────────┬──────────┬─────────────┐
//! │ u16 n1 │ from │ u16 n2 │ to │ u16 n3 │ reply_to │ payload ... │
//! └────────┴──────┴────────┴────┴────────┴──────────┴─────────────┘
//! ```
//!
//! `reply_to` is the sender's listen address; receivers learn the route
//! back to `from` from it.

use crate::utils::errors::TransportError;
use crate::utils::ids::MessageBoxId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub from: MessageBoxId,
    pub to: MessageBoxId,
    pub reply_to: SocketAddr,
    pub payload: Bytes,
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, TransportError> {
        let reply_to = self.reply_to.to_string();
        let mut buf = BytesMut::with_capacity(
            6 + self.from.as_str().len() + self.to.as_str().len() + reply_to.len() + self.payload.len(),
        );

        put_field(&mut buf, self.from.as_str())?;
        put_field(&mut buf, self.to.as_str())?;
        put_field(&mut buf, &reply_to)?;
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, TransportError> {
        let from = MessageBoxId::new(take_field(&mut buf)?);
        let to = MessageBoxId::new(take_field(&mut buf)?);
        let reply_to = take_field(&mut buf)?
            .parse()
            .map_err(|e| TransportError::Codec(format!("bad reply address: {}", e)))?;

        Ok(Self {
            from,
            to,
            reply_to,
            payload: buf,
        })
    }
}

fn put_field(buf: &mut BytesMut, field: &str) -> Result<(), TransportError> {
    let len = u16::try_from(field.len())
        .map_err(|_| TransportError::Codec(format!("header field of {} bytes", field.len())))?;
    buf.put_u16(len);
    buf.put_slice(field.as_bytes());
    Ok(())
}

fn take_field(buf: &mut Bytes) -> Result<String, TransportError> {
    if buf.remaining() < 2 {
        return Err(TransportError::Codec("truncated frame header".into()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(TransportError::Codec("truncated frame header".into()));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|e| TransportError::Codec(e.to_string()))
}
