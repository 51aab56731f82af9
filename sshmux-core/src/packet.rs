//! Decrypted, de-framed packets and the primitives used to read and build
//! their bodies.
//!
//! The transport hands the channel layer one [`Packet`] per message: the
//! message tag plus the remaining payload. Integers are big-endian `u32`,
//! strings are `u32` length-prefixed byte sequences, booleans are one byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ChannelError;

/// One protocol message: a tag byte and its body.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    tag: u8,
    payload: Bytes,
}

impl Packet {
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// The message-type tag.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// The body following the tag.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// A cursor over the body. Cloning the payload is a reference-count bump.
    pub fn reader(&self) -> PacketReader {
        PacketReader {
            buf: self.payload.clone(),
        }
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("tag", &self.tag)
            .field("payload_length", &self.payload.len())
            .finish()
    }
}

// ── Reading ──────────────────────────────────────────────────────

/// Sequential reader over a packet body.
///
/// Every getter checks the remaining length first and returns
/// [`ChannelError::Malformed`] rather than panicking on truncated input.
#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    pub fn get_u8(&mut self) -> Result<u8, ChannelError> {
        if self.buf.remaining() < 1 {
            return Err(ChannelError::Malformed("truncated u8"));
        }
        Ok(self.buf.get_u8())
    }

    pub fn get_bool(&mut self) -> Result<bool, ChannelError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u32(&mut self) -> Result<u32, ChannelError> {
        if self.buf.remaining() < 4 {
            return Err(ChannelError::Malformed("truncated u32"));
        }
        Ok(self.buf.get_u32())
    }

    /// A length-prefixed byte string.
    pub fn get_string(&mut self) -> Result<Bytes, ChannelError> {
        let len = self.get_u32()? as usize;
        if len > self.buf.remaining() {
            return Err(ChannelError::Malformed("string length exceeds packet"));
        }
        Ok(self.buf.split_to(len))
    }

    /// A length-prefixed string that must be valid UTF-8 (request names,
    /// descriptions).
    pub fn get_utf8(&mut self) -> Result<String, ChannelError> {
        let raw = self.get_string()?;
        String::from_utf8(raw.to_vec()).map_err(|_| ChannelError::Malformed("invalid utf-8 string"))
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

// ── Building ─────────────────────────────────────────────────────

/// Builder for an outbound [`Packet`].
///
/// ```
/// use sshmux_core::packet::PacketBuilder;
///
/// let packet = PacketBuilder::new(93u8).put_u32(0).put_u32(65536).build();
/// assert_eq!(packet.payload(), &[0, 0, 0, 0, 0, 1, 0, 0]);
/// ```
#[derive(Debug)]
pub struct PacketBuilder {
    tag: u8,
    body: BytesMut,
}

impl PacketBuilder {
    pub fn new(tag: impl Into<u8>) -> Self {
        Self {
            tag: tag.into(),
            body: BytesMut::new(),
        }
    }

    pub fn put_u8(mut self, value: u8) -> Self {
        self.body.put_u8(value);
        self
    }

    pub fn put_bool(self, value: bool) -> Self {
        self.put_u8(u8::from(value))
    }

    pub fn put_u32(mut self, value: u32) -> Self {
        self.body.put_u32(value);
        self
    }

    /// Append a `u32` length prefix followed by the bytes.
    pub fn put_string(mut self, value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        self.body.put_u32(value.len() as u32);
        self.body.put_slice(value);
        self
    }

    /// Append bytes with no length prefix.
    pub fn put_raw(mut self, value: impl AsRef<[u8]>) -> Self {
        self.body.put_slice(value.as_ref());
        self
    }

    pub fn build(self) -> Packet {
        Packet {
            tag: self.tag,
            payload: self.body.freeze(),
        }
    }
}
