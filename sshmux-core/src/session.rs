//! The consumer-facing surface shared by both protocol generations.
//!
//! A terminal front end talks to a [`Session`] through [`ChannelLayer`] and
//! never needs to know which generation was negotiated. [`SessionHandle`]
//! makes one session shareable between the task that feeds inbound packets
//! ([`SessionHandle::pump`]) and whoever reads and writes channel data.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::ChannelId;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::event::ChannelEventReceiver;
use crate::packet::Packet;
use crate::protocol::{ChannelMultiplexer, LEGACY_CHANNEL, LegacyChannel};
use crate::transport::{PacketReceiver, PacketSink};

// ── ChannelLayer ─────────────────────────────────────────────────

/// Operations every channel layer offers its consumer.
///
/// Data arrival is announced through the event receiver handed out at
/// construction; the consumer then calls [`read`](ChannelLayer::read).
pub trait ChannelLayer {
    /// Open a channel. The legacy layer has a single implicit channel and
    /// always returns it.
    fn open(&mut self) -> Result<ChannelId, ChannelError>;

    fn write(&mut self, id: ChannelId, data: &[u8]) -> Result<(), ChannelError>;

    /// Remove up to `max` bytes from the channel's inbound buffer.
    fn read(&mut self, id: ChannelId, max: usize) -> Result<Bytes, ChannelError>;

    fn available(&self, id: ChannelId) -> Result<usize, ChannelError>;

    fn handle_packet(&mut self, packet: &Packet) -> Result<(), ChannelError>;
}

impl<S: PacketSink> ChannelLayer for ChannelMultiplexer<S> {
    fn open(&mut self) -> Result<ChannelId, ChannelError> {
        self.open_channel()
    }

    fn write(&mut self, id: ChannelId, data: &[u8]) -> Result<(), ChannelError> {
        self.write_data(id, data)
    }

    fn read(&mut self, id: ChannelId, max: usize) -> Result<Bytes, ChannelError> {
        self.read_data(id, max)
    }

    fn available(&self, id: ChannelId) -> Result<usize, ChannelError> {
        self.bytes_available(id)
    }

    fn handle_packet(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        ChannelMultiplexer::handle_packet(self, packet)
    }
}

fn legacy_only(id: ChannelId) -> Result<(), ChannelError> {
    if id == LEGACY_CHANNEL {
        Ok(())
    } else {
        Err(ChannelError::UnknownChannel(id.get()))
    }
}

impl<S: PacketSink> ChannelLayer for LegacyChannel<S> {
    fn open(&mut self) -> Result<ChannelId, ChannelError> {
        Ok(LEGACY_CHANNEL)
    }

    fn write(&mut self, id: ChannelId, data: &[u8]) -> Result<(), ChannelError> {
        legacy_only(id)?;
        self.write_data(data)
    }

    fn read(&mut self, id: ChannelId, max: usize) -> Result<Bytes, ChannelError> {
        legacy_only(id)?;
        Ok(self.read_data(max))
    }

    fn available(&self, id: ChannelId) -> Result<usize, ChannelError> {
        legacy_only(id)?;
        Ok(self.bytes_available())
    }

    fn handle_packet(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        LegacyChannel::handle_packet(self, packet)
    }
}

// ── ProtocolGeneration ───────────────────────────────────────────

/// Which channel layer a session runs, decided by version exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolGeneration {
    Ssh1,
    #[default]
    Ssh2,
}

impl fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh1 => write!(f, "SSH-1"),
            Self::Ssh2 => write!(f, "SSH-2"),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

pub enum Session<S> {
    Legacy(LegacyChannel<S>),
    Modern(ChannelMultiplexer<S>),
}

impl<S: PacketSink> Session<S> {
    /// Build the channel layer for `generation`.
    ///
    /// The legacy layer requests its pty immediately; the modern one waits
    /// for [`ChannelLayer::open`].
    pub fn negotiate(
        generation: ProtocolGeneration,
        sink: S,
        config: &ChannelConfig,
    ) -> Result<(Self, ChannelEventReceiver), ChannelError> {
        info!(%generation, "starting channel layer");
        match generation {
            ProtocolGeneration::Ssh1 => {
                let (legacy, events) = LegacyChannel::new(sink, &config.pty)?;
                Ok((Session::Legacy(legacy), events))
            }
            ProtocolGeneration::Ssh2 => {
                let (mux, events) = ChannelMultiplexer::new(sink, config.clone());
                Ok((Session::Modern(mux), events))
            }
        }
    }

    pub fn generation(&self) -> ProtocolGeneration {
        match self {
            Session::Legacy(_) => ProtocolGeneration::Ssh1,
            Session::Modern(_) => ProtocolGeneration::Ssh2,
        }
    }

    fn layer(&self) -> &dyn ChannelLayer {
        match self {
            Session::Legacy(legacy) => legacy,
            Session::Modern(mux) => mux,
        }
    }

    fn layer_mut(&mut self) -> &mut dyn ChannelLayer {
        match self {
            Session::Legacy(legacy) => legacy,
            Session::Modern(mux) => mux,
        }
    }
}

impl<S: PacketSink> ChannelLayer for Session<S> {
    fn open(&mut self) -> Result<ChannelId, ChannelError> {
        self.layer_mut().open()
    }

    fn write(&mut self, id: ChannelId, data: &[u8]) -> Result<(), ChannelError> {
        self.layer_mut().write(id, data)
    }

    fn read(&mut self, id: ChannelId, max: usize) -> Result<Bytes, ChannelError> {
        self.layer_mut().read(id, max)
    }

    fn available(&self, id: ChannelId) -> Result<usize, ChannelError> {
        self.layer().available(id)
    }

    fn handle_packet(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        self.layer_mut().handle_packet(packet)
    }
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cloneable, thread-safe access to one [`Session`].
///
/// Every call takes the lock for the duration of a single operation, so
/// consumer calls are serialized with packet handling.
pub struct SessionHandle<S> {
    inner: Arc<Mutex<Session<S>>>,
}

impl<S> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PacketSink> SessionHandle<S> {
    pub fn new(session: Session<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `f` with the session locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session<S>) -> R) -> Result<R, ChannelError> {
        let mut session = self.inner.lock()?;
        Ok(f(&mut *session))
    }

    pub fn generation(&self) -> Result<ProtocolGeneration, ChannelError> {
        self.with(|session| session.generation())
    }

    pub fn open(&self) -> Result<ChannelId, ChannelError> {
        self.with(|session| session.open())?
    }

    pub fn write(&self, id: ChannelId, data: &[u8]) -> Result<(), ChannelError> {
        self.with(|session| session.write(id, data))?
    }

    pub fn read(&self, id: ChannelId, max: usize) -> Result<Bytes, ChannelError> {
        self.with(|session| session.read(id, max))?
    }

    pub fn available(&self, id: ChannelId) -> Result<usize, ChannelError> {
        self.with(|session| session.available(id))?
    }

    pub fn handle_packet(&self, packet: &Packet) -> Result<(), ChannelError> {
        self.with(|session| session.handle_packet(packet))?
    }

    /// Feed inbound packets to the session in arrival order until the
    /// transport goes away.
    ///
    /// Errors confined to one channel or one packet are logged and the loop
    /// continues; only fatal errors end it early.
    pub async fn pump(&self, mut inbound: PacketReceiver) -> Result<(), ChannelError> {
        while let Some(packet) = inbound.recv().await {
            match self.handle_packet(&packet) {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    warn!(error = %err, "session pump stopped");
                    return Err(err);
                }
                Err(err) => warn!(tag = packet.tag(), error = %err, "packet rejected"),
            }
        }
        debug!("inbound transport closed");
        Ok(())
    }
}
