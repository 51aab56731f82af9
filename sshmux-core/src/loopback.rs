//! In-process peers that play the server side of a session.
//!
//! [`EchoPeer`] speaks SSH-2: it confirms session channels, grants pty and
//! shell requests, and echoes every byte back while honoring the client's
//! window and packet size. [`LegacyEchoPeer`] does the same for SSH-1.
//! [`spawn`] wires a [`SessionHandle`] to one of them over tokio channels.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::channel::ChannelId;
use crate::config::{ChannelConfig, WindowConfig};
use crate::dispatch::{MessageHandler, dispatch};
use crate::error::ChannelError;
use crate::event::ChannelEventReceiver;
use crate::message::{OpenFailureReason, Ssh1Message, Ssh2Message};
use crate::packet::{PacketBuilder, PacketReader};
use crate::protocol::SESSION_CHANNEL_TYPE;
use crate::session::{ProtocolGeneration, Session, SessionHandle};
use crate::transport::{PacketReceiver, PacketSender, PacketSink, packet_channel};

/// Added to the client's channel number to form the peer's, so tests catch
/// any mix-up between the two.
pub const PEER_CHANNEL_OFFSET: u32 = 100;

/// Ctrl-D. Ends the legacy echo shell.
const END_OF_TRANSMISSION: u8 = 0x04;

/// Feed `inbound` to `handler` until the stream ends or a fatal error occurs.
async fn serve<H: MessageHandler>(
    handler: &mut H,
    mut inbound: PacketReceiver,
) -> Result<(), ChannelError> {
    while let Some(packet) = inbound.recv().await {
        match dispatch(handler, &packet) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => warn!(tag = packet.tag(), error = %err, "peer rejected packet"),
        }
    }
    Ok(())
}

// ── EchoPeer ─────────────────────────────────────────────────────

#[derive(Debug)]
struct PeerChannel {
    client_id: u32,
    /// How much we may still send to the client.
    client_window: u32,
    client_packet_size: u32,
    /// How much the client may still send to us.
    window: u32,
    echo: VecDeque<Bytes>,
    eof_received: bool,
    finished: bool,
}

pub struct EchoPeer<S> {
    sink: S,
    window: WindowConfig,
    channels: HashMap<u32, PeerChannel>,
    max_channels: Option<usize>,
    exit_code: u32,
}

impl<S: PacketSink> EchoPeer<S> {
    /// `window` is what the peer advertises for its own receive side.
    pub fn new(sink: S, window: WindowConfig) -> Self {
        Self {
            sink,
            window,
            channels: HashMap::new(),
            max_channels: None,
            exit_code: 0,
        }
    }

    /// Refuse opens beyond `max` concurrent channels with
    /// [`OpenFailureReason::ResourceShortage`].
    pub fn with_max_channels(mut self, max: usize) -> Self {
        self.max_channels = Some(max);
        self
    }

    /// Exit status reported when the client sends EOF.
    pub fn with_exit_code(mut self, code: u32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn serve(mut self, inbound: PacketReceiver) -> Result<(), ChannelError> {
        serve(&mut self, inbound).await
    }

    fn channel(&mut self, raw: u32) -> Result<&mut PeerChannel, ChannelError> {
        self.channels
            .get_mut(&raw)
            .ok_or(ChannelError::UnknownChannel(raw))
    }

    fn refuse(&mut self, sender: u32, reason: OpenFailureReason, text: &str) -> Result<(), ChannelError> {
        warn!(sender, %reason, text, "peer refusing channel");
        let failure = PacketBuilder::new(Ssh2Message::ChannelOpenFailure)
            .put_u32(sender)
            .put_u32(reason.into())
            .put_string(text)
            .put_string("en")
            .build();
        self.sink.send_packet(failure)
    }

    fn on_open(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let kind = body.get_utf8()?;
        let sender = body.get_u32()?;
        let client_window = body.get_u32()?;
        let client_packet_size = body.get_u32()?;

        if kind != SESSION_CHANNEL_TYPE {
            return self.refuse(sender, OpenFailureReason::UnknownChannelType, "unknown channel type");
        }
        if self.max_channels.is_some_and(|max| self.channels.len() >= max) {
            return self.refuse(sender, OpenFailureReason::ResourceShortage, "too many sessions");
        }
        let Some(local) = sender.checked_add(PEER_CHANNEL_OFFSET) else {
            return self.refuse(sender, OpenFailureReason::ResourceShortage, "channel number exhausted");
        };

        self.channels.insert(
            local,
            PeerChannel {
                client_id: sender,
                client_window,
                client_packet_size,
                window: self.window.initial_window,
                echo: VecDeque::new(),
                eof_received: false,
                finished: false,
            },
        );
        let confirmation = PacketBuilder::new(Ssh2Message::ChannelOpenConfirmation)
            .put_u32(sender)
            .put_u32(local)
            .put_u32(self.window.initial_window)
            .put_u32(self.window.packet_size)
            .build();
        self.sink.send_packet(confirmation)?;
        debug!(client = sender, peer = local, "peer confirmed channel");
        Ok(())
    }

    fn on_request(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let raw = body.get_u32()?;
        let name = body.get_utf8()?;
        let want_reply = body.get_bool()?;
        let client_id = self.channel(raw)?.client_id;
        debug!(channel = raw, request = %name, want_reply, "peer got request");
        if want_reply {
            let tag = match name.as_str() {
                "pty-req" | "shell" => Ssh2Message::ChannelSuccess,
                _ => Ssh2Message::ChannelFailure,
            };
            self.sink
                .send_packet(PacketBuilder::new(tag).put_u32(client_id).build())?;
        }
        Ok(())
    }

    fn on_data(&mut self, raw: u32, data: Bytes) -> Result<(), ChannelError> {
        let threshold = self.window.initial_window / 2;
        let initial = self.window.initial_window;
        let channel = self.channel(raw)?;
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let Some(window) = channel.window.checked_sub(len) else {
            return Err(ChannelError::ProtocolViolation {
                channel: ChannelId::new(raw),
                reason: "client overran the peer window",
            });
        };
        channel.window = window;
        channel.echo.push_back(data);

        let client_id = channel.client_id;
        let adjust = (channel.window < threshold).then(|| {
            let increment = initial - channel.window;
            channel.window = initial;
            increment
        });
        if let Some(increment) = adjust {
            let packet = PacketBuilder::new(Ssh2Message::ChannelWindowAdjust)
                .put_u32(client_id)
                .put_u32(increment)
                .build();
            self.sink.send_packet(packet)?;
            trace!(channel = raw, increment, "peer replenished its window");
        }
        self.flush(raw)
    }

    /// Echo what the client window allows, then finish the channel if the
    /// client has sent EOF and everything was echoed.
    fn flush(&mut self, raw: u32) -> Result<(), ChannelError> {
        let exit_code = self.exit_code;
        let channel = self
            .channels
            .get_mut(&raw)
            .ok_or(ChannelError::UnknownChannel(raw))?;
        while let Some(front) = channel.echo.front_mut() {
            let limit = channel.client_packet_size.min(channel.client_window) as usize;
            let size = front.len().min(limit);
            if size == 0 {
                break;
            }
            let chunk = if size == front.len() {
                channel.echo.pop_front().unwrap_or_default()
            } else {
                front.split_to(size)
            };
            channel.client_window -= size as u32;
            let data = PacketBuilder::new(Ssh2Message::ChannelData)
                .put_u32(channel.client_id)
                .put_string(&chunk)
                .build();
            self.sink.send_packet(data)?;
        }

        if channel.eof_received && channel.echo.is_empty() && !channel.finished {
            channel.finished = true;
            let client = channel.client_id;
            let status = PacketBuilder::new(Ssh2Message::ChannelRequest)
                .put_u32(client)
                .put_string("exit-status")
                .put_bool(false)
                .put_u32(exit_code)
                .build();
            self.sink.send_packet(status)?;
            self.sink
                .send_packet(PacketBuilder::new(Ssh2Message::ChannelEof).put_u32(client).build())?;
            self.sink
                .send_packet(PacketBuilder::new(Ssh2Message::ChannelClose).put_u32(client).build())?;
            info!(channel = raw, exit_code, "peer finished channel");
        }
        Ok(())
    }
}

impl<S: PacketSink> MessageHandler for EchoPeer<S> {
    type Message = Ssh2Message;

    fn on_message(
        &mut self,
        message: Ssh2Message,
        body: &mut PacketReader,
    ) -> Result<(), ChannelError> {
        match message {
            Ssh2Message::ChannelOpen => self.on_open(body),
            Ssh2Message::ChannelRequest => self.on_request(body),
            Ssh2Message::ChannelData => {
                let raw = body.get_u32()?;
                let data = body.get_string()?;
                self.on_data(raw, data)
            }
            Ssh2Message::ChannelWindowAdjust => {
                let raw = body.get_u32()?;
                let increment = body.get_u32()?;
                let channel = self.channel(raw)?;
                channel.client_window = channel.client_window.saturating_add(increment);
                self.flush(raw)
            }
            Ssh2Message::ChannelEof => {
                let raw = body.get_u32()?;
                self.channel(raw)?.eof_received = true;
                self.flush(raw)
            }
            Ssh2Message::ChannelClose => {
                let raw = body.get_u32()?;
                let channel = self.channel(raw)?;
                channel.echo.clear();
                if !channel.finished {
                    channel.finished = true;
                    let client = channel.client_id;
                    self.sink.send_packet(
                        PacketBuilder::new(Ssh2Message::ChannelClose)
                            .put_u32(client)
                            .build(),
                    )?;
                }
                debug!(channel = raw, "peer channel closed");
                Ok(())
            }
            other => {
                debug!(kind = ?other, "peer ignoring message");
                Ok(())
            }
        }
    }
}

// ── LegacyEchoPeer ───────────────────────────────────────────────

pub struct LegacyEchoPeer<S> {
    sink: S,
    grant_pty: bool,
    exited: bool,
}

impl<S: PacketSink> LegacyEchoPeer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            grant_pty: true,
            exited: false,
        }
    }

    /// Answer the pty request with FAILURE instead of SUCCESS.
    pub fn refusing_pty(mut self) -> Self {
        self.grant_pty = false;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn serve(mut self, inbound: PacketReceiver) -> Result<(), ChannelError> {
        serve(&mut self, inbound).await
    }

    fn on_stdin(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let data = body.get_string()?;
        if self.exited {
            debug!(len = data.len(), "stdin after exit dropped");
            return Ok(());
        }
        let (echo, exit) = match data.iter().position(|&b| b == END_OF_TRANSMISSION) {
            Some(at) => (data.slice(..at), true),
            None => (data, false),
        };
        if !echo.is_empty() {
            let stdout = PacketBuilder::new(Ssh1Message::SmsgStdoutData)
                .put_string(&echo)
                .build();
            self.sink.send_packet(stdout)?;
        }
        if exit {
            self.exited = true;
            let status = PacketBuilder::new(Ssh1Message::SmsgExitStatus)
                .put_u32(0)
                .build();
            self.sink.send_packet(status)?;
            info!("legacy peer shell exited");
        }
        Ok(())
    }
}

impl<S: PacketSink> MessageHandler for LegacyEchoPeer<S> {
    type Message = Ssh1Message;

    fn on_message(
        &mut self,
        message: Ssh1Message,
        body: &mut PacketReader,
    ) -> Result<(), ChannelError> {
        match message {
            Ssh1Message::CmsgRequestPty => {
                let term = body.get_utf8()?;
                let rows = body.get_u32()?;
                let cols = body.get_u32()?;
                debug!(%term, rows, cols, grant = self.grant_pty, "legacy peer got pty request");
                let reply = if self.grant_pty {
                    Ssh1Message::SmsgSuccess
                } else {
                    Ssh1Message::SmsgFailure
                };
                self.sink.send_packet(PacketBuilder::new(reply).build())
            }
            Ssh1Message::CmsgStdinData => self.on_stdin(body),
            Ssh1Message::CmsgExitConfirmation => {
                debug!("legacy peer got exit confirmation");
                Ok(())
            }
            other => {
                debug!(kind = ?other, "legacy peer ignoring message");
                Ok(())
            }
        }
    }
}

// ── Wiring ───────────────────────────────────────────────────────

/// A session connected to an in-process echo peer.
pub struct Loopback {
    pub session: SessionHandle<PacketSender>,
    pub events: ChannelEventReceiver,
    pump: JoinHandle<Result<(), ChannelError>>,
    peer: JoinHandle<Result<(), ChannelError>>,
}

impl Loopback {
    /// Stop both background tasks.
    pub fn shutdown(self) {
        self.pump.abort();
        self.peer.abort();
    }
}

/// Start a session of `generation` against an echo peer advertising
/// `peer_window`. Must be called within a tokio runtime.
pub fn spawn(
    generation: ProtocolGeneration,
    config: &ChannelConfig,
    peer_window: WindowConfig,
) -> Result<Loopback, ChannelError> {
    if generation == ProtocolGeneration::Ssh2 {
        config.window.validate()?;
        peer_window.validate()?;
    }
    let (to_peer, peer_inbound) = packet_channel();
    let (to_client, client_inbound) = packet_channel();

    let peer = match generation {
        ProtocolGeneration::Ssh1 => tokio::spawn(LegacyEchoPeer::new(to_client).serve(peer_inbound)),
        ProtocolGeneration::Ssh2 => {
            tokio::spawn(EchoPeer::new(to_client, peer_window).serve(peer_inbound))
        }
    };

    let (session, events) = Session::negotiate(generation, to_peer, config)?;
    let session = SessionHandle::new(session);
    let pump = tokio::spawn({
        let session = session.clone();
        async move { session.pump(client_inbound).await }
    });

    Ok(Loopback {
        session,
        events,
        pump,
        peer,
    })
}
