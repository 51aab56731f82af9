//! SSH-2 channel multiplexing with per-channel flow control.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[CHANNEL_OPEN "session", id, window, packet]──────► Server
//! Server ──[OPEN_CONFIRMATION id, remote, window, packet]────► Client
//! Client ──[CHANNEL_REQUEST remote "pty-req" false …]───────► Server
//! Client ──[CHANNEL_REQUEST remote "shell" false]───────────► Server
//!
//! Client ◄─[CHANNEL_DATA id, data]──────────────────────────► Server
//! Client ◄─[WINDOW_ADJUST id, bytes]────────────────────────► Server
//! ```
//!
//! Inbound messages carry our channel number; outbound messages carry the
//! peer's. The multiplexer never lets either window go below zero: inbound
//! data beyond the local window closes the channel, outbound data beyond the
//! remote window waits in a per-channel queue until the peer adjusts.

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelFlags, ChannelId, ChannelTable};
use crate::config::ChannelConfig;
use crate::dispatch::{MessageHandler, dispatch};
use crate::error::ChannelError;
use crate::event::{ChannelEvent, ChannelEventReceiver, ChannelEventSender, event_channel};
use crate::message::{OpenFailureReason, Ssh2Message};
use crate::packet::{Packet, PacketBuilder, PacketReader};
use crate::state::ChannelPhase;
use crate::transport::PacketSink;

/// Channel type requested by [`ChannelMultiplexer::open_channel`].
pub const SESSION_CHANNEL_TYPE: &str = "session";

/// `data_type_code` of stderr in CHANNEL_EXTENDED_DATA.
pub const EXTENDED_DATA_STDERR: u32 = 1;

// ── ChannelMultiplexer ────────────────────────────────────────────

/// Owns every SSH-2 channel of one connection.
pub struct ChannelMultiplexer<S> {
    sink: S,
    table: ChannelTable,
    config: ChannelConfig,
    events: ChannelEventSender,
}

impl<S: PacketSink> ChannelMultiplexer<S> {
    /// Create a multiplexer writing to `sink`. The returned receiver yields
    /// a [`ChannelEvent`] for every change the consumer should react to.
    pub fn new(sink: S, config: ChannelConfig) -> (Self, ChannelEventReceiver) {
        let (events, rx) = event_channel();
        let mux = Self {
            sink,
            table: ChannelTable::new(),
            config,
            events,
        };
        (mux, rx)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn channel(&self, id: ChannelId) -> Result<&Channel, ChannelError> {
        self.table.get(id.get())
    }

    pub fn channel_count(&self) -> usize {
        self.table.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    // ── Consumer operations ───────────────────────────────────────

    /// Allocate the next channel and ask the peer to open it.
    ///
    /// Returns immediately; [`ChannelEvent::Opened`] or
    /// [`ChannelEvent::OpenFailed`] follows once the peer answers.
    pub fn open_channel(&mut self) -> Result<ChannelId, ChannelError> {
        let window = &self.config.window;
        window.validate()?;
        let id = self.table.allocate(window)?;
        let open = PacketBuilder::new(Ssh2Message::ChannelOpen)
            .put_string(SESSION_CHANNEL_TYPE)
            .put_u32(id.get())
            .put_u32(window.initial_window)
            .put_u32(window.packet_size)
            .build();
        self.sink.send_packet(open)?;
        debug!(
            channel = %id,
            window = window.initial_window,
            packet_size = window.packet_size,
            "channel open requested"
        );
        Ok(id)
    }

    /// Send `data` on channel `id`.
    ///
    /// Whatever the remote window cannot take right now is queued and sent
    /// after the next window adjust; nothing is dropped. Writes issued before
    /// the open is confirmed are queued too.
    pub fn write_data(&mut self, id: ChannelId, data: &[u8]) -> Result<(), ChannelError> {
        let channel = self.table.get_mut(id.get())?;
        if let ChannelPhase::Failed {
            reason,
            description,
        } = channel.phase()
        {
            return Err(ChannelError::OpenFailed {
                channel: id,
                reason: *reason,
                description: description.clone(),
            });
        }
        if channel.is_closed() {
            return Err(ChannelError::ChannelClosed(id));
        }
        if channel
            .flags()
            .intersects(ChannelFlags::EOF_QUEUED | ChannelFlags::EOF_SENT)
        {
            return Err(ChannelError::EofSent(id));
        }
        channel.queue(Bytes::copy_from_slice(data));
        self.flush(id)
    }

    /// Remove and return up to `max` buffered bytes. Never blocks; returns
    /// an empty buffer when nothing is available.
    pub fn read_data(&mut self, id: ChannelId, max: usize) -> Result<Bytes, ChannelError> {
        Ok(self.table.get_mut(id.get())?.read(max))
    }

    pub fn bytes_available(&self, id: ChannelId) -> Result<usize, ChannelError> {
        Ok(self.table.get(id.get())?.available())
    }

    /// Signal that no more data will be written. EOF goes out after any
    /// queued writes.
    pub fn send_eof(&mut self, id: ChannelId) -> Result<(), ChannelError> {
        let channel = self.table.get_mut(id.get())?;
        if channel.is_closed() {
            return Err(ChannelError::ChannelClosed(id));
        }
        if !channel.phase().is_open() {
            return Err(ChannelError::NotOpen(id));
        }
        if channel
            .flags()
            .intersects(ChannelFlags::EOF_QUEUED | ChannelFlags::EOF_SENT)
        {
            return Ok(());
        }
        channel.flags_mut().insert(ChannelFlags::EOF_QUEUED);
        self.flush(id)
    }

    /// Close the channel from our side. Queued writes are discarded.
    pub fn close_channel(&mut self, id: ChannelId) -> Result<(), ChannelError> {
        let channel = self.table.get_mut(id.get())?;
        if channel.flags().contains(ChannelFlags::CLOSE_SENT) {
            return Ok(());
        }
        let Some(remote) = channel.remote_id() else {
            return Err(ChannelError::NotOpen(id));
        };
        let dropped = channel.discard_pending();
        if dropped > 0 {
            warn!(channel = %id, dropped, "discarding queued writes on close");
        }
        channel.flags_mut().insert(ChannelFlags::CLOSE_SENT);
        self.sink.send_packet(close_packet(remote))?;
        debug!(channel = %id, "close sent");
        Ok(())
    }

    /// Process one inbound packet.
    pub fn handle_packet(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        dispatch(self, packet)
    }

    // ── Internals ─────────────────────────────────────────────────

    fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    /// Map a recipient number from the wire to a table entry.
    fn resolve(&self, raw: u32) -> Result<ChannelId, ChannelError> {
        self.table
            .get(raw)
            .map(Channel::local_id)
            .inspect_err(|_| warn!(channel = raw, "message for unknown channel"))
    }

    /// Transmit as much queued data as the remote window allows, then a
    /// pending EOF if the queue drained.
    fn flush(&mut self, id: ChannelId) -> Result<(), ChannelError> {
        let channel = self.table.get_mut(id.get())?;
        let Some(remote) = channel.remote_id() else {
            return Ok(());
        };
        while let Some(chunk) = channel.next_sendable() {
            let data = PacketBuilder::new(Ssh2Message::ChannelData)
                .put_u32(remote)
                .put_string(&chunk)
                .build();
            self.sink.send_packet(data)?;
        }

        let pending = channel.pending_bytes();
        if pending > 0 {
            debug!(
                channel = %id,
                pending,
                remote_window = channel.remote_window(),
                "write waiting for window adjust"
            );
        } else if channel.flags().contains(ChannelFlags::EOF_QUEUED)
            && !channel.flags().contains(ChannelFlags::EOF_SENT)
            && !channel.is_closed()
        {
            channel.flags_mut().insert(ChannelFlags::EOF_SENT);
            let eof = PacketBuilder::new(Ssh2Message::ChannelEof)
                .put_u32(remote)
                .build();
            self.sink.send_packet(eof)?;
            debug!(channel = %id, "eof sent");
        }
        Ok(())
    }

    /// Close `id` after the peer broke the protocol on it and report the
    /// violation both as an event and as the returned error.
    fn violation(&mut self, id: ChannelId, err: ChannelError) -> Result<(), ChannelError> {
        warn!(channel = %id, error = %err, "protocol violation; closing channel");
        if let Ok(channel) = self.table.get_mut(id.get()) {
            let dropped = channel.discard_pending();
            if dropped > 0 {
                warn!(channel = %id, dropped, "discarding queued writes");
            }
            channel.phase_mut().force_close();
            let remote = channel.remote_id();
            if let Some(remote) = remote.filter(|_| !channel.flags().contains(ChannelFlags::CLOSE_SENT)) {
                channel.flags_mut().insert(ChannelFlags::CLOSE_SENT);
                self.sink.send_packet(close_packet(remote))?;
            }
        }
        self.emit(ChannelEvent::ProtocolViolation {
            channel: id,
            reason: err.to_string(),
        });
        Err(err)
    }

    /// Request a pty and start a shell. Neither asks for a reply.
    fn request_shell(&mut self, remote: u32) -> Result<(), ChannelError> {
        let pty = &self.config.pty;
        let pty_req = PacketBuilder::new(Ssh2Message::ChannelRequest)
            .put_u32(remote)
            .put_string("pty-req")
            .put_bool(false)
            .put_string(&pty.term)
            .put_u32(pty.cols)
            .put_u32(pty.rows)
            .put_u32(pty.width_px)
            .put_u32(pty.height_px)
            .put_string(&pty.modes)
            .build();
        self.sink.send_packet(pty_req)?;

        let shell = PacketBuilder::new(Ssh2Message::ChannelRequest)
            .put_u32(remote)
            .put_string("shell")
            .put_bool(false)
            .build();
        self.sink.send_packet(shell)
    }

    // ── Inbound handlers ──────────────────────────────────────────

    fn on_open_confirmation(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let raw = body.get_u32()?;
        let remote_id = body.get_u32()?;
        let remote_window = body.get_u32()?;
        let remote_packet_size = body.get_u32()?;

        let Ok(channel) = self.table.get_mut(raw) else {
            warn!(channel = raw, "open confirmation for unknown channel ignored");
            return Ok(());
        };
        let id = channel.local_id();
        if let Err(err) = channel.confirm(remote_id, remote_window, remote_packet_size) {
            return self.violation(id, err);
        }
        info!(
            channel = %id,
            remote_id,
            local_window = channel.local_window(),
            remote_window,
            local_packet_size = channel.local_packet_size(),
            remote_packet_size,
            "channel opened"
        );
        self.emit(ChannelEvent::Opened(id));
        self.request_shell(remote_id)?;
        self.flush(id)
    }

    fn on_open_failure(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let raw = body.get_u32()?;
        let reason = OpenFailureReason::from(body.get_u32()?);
        let description = String::from_utf8_lossy(&body.get_string()?).into_owned();
        // Some servers omit the language tag.
        if !body.is_empty() {
            body.get_string()?;
        }

        let id = self.resolve(raw)?;
        let channel = self.table.get_mut(raw)?;
        if let Err(reason) = channel.phase_mut().fail(reason, description.clone()) {
            return self.violation(
                id,
                ChannelError::ProtocolViolation {
                    channel: id,
                    reason,
                },
            );
        }
        let dropped = channel.discard_pending();
        warn!(channel = %id, %reason, %description, dropped, "channel open failed");
        self.emit(ChannelEvent::OpenFailed {
            channel: id,
            reason,
            description,
        });
        Ok(())
    }

    fn on_window_adjust(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let raw = body.get_u32()?;
        let increment = body.get_u32()?;

        let id = self.resolve(raw)?;
        let channel = self.table.get_mut(raw)?;
        if channel.phase().is_opening() {
            return self.violation(
                id,
                ChannelError::ProtocolViolation {
                    channel: id,
                    reason: "window adjust before open confirmation",
                },
            );
        }
        if let Err(err) = channel.grow_remote_window(increment) {
            return self.violation(id, err);
        }
        debug!(
            channel = %id,
            increment,
            remote_window = channel.remote_window(),
            "remote window adjusted"
        );
        self.flush(id)
    }

    /// DATA and EXTENDED_DATA. Once the recipient is known, a body that
    /// does not decode is a violation on that channel.
    fn on_data(&mut self, body: &mut PacketReader, extended: bool) -> Result<(), ChannelError> {
        let raw = body.get_u32()?;
        let id = self.resolve(raw)?;
        let data = match data_payload(raw, body, extended) {
            Ok(data) => data,
            Err(err) => return self.violation(id, err),
        };

        let channel = self.table.get_mut(raw)?;
        let flags = channel.flags();
        if flags.contains(ChannelFlags::CLOSE_SENT) && !flags.contains(ChannelFlags::CLOSE_RECEIVED) {
            // In flight before the peer saw our CLOSE.
            trace!(channel = %id, len = data.len(), "data after local close dropped");
            return Ok(());
        }
        if let Err(err) = channel.accept_data(&data) {
            return self.violation(id, err);
        }
        let adjust = channel.replenish();
        let remote = channel.remote_id();
        trace!(
            channel = %id,
            len = data.len(),
            local_window = channel.local_window(),
            "data received"
        );

        if let (Some(increment), Some(remote)) = (adjust, remote) {
            let packet = PacketBuilder::new(Ssh2Message::ChannelWindowAdjust)
                .put_u32(remote)
                .put_u32(increment)
                .build();
            self.sink.send_packet(packet)?;
            debug!(channel = %id, increment, "local window replenished");
        }
        self.emit(ChannelEvent::DataReady(id));
        Ok(())
    }

    fn on_eof(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let raw = body.get_u32()?;
        let id = self.resolve(raw)?;
        let channel = self.table.get_mut(raw)?;
        if channel.phase().is_opening() {
            return self.violation(
                id,
                ChannelError::ProtocolViolation {
                    channel: id,
                    reason: "eof before open confirmation",
                },
            );
        }
        channel.flags_mut().insert(ChannelFlags::EOF_RECEIVED);
        debug!(channel = %id, "eof received");
        self.emit(ChannelEvent::Eof(id));
        Ok(())
    }

    fn on_close(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let raw = body.get_u32()?;
        let id = self.resolve(raw)?;
        let channel = self.table.get_mut(raw)?;
        channel.flags_mut().insert(ChannelFlags::CLOSE_RECEIVED);
        if channel.phase_mut().close().is_err() {
            channel.phase_mut().force_close();
        }
        let dropped = channel.discard_pending();
        if dropped > 0 {
            warn!(channel = %id, dropped, "peer closed channel with writes still queued");
        }
        let reply = channel
            .remote_id()
            .filter(|_| !channel.flags().contains(ChannelFlags::CLOSE_SENT));
        if let Some(remote) = reply {
            channel.flags_mut().insert(ChannelFlags::CLOSE_SENT);
            self.sink.send_packet(close_packet(remote))?;
        }
        debug!(channel = %id, "channel closed");
        self.emit(ChannelEvent::Closed(id));
        Ok(())
    }

    fn on_request(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let raw = body.get_u32()?;
        let name = body.get_utf8()?;
        let want_reply = body.get_bool()?;
        let id = self.resolve(raw)?;

        let understood = match name.as_str() {
            "exit-status" => {
                let code = body.get_u32()?;
                info!(channel = %id, code, "remote command exited");
                self.emit(ChannelEvent::ExitStatus { channel: id, code });
                true
            }
            "exit-signal" => {
                let signal = body.get_utf8()?;
                let core_dumped = body.get_bool()?;
                info!(channel = %id, %signal, core_dumped, "remote command killed by signal");
                self.emit(ChannelEvent::ExitSignal { channel: id, signal });
                true
            }
            other => {
                debug!(channel = %id, request = other, want_reply, "ignoring channel request");
                false
            }
        };

        if want_reply {
            let Some(remote) = self.table.get(raw)?.remote_id() else {
                return self.violation(
                    id,
                    ChannelError::ProtocolViolation {
                        channel: id,
                        reason: "request before open confirmation",
                    },
                );
            };
            let tag = if understood {
                Ssh2Message::ChannelSuccess
            } else {
                Ssh2Message::ChannelFailure
            };
            self.sink
                .send_packet(PacketBuilder::new(tag).put_u32(remote).build())?;
        }
        Ok(())
    }

    /// We never accept channels opened by the peer.
    fn on_peer_open(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let kind = String::from_utf8_lossy(&body.get_string()?).into_owned();
        let sender = body.get_u32()?;
        warn!(kind = %kind, sender, "refusing peer-initiated channel");
        let refusal = PacketBuilder::new(Ssh2Message::ChannelOpenFailure)
            .put_u32(sender)
            .put_u32(OpenFailureReason::AdministrativelyProhibited.into())
            .put_string("channel open not supported")
            .put_string("")
            .build();
        self.sink.send_packet(refusal)
    }
}

impl<S: PacketSink> MessageHandler for ChannelMultiplexer<S> {
    type Message = Ssh2Message;

    fn on_message(
        &mut self,
        message: Ssh2Message,
        body: &mut PacketReader,
    ) -> Result<(), ChannelError> {
        match message {
            Ssh2Message::ChannelOpen => self.on_peer_open(body),
            Ssh2Message::ChannelOpenConfirmation => self.on_open_confirmation(body),
            Ssh2Message::ChannelOpenFailure => self.on_open_failure(body),
            Ssh2Message::ChannelWindowAdjust => self.on_window_adjust(body),
            Ssh2Message::ChannelData => self.on_data(body, false),
            Ssh2Message::ChannelExtendedData => self.on_data(body, true),
            Ssh2Message::ChannelEof => self.on_eof(body),
            Ssh2Message::ChannelClose => self.on_close(body),
            Ssh2Message::ChannelRequest => self.on_request(body),
            Ssh2Message::ChannelSuccess | Ssh2Message::ChannelFailure => {
                let raw = body.get_u32()?;
                debug!(channel = raw, reply = ?message, "request reply");
                Ok(())
            }
        }
    }
}

/// The payload of a DATA or EXTENDED_DATA body after the recipient.
fn data_payload(raw: u32, body: &mut PacketReader, extended: bool) -> Result<Bytes, ChannelError> {
    if extended {
        let code = body.get_u32()?;
        if code != EXTENDED_DATA_STDERR {
            debug!(channel = raw, code, "extended data of unknown type");
        }
    }
    body.get_string()
}

fn close_packet(remote: u32) -> Packet {
    PacketBuilder::new(Ssh2Message::ChannelClose)
        .put_u32(remote)
        .build()
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use crate::event::ChannelEventReceiver;

    type Mux = ChannelMultiplexer<Vec<Packet>>;

    fn mux_with(window: WindowConfig) -> (Mux, ChannelEventReceiver) {
        ChannelMultiplexer::new(
            Vec::new(),
            ChannelConfig {
                window,
                ..Default::default()
            },
        )
    }

    fn confirmation(local: u32, remote: u32, window: u32, packet: u32) -> Packet {
        PacketBuilder::new(Ssh2Message::ChannelOpenConfirmation)
            .put_u32(local)
            .put_u32(remote)
            .put_u32(window)
            .put_u32(packet)
            .build()
    }

    fn data(local: u32, bytes: &[u8]) -> Packet {
        PacketBuilder::new(Ssh2Message::ChannelData)
            .put_u32(local)
            .put_string(bytes)
            .build()
    }

    fn adjust(local: u32, bytes: u32) -> Packet {
        PacketBuilder::new(Ssh2Message::ChannelWindowAdjust)
            .put_u32(local)
            .put_u32(bytes)
            .build()
    }

    /// Open channel 0 and confirm it as remote channel 100.
    fn opened(window: WindowConfig, remote_window: u32, remote_packet: u32) -> (Mux, ChannelEventReceiver) {
        let (mut mux, mut rx) = mux_with(window);
        let id = mux.open_channel().unwrap();
        mux.handle_packet(&confirmation(id.get(), 100, remote_window, remote_packet))
            .unwrap();
        mux.sink_mut().clear();
        while rx.try_recv().is_ok() {}
        (mux, rx)
    }

    fn tags(mux: &Mux) -> Vec<u8> {
        mux.sink().iter().map(Packet::tag).collect()
    }

    #[test]
    fn open_assigns_sequential_ids_and_sends_open() {
        let (mut mux, _rx) = mux_with(WindowConfig::default());
        for expected in 0..4 {
            assert_eq!(mux.open_channel().unwrap(), ChannelId::new(expected));
        }
        assert_eq!(mux.channel_count(), 4);

        let open = &mux.sink()[2];
        assert_eq!(open.tag(), Ssh2Message::ChannelOpen as u8);
        let mut r = open.reader();
        assert_eq!(r.get_utf8().unwrap(), "session");
        assert_eq!(r.get_u32().unwrap(), 2);
        assert_eq!(r.get_u32().unwrap(), 131_072);
        assert_eq!(r.get_u32().unwrap(), 32_768);
        assert!(r.is_empty());
    }

    #[test]
    fn open_with_zero_packet_size_is_refused() {
        let (mut mux, _rx) = mux_with(WindowConfig::new(1024, 0));
        assert!(matches!(
            mux.open_channel(),
            Err(ChannelError::InvalidConfig(_))
        ));
        assert_eq!(mux.channel_count(), 0);
        assert!(mux.sink().is_empty());
    }

    #[test]
    fn confirmation_requests_pty_then_shell() {
        let (mut mux, mut rx) = mux_with(WindowConfig::default());
        let id = mux.open_channel().unwrap();
        mux.sink_mut().clear();

        mux.handle_packet(&confirmation(0, 100, 65_536, 16_384)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::Opened(id));

        let ch = mux.channel(id).unwrap();
        assert_eq!(ch.remote_id(), Some(100));
        assert_eq!(ch.remote_window(), 65_536);
        assert_eq!(ch.remote_packet_size(), 16_384);

        assert_eq!(tags(&mux), vec![98, 98]);
        let mut pty = mux.sink()[0].reader();
        assert_eq!(pty.get_u32().unwrap(), 100);
        assert_eq!(pty.get_utf8().unwrap(), "pty-req");
        assert!(!pty.get_bool().unwrap());
        assert_eq!(pty.get_utf8().unwrap(), "vt100");
        assert_eq!(pty.get_u32().unwrap(), 80);
        assert_eq!(pty.get_u32().unwrap(), 24);
        assert_eq!(pty.get_u32().unwrap(), 0);
        assert_eq!(pty.get_u32().unwrap(), 0);
        assert!(pty.get_string().unwrap().is_empty());
        assert!(pty.is_empty());

        let mut shell = mux.sink()[1].reader();
        assert_eq!(shell.get_u32().unwrap(), 100);
        assert_eq!(shell.get_utf8().unwrap(), "shell");
        assert!(!shell.get_bool().unwrap());
    }

    #[test]
    fn confirmation_for_unknown_channel_is_ignored() {
        let (mut mux, mut rx) = mux_with(WindowConfig::default());
        mux.open_channel().unwrap();
        mux.sink_mut().clear();
        mux.handle_packet(&confirmation(5, 1, 1024, 1024)).unwrap();
        assert!(mux.sink().is_empty());
        assert!(rx.try_recv().is_err());
        assert!(mux.channel(ChannelId::new(0)).unwrap().phase().is_opening());
    }

    #[test]
    fn write_within_window_decrements_remote_window() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 65_536, 16_384);
        let id = ChannelId::new(0);
        mux.write_data(id, &[b'a'; 1000]).unwrap();

        assert_eq!(mux.channel(id).unwrap().remote_window(), 64_536);
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelData as u8]);
        let mut r = mux.sink()[0].reader();
        assert_eq!(r.get_u32().unwrap(), 100);
        assert_eq!(r.get_string().unwrap().len(), 1000);
    }

    #[test]
    fn write_beyond_window_waits_for_adjust() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 500, 16_384);
        let id = ChannelId::new(0);
        mux.write_data(id, &[b'z'; 800]).unwrap();

        // The open part of the window goes out now, the rest waits.
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelData as u8]);
        let ch = mux.channel(id).unwrap();
        assert_eq!(ch.remote_window(), 0);
        assert_eq!(ch.pending_bytes(), 300);

        mux.sink_mut().clear();
        mux.handle_packet(&adjust(0, 300)).unwrap();
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelData as u8]);
        let ch = mux.channel(id).unwrap();
        assert_eq!(ch.remote_window(), 0);
        assert_eq!(ch.pending_bytes(), 0);
    }

    #[test]
    fn window_smaller_than_peer_packet_is_used() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 1000, 4096);
        let id = ChannelId::new(0);
        mux.write_data(id, &[1u8; 2000]).unwrap();

        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelData as u8]);
        let mut r = mux.sink()[0].reader();
        assert_eq!(r.get_u32().unwrap(), 100);
        assert_eq!(r.get_string().unwrap().len(), 1000);
        let ch = mux.channel(id).unwrap();
        assert_eq!(ch.remote_window(), 0);
        assert_eq!(ch.pending_bytes(), 1000);
    }

    #[test]
    fn writes_are_split_at_remote_packet_size() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 10_000, 256);
        mux.write_data(ChannelId::new(0), &[1u8; 600]).unwrap();
        let lens: Vec<usize> = mux
            .sink()
            .iter()
            .map(|p| {
                let mut r = p.reader();
                r.get_u32().unwrap();
                r.get_string().unwrap().len()
            })
            .collect();
        assert_eq!(lens, vec![256, 256, 88]);
        assert_eq!(mux.channel(ChannelId::new(0)).unwrap().remote_window(), 9_400);
    }

    #[test]
    fn write_before_confirmation_is_flushed_after_shell_request() {
        let (mut mux, _rx) = mux_with(WindowConfig::default());
        let id = mux.open_channel().unwrap();
        mux.write_data(id, b"ls\n").unwrap();
        assert_eq!(mux.channel(id).unwrap().pending_bytes(), 3);

        mux.sink_mut().clear();
        mux.handle_packet(&confirmation(0, 9, 1024, 1024)).unwrap();
        assert_eq!(tags(&mux), vec![98, 98, 94]);
        assert_eq!(mux.channel(id).unwrap().remote_window(), 1021);
    }

    #[test]
    fn data_is_buffered_and_announced() {
        let (mut mux, mut rx) = opened(WindowConfig::default(), 0, 1);
        let id = ChannelId::new(0);
        mux.handle_packet(&data(0, b"hello")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::DataReady(id));
        assert_eq!(mux.bytes_available(id).unwrap(), 5);
        assert_eq!(mux.channel(id).unwrap().local_window(), 131_072 - 5);
        assert!(mux.sink().is_empty());
    }

    #[test]
    fn data_below_threshold_triggers_window_adjust() {
        let (mut mux, _rx) = opened(WindowConfig::new(40_000, 32_768), 0, 1);
        mux.handle_packet(&data(0, &[0u8; 10_000])).unwrap();

        assert_eq!(mux.channel(ChannelId::new(0)).unwrap().local_window(), 95_536);
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelWindowAdjust as u8]);
        let mut r = mux.sink()[0].reader();
        assert_eq!(r.get_u32().unwrap(), 100);
        assert_eq!(r.get_u32().unwrap(), 65_536);
    }

    #[test]
    fn oversized_data_closes_channel() {
        let (mut mux, mut rx) = opened(WindowConfig::new(1024, 512), 0, 1);
        let id = ChannelId::new(0);
        let err = mux.handle_packet(&data(0, &[0u8; 600])).unwrap_err();
        assert!(matches!(err, ChannelError::PacketTooLarge { len: 600, .. }));

        let ch = mux.channel(id).unwrap();
        assert_eq!(ch.local_window(), 1024);
        assert_eq!(ch.available(), 0);
        assert!(ch.is_closed());
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelClose as u8]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChannelEvent::ProtocolViolation { channel, .. } if channel == id
        ));
        assert!(matches!(
            mux.write_data(id, b"x"),
            Err(ChannelError::ChannelClosed(_))
        ));
    }

    #[test]
    fn data_beyond_window_closes_channel() {
        let (mut mux, _rx) = opened(WindowConfig::new(1000, 2000), 0, 1);
        let err = mux.handle_packet(&data(0, &[0u8; 1500])).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::WindowExceeded { len: 1500, window: 1000, .. }
        ));
        assert_eq!(mux.channel(ChannelId::new(0)).unwrap().local_window(), 1000);
    }

    #[test]
    fn data_for_unknown_channel_is_an_error() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 0, 1);
        assert!(matches!(
            mux.handle_packet(&data(3, b"?")),
            Err(ChannelError::UnknownChannel(3))
        ));
    }

    #[test]
    fn extended_data_shares_the_buffer() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 0, 1);
        mux.handle_packet(&data(0, b"out ")).unwrap();
        let stderr = PacketBuilder::new(Ssh2Message::ChannelExtendedData)
            .put_u32(0)
            .put_u32(EXTENDED_DATA_STDERR)
            .put_string(b"err")
            .build();
        mux.handle_packet(&stderr).unwrap();
        assert_eq!(&mux.read_data(ChannelId::new(0), 64).unwrap()[..], b"out err");
    }

    #[test]
    fn read_then_available() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 0, 1);
        let id = ChannelId::new(0);
        mux.handle_packet(&data(0, b"0123456789")).unwrap();

        assert_eq!(&mux.read_data(id, 4).unwrap()[..], b"0123");
        assert_eq!(mux.bytes_available(id).unwrap(), 6);
        assert_eq!(&mux.read_data(id, 100).unwrap()[..], b"456789");
        assert_eq!(mux.bytes_available(id).unwrap(), 0);
        assert!(mux.read_data(id, 8).unwrap().is_empty());
    }

    #[test]
    fn open_failure_is_reported() {
        let (mut mux, mut rx) = mux_with(WindowConfig::default());
        let id = mux.open_channel().unwrap();
        mux.write_data(id, b"lost?").unwrap();

        let failure = PacketBuilder::new(Ssh2Message::ChannelOpenFailure)
            .put_u32(0)
            .put_u32(4)
            .put_string("no more sessions")
            .put_string("en")
            .build();
        mux.handle_packet(&failure).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::OpenFailed {
                channel: id,
                reason: OpenFailureReason::ResourceShortage,
                description: "no more sessions".into(),
            }
        );
        assert!(matches!(
            mux.write_data(id, b"x"),
            Err(ChannelError::OpenFailed {
                reason: OpenFailureReason::ResourceShortage,
                ..
            })
        ));
    }

    #[test]
    fn eof_stops_window_adjusts_and_further_data() {
        let (mut mux, mut rx) = opened(WindowConfig::new(1024, 512), 0, 1);
        let id = ChannelId::new(0);
        mux.handle_packet(&PacketBuilder::new(Ssh2Message::ChannelEof).put_u32(0).build())
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::Eof(id));

        assert!(mux.handle_packet(&data(0, b"late")).is_err());
        assert!(!tags(&mux).contains(&(Ssh2Message::ChannelWindowAdjust as u8)));
    }

    #[test]
    fn peer_close_is_answered_once() {
        let (mut mux, mut rx) = opened(WindowConfig::default(), 1024, 1024);
        let id = ChannelId::new(0);
        let close = PacketBuilder::new(Ssh2Message::ChannelClose).put_u32(0).build();
        mux.handle_packet(&close).unwrap();
        mux.handle_packet(&close).unwrap();

        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelClose as u8]);
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::Closed(id));
        assert!(matches!(
            mux.write_data(id, b"x"),
            Err(ChannelError::ChannelClosed(_))
        ));
    }

    #[test]
    fn local_close_then_peer_close() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 1024, 1024);
        let id = ChannelId::new(0);
        mux.close_channel(id).unwrap();
        mux.close_channel(id).unwrap();
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelClose as u8]);

        mux.handle_packet(&PacketBuilder::new(Ssh2Message::ChannelClose).put_u32(0).build())
            .unwrap();
        assert_eq!(tags(&mux).len(), 1);
        assert_eq!(*mux.channel(id).unwrap().phase(), ChannelPhase::Closed);
    }

    #[test]
    fn eof_follows_queued_writes() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 4, 1024);
        let id = ChannelId::new(0);
        mux.write_data(id, b"abcdefgh").unwrap();
        mux.send_eof(id).unwrap();
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelData as u8]);
        assert_eq!(mux.channel(id).unwrap().pending_bytes(), 4);
        assert!(matches!(mux.write_data(id, b"x"), Err(ChannelError::EofSent(_))));

        mux.sink_mut().clear();
        mux.handle_packet(&adjust(0, 4)).unwrap();
        assert_eq!(
            tags(&mux),
            vec![Ssh2Message::ChannelData as u8, Ssh2Message::ChannelEof as u8]
        );
    }

    #[test]
    fn exit_status_request_is_reported() {
        let (mut mux, mut rx) = opened(WindowConfig::default(), 0, 1);
        let req = PacketBuilder::new(Ssh2Message::ChannelRequest)
            .put_u32(0)
            .put_string("exit-status")
            .put_bool(false)
            .put_u32(3)
            .build();
        mux.handle_packet(&req).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::ExitStatus {
                channel: ChannelId::new(0),
                code: 3
            }
        );
        assert!(mux.sink().is_empty());
    }

    #[test]
    fn unknown_request_wanting_reply_gets_failure() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 0, 1);
        let req = PacketBuilder::new(Ssh2Message::ChannelRequest)
            .put_u32(0)
            .put_string("keepalive@openssh.com")
            .put_bool(true)
            .build();
        mux.handle_packet(&req).unwrap();
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelFailure as u8]);
        assert_eq!(mux.sink()[0].reader().get_u32().unwrap(), 100);
    }

    #[test]
    fn peer_initiated_open_is_refused() {
        let (mut mux, _rx) = mux_with(WindowConfig::default());
        let open = PacketBuilder::new(Ssh2Message::ChannelOpen)
            .put_string("x11")
            .put_u32(42)
            .put_u32(1024)
            .put_u32(1024)
            .build();
        mux.handle_packet(&open).unwrap();
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelOpenFailure as u8]);
        let mut r = mux.sink()[0].reader();
        assert_eq!(r.get_u32().unwrap(), 42);
        assert_eq!(r.get_u32().unwrap(), 1);
        assert_eq!(mux.channel_count(), 0);
    }

    #[test]
    fn unknown_tag_is_ignored() {
        let (mut mux, mut rx) = opened(WindowConfig::default(), 0, 1);
        mux.handle_packet(&Packet::new(2, vec![1, 2, 3])).unwrap();
        assert!(mux.sink().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_data_closes_channel() {
        let (mut mux, mut rx) = opened(WindowConfig::default(), 1024, 1024);
        let id = ChannelId::new(0);
        // Claims 100 bytes but carries two.
        let bad = Packet::new(
            Ssh2Message::ChannelData as u8,
            vec![0, 0, 0, 0, 0, 0, 0, 100, b'a', b'b'],
        );
        let err = mux.handle_packet(&bad).unwrap_err();
        assert!(matches!(err, ChannelError::Malformed(_)));

        let ch = mux.channel(id).unwrap();
        assert!(ch.is_closed());
        assert_eq!(ch.available(), 0);
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelClose as u8]);
        assert_eq!(mux.sink()[0].reader().get_u32().unwrap(), 100);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChannelEvent::ProtocolViolation { channel, .. } if channel == id
        ));
    }

    #[test]
    fn truncated_extended_data_closes_channel() {
        let (mut mux, mut rx) = opened(WindowConfig::default(), 1024, 1024);
        let bad = Packet::new(Ssh2Message::ChannelExtendedData as u8, vec![0, 0, 0, 0, 0, 0]);
        assert!(mux.handle_packet(&bad).is_err());
        assert!(mux.channel(ChannelId::new(0)).unwrap().is_closed());
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChannelEvent::ProtocolViolation { .. }
        ));
    }

    #[test]
    fn data_in_flight_after_violation_is_dropped() {
        let (mut mux, mut rx) = opened(WindowConfig::new(1024, 512), 1024, 1024);
        let id = ChannelId::new(0);
        assert!(mux.handle_packet(&data(0, &[0u8; 600])).is_err());
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChannelEvent::ProtocolViolation { .. }
        ));

        mux.handle_packet(&data(0, b"late")).unwrap();
        mux.handle_packet(&data(0, b"later")).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(mux.bytes_available(id).unwrap(), 0);
        assert_eq!(tags(&mux), vec![Ssh2Message::ChannelClose as u8]);
    }

    #[test]
    fn data_in_flight_after_local_close_is_dropped() {
        let (mut mux, mut rx) = opened(WindowConfig::default(), 1024, 1024);
        let id = ChannelId::new(0);
        mux.close_channel(id).unwrap();
        while rx.try_recv().is_ok() {}

        mux.handle_packet(&data(0, b"still coming")).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(mux.bytes_available(id).unwrap(), 0);
    }

    #[test]
    fn truncated_packet_is_malformed() {
        let (mut mux, _rx) = opened(WindowConfig::default(), 0, 1);
        let err = mux
            .handle_packet(&Packet::new(Ssh2Message::ChannelData as u8, vec![0, 0]))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Malformed(_)));
    }
}
