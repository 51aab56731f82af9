//! The SSH-1 session channel.
//!
//! SSH-1 has exactly one implicit channel and no flow control. The session
//! is set up by firing the pty request and the shell request back to back;
//! the server acknowledges the pty request with SUCCESS or FAILURE but the
//! shell runs either way.

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::channel::ChannelId;
use crate::config::PtyConfig;
use crate::dispatch::{MessageHandler, dispatch};
use crate::error::ChannelError;
use crate::event::{ChannelEvent, ChannelEventReceiver, ChannelEventSender, event_channel};
use crate::message::Ssh1Message;
use crate::packet::{Packet, PacketBuilder, PacketReader};
use crate::state::LegacyPhase;
use crate::transport::PacketSink;

/// The fixed identifier events of the legacy channel carry.
pub const LEGACY_CHANNEL: ChannelId = ChannelId::new(0);

/// Terminates the encoded terminal modes of a pty request.
const TTY_OP_END: u8 = 0;

pub struct LegacyChannel<S> {
    sink: S,
    phase: LegacyPhase,
    inbound: BytesMut,
    exit_status: Option<u32>,
    events: ChannelEventSender,
}

impl<S: PacketSink> LegacyChannel<S> {
    /// Request a pty described by `pty` and start the shell.
    ///
    /// The terminal modes come from `pty.legacy_modes`; the SSH-2 `modes`
    /// block is not valid here.
    pub fn new(mut sink: S, pty: &PtyConfig) -> Result<(Self, ChannelEventReceiver), ChannelError> {
        let request_pty = PacketBuilder::new(Ssh1Message::CmsgRequestPty)
            .put_string(&pty.term)
            .put_u32(pty.rows)
            .put_u32(pty.cols)
            .put_u32(pty.width_px)
            .put_u32(pty.height_px)
            .put_raw(&pty.legacy_modes)
            .put_u8(TTY_OP_END)
            .build();
        sink.send_packet(request_pty)?;
        sink.send_packet(PacketBuilder::new(Ssh1Message::CmsgExecShell).build())?;
        debug!(term = %pty.term, cols = pty.cols, rows = pty.rows, "pty and shell requested");

        let (events, rx) = event_channel();
        let channel = Self {
            sink,
            phase: LegacyPhase::default(),
            inbound: BytesMut::new(),
            exit_status: None,
            events,
        };
        Ok((channel, rx))
    }

    pub fn phase(&self) -> LegacyPhase {
        self.phase
    }

    /// The code the remote shell exited with, once known.
    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Send `data` as stdin. There is no window, so this never queues.
    pub fn write_data(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if self.exit_status.is_some() {
            return Err(ChannelError::ChannelClosed(LEGACY_CHANNEL));
        }
        if data.is_empty() {
            return Ok(());
        }
        let stdin = PacketBuilder::new(Ssh1Message::CmsgStdinData)
            .put_string(data)
            .build();
        self.sink.send_packet(stdin)
    }

    pub fn read_data(&mut self, max: usize) -> Bytes {
        let n = max.min(self.inbound.len());
        self.inbound.split_to(n).freeze()
    }

    pub fn bytes_available(&self) -> usize {
        self.inbound.len()
    }

    pub fn handle_packet(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        dispatch(self, packet)
    }

    fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn on_output(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let data = body.get_string()?;
        trace!(len = data.len(), "output received");
        self.inbound.extend_from_slice(&data);
        self.emit(ChannelEvent::DataReady(LEGACY_CHANNEL));
        Ok(())
    }

    fn on_exit_status(&mut self, body: &mut PacketReader) -> Result<(), ChannelError> {
        let code = body.get_u32()?;
        if self.exit_status.is_some() {
            debug!(code, "duplicate exit status ignored");
            return Ok(());
        }
        self.exit_status = Some(code);
        info!(code, "remote shell exited");
        self.sink
            .send_packet(PacketBuilder::new(Ssh1Message::CmsgExitConfirmation).build())?;
        self.emit(ChannelEvent::ExitStatus {
            channel: LEGACY_CHANNEL,
            code,
        });
        self.emit(ChannelEvent::Closed(LEGACY_CHANNEL));
        Ok(())
    }
}

impl<S: PacketSink> MessageHandler for LegacyChannel<S> {
    type Message = Ssh1Message;

    fn on_message(
        &mut self,
        message: Ssh1Message,
        body: &mut PacketReader,
    ) -> Result<(), ChannelError> {
        match message {
            Ssh1Message::SmsgSuccess => {
                if self.phase.on_success() {
                    info!("pty allocated; session interactive");
                    self.emit(ChannelEvent::Opened(LEGACY_CHANNEL));
                } else {
                    debug!("success with no request pending");
                }
                Ok(())
            }
            Ssh1Message::SmsgFailure => {
                if self.phase.on_failure() {
                    warn!("server refused pty request");
                    self.emit(ChannelEvent::PtyRefused(LEGACY_CHANNEL));
                } else {
                    debug!("failure with no request pending");
                }
                Ok(())
            }
            Ssh1Message::SmsgStdoutData | Ssh1Message::SmsgStderrData => self.on_output(body),
            Ssh1Message::SmsgExitStatus => self.on_exit_status(body),
            Ssh1Message::CmsgRequestPty
            | Ssh1Message::CmsgExecShell
            | Ssh1Message::CmsgStdinData
            | Ssh1Message::CmsgExitConfirmation => {
                debug!(kind = ?message, "client message received from server; ignored");
                Ok(())
            }
        }
    }
}
