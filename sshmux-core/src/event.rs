//! Notifications from the channel layer to its consumer.
//!
//! Handlers never call back into the consumer. Instead every state change the
//! consumer may care about is pushed onto an unbounded queue; the consumer
//! drains it and pulls bytes with `read` when it sees
//! [`ChannelEvent::DataReady`].

use tokio::sync::mpsc;

use crate::channel::ChannelId;
use crate::message::OpenFailureReason;

pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;
pub type ChannelEventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The peer confirmed the channel; pty and shell have been requested.
    Opened(ChannelId),
    /// The peer refused to open the channel.
    OpenFailed {
        channel: ChannelId,
        reason: OpenFailureReason,
        description: String,
    },
    /// New bytes were appended to the inbound buffer.
    DataReady(ChannelId),
    /// The peer will send no more data.
    Eof(ChannelId),
    /// The channel is closed in both directions.
    Closed(ChannelId),
    /// The remote command exited.
    ExitStatus { channel: ChannelId, code: u32 },
    /// The remote command was killed by a signal.
    ExitSignal { channel: ChannelId, signal: String },
    /// The legacy server refused the pty request.
    PtyRefused(ChannelId),
    /// The peer broke the protocol; the channel has been closed.
    ProtocolViolation { channel: ChannelId, reason: String },
}

impl ChannelEvent {
    /// The channel this event concerns.
    pub fn channel(&self) -> ChannelId {
        match self {
            ChannelEvent::Opened(id)
            | ChannelEvent::DataReady(id)
            | ChannelEvent::Eof(id)
            | ChannelEvent::Closed(id)
            | ChannelEvent::PtyRefused(id) => *id,
            ChannelEvent::OpenFailed { channel, .. }
            | ChannelEvent::ExitStatus { channel, .. }
            | ChannelEvent::ExitSignal { channel, .. }
            | ChannelEvent::ProtocolViolation { channel, .. } => *channel,
        }
    }
}

/// Create the event queue handed to a channel layer.
pub fn event_channel() -> (ChannelEventSender, ChannelEventReceiver) {
    mpsc::unbounded_channel()
}
