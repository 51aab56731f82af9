//! Domain-specific error types for the channel layer.
//!
//! All fallible operations return `Result<T, ChannelError>`.
//! Malformed peer input never panics; it surfaces as a typed error.

use thiserror::Error;

use crate::channel::ChannelId;
use crate::message::OpenFailureReason;

/// The canonical error type for the channel layer.
#[derive(Debug, Error)]
pub enum ChannelError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A packet violated protocol rules.
    #[error("protocol violation on channel {channel}: {reason}")]
    ProtocolViolation {
        channel: ChannelId,
        reason: &'static str,
    },

    /// The peer sent more data than the advertised local window allows.
    #[error("channel {channel}: peer sent {len} bytes with only {window} left in the window")]
    WindowExceeded {
        channel: ChannelId,
        len: usize,
        window: u32,
    },

    /// The peer sent a single data message larger than our packet size.
    #[error("channel {channel}: {len} byte message exceeds packet size {max}")]
    PacketTooLarge {
        channel: ChannelId,
        len: usize,
        max: u32,
    },

    /// A channel number does not refer to any entry in the channel table.
    #[error("unknown channel {0}")]
    UnknownChannel(u32),

    /// A length-prefixed field or fixed-width integer ran past the end of
    /// the packet.
    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    // ── Channel Errors ───────────────────────────────────────────
    /// The peer refused to open the channel.
    #[error("channel {channel} open failed ({reason}): {description}")]
    OpenFailed {
        channel: ChannelId,
        reason: OpenFailureReason,
        description: String,
    },

    /// The channel has been closed (by either side).
    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),

    /// We already sent EOF on this channel; no more data may follow.
    #[error("channel {0} has already sent EOF")]
    EofSent(ChannelId),

    /// The operation needs a confirmed channel.
    #[error("channel {0} is not open")]
    NotOpen(ChannelId),

    /// Every `u32` channel number has been handed out.
    #[error("channel table is full")]
    TableFull,

    // ── Configuration Errors ─────────────────────────────────────
    /// A configured value cannot work on the wire.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    // ── Session Errors ───────────────────────────────────────────
    /// The outbound packet sink has gone away.
    #[error("transport closed")]
    TransportClosed,

    /// A thread panicked while holding the session lock.
    #[error("session lock poisoned")]
    SessionPoisoned,
}

impl ChannelError {
    /// Returns `true` if this error leaves the whole session unusable,
    /// as opposed to a single channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::TransportClosed | ChannelError::SessionPoisoned
        )
    }

    /// The channel the error is attributed to, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            ChannelError::ProtocolViolation { channel, .. }
            | ChannelError::WindowExceeded { channel, .. }
            | ChannelError::PacketTooLarge { channel, .. }
            | ChannelError::OpenFailed { channel, .. } => Some(*channel),
            ChannelError::ChannelClosed(id)
            | ChannelError::EofSent(id)
            | ChannelError::NotOpen(id) => Some(*id),
            ChannelError::UnknownChannel(raw) => Some(ChannelId::new(*raw)),
            _ => None,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ChannelError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ChannelError::TransportClosed
    }
}

impl<T> From<std::sync::PoisonError<T>> for ChannelError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ChannelError::SessionPoisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = ChannelError::WindowExceeded {
            channel: ChannelId::new(3),
            len: 600,
            window: 512,
        };
        assert!(e.to_string().contains("600"));
        assert!(e.to_string().contains("512"));
        assert!(e.to_string().contains("channel 3"));

        let e = ChannelError::OpenFailed {
            channel: ChannelId::new(0),
            reason: OpenFailureReason::ResourceShortage,
            description: "too many sessions".into(),
        };
        assert!(e.to_string().contains("too many sessions"));
    }

    #[test]
    fn from_send_error() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
        drop(rx);
        let e: ChannelError = tx.send(1).unwrap_err().into();
        assert!(matches!(e, ChannelError::TransportClosed));
        assert!(e.is_fatal());
    }

    #[test]
    fn channel_attribution() {
        let e = ChannelError::ChannelClosed(ChannelId::new(7));
        assert_eq!(e.channel(), Some(ChannelId::new(7)));
        assert!(!e.is_fatal());
        assert_eq!(ChannelError::Malformed("short").channel(), None);
    }
}
