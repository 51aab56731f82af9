//! Lifecycle of a single SSH-2 channel.
//!
//! Transitions return `Result` instead of panicking; the error is a short
//! reason the caller attaches to a `ChannelError::ProtocolViolation`.

use crate::message::OpenFailureReason;

// ── ChannelPhase ─────────────────────────────────────────────────

/// The current phase of an SSH-2 channel.
///
/// ```text
///  Opening ──► Open ──► Closed
///     │
///     ▼
///   Failed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelPhase {
    /// CHANNEL_OPEN sent; waiting for the peer's answer.
    #[default]
    Opening,

    /// Confirmed by the peer; data may flow.
    Open,

    /// The peer refused the open.
    Failed {
        reason: OpenFailureReason,
        description: String,
    },

    /// The peer closed the channel.
    Closed,
}

impl std::fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "Opening"),
            Self::Open => write!(f, "Open"),
            Self::Failed { .. } => write!(f, "Failed"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl ChannelPhase {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_opening(&self) -> bool {
        matches!(self, Self::Opening)
    }

    /// `true` once the channel can never carry data again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Closed)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Open`.
    ///
    /// Valid from: `Opening`.
    pub fn confirm(&mut self) -> Result<(), &'static str> {
        match self {
            Self::Opening => {
                *self = Self::Open;
                Ok(())
            }
            _ => Err("open confirmation for a channel that is not opening"),
        }
    }

    /// Transition to `Failed`.
    ///
    /// Valid from: `Opening`.
    pub fn fail(
        &mut self,
        reason: OpenFailureReason,
        description: String,
    ) -> Result<(), &'static str> {
        match self {
            Self::Opening => {
                *self = Self::Failed {
                    reason,
                    description,
                };
                Ok(())
            }
            _ => Err("open failure for a channel that is not opening"),
        }
    }

    /// Transition to `Closed`.
    ///
    /// Valid from: `Open`. Closing an already closed channel is a no-op.
    pub fn close(&mut self) -> Result<(), &'static str> {
        match self {
            Self::Open | Self::Closed => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err("close for a channel that was never opened"),
        }
    }

    /// Force `Closed` regardless of the current phase.
    ///
    /// Used when the peer breaks the protocol on this channel.
    pub fn force_close(&mut self) {
        *self = Self::Closed;
    }
}
