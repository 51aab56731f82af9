//! State of the single SSH-1 session channel.

/// The legacy channel only tracks whether the pty request was granted.
///
/// ```text
///  RequestingPty ──[SMSG_SUCCESS]──► Interactive
///        │ ▲
///        └─┘ [SMSG_FAILURE]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegacyPhase {
    /// Pty request and shell execution have been sent.
    #[default]
    RequestingPty,
    /// The server acknowledged the pty request.
    Interactive,
}

impl std::fmt::Display for LegacyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestingPty => write!(f, "RequestingPty"),
            Self::Interactive => write!(f, "Interactive"),
        }
    }
}

impl LegacyPhase {
    /// Apply an `SSH_SMSG_SUCCESS`. Returns `true` if the phase changed.
    pub fn on_success(&mut self) -> bool {
        match self {
            Self::RequestingPty => {
                *self = Self::Interactive;
                true
            }
            Self::Interactive => false,
        }
    }

    /// Apply an `SSH_SMSG_FAILURE`. The phase never changes; returns `true`
    /// if the failure refers to the pending pty request.
    pub fn on_failure(&self) -> bool {
        matches!(self, Self::RequestingPty)
    }
}
