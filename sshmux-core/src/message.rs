//! Message tags for both protocol generations.
//!
//! Uses proper enums with `TryFrom`, so unknown values never panic.

use crate::error::ChannelError;
use std::fmt;

// ── Ssh2Message ──────────────────────────────────────────────────

/// SSH-2 connection-protocol messages handled by the channel layer
/// (RFC 4254 numbering).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ssh2Message {
    ChannelOpen = 90,
    ChannelOpenConfirmation = 91,
    ChannelOpenFailure = 92,
    ChannelWindowAdjust = 93,
    ChannelData = 94,
    ChannelExtendedData = 95,
    ChannelEof = 96,
    ChannelClose = 97,
    ChannelRequest = 98,
    ChannelSuccess = 99,
    ChannelFailure = 100,
}

impl TryFrom<u8> for Ssh2Message {
    type Error = ChannelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            90 => Ok(Ssh2Message::ChannelOpen),
            91 => Ok(Ssh2Message::ChannelOpenConfirmation),
            92 => Ok(Ssh2Message::ChannelOpenFailure),
            93 => Ok(Ssh2Message::ChannelWindowAdjust),
            94 => Ok(Ssh2Message::ChannelData),
            95 => Ok(Ssh2Message::ChannelExtendedData),
            96 => Ok(Ssh2Message::ChannelEof),
            97 => Ok(Ssh2Message::ChannelClose),
            98 => Ok(Ssh2Message::ChannelRequest),
            99 => Ok(Ssh2Message::ChannelSuccess),
            100 => Ok(Ssh2Message::ChannelFailure),
            _ => Err(ChannelError::UnknownVariant {
                type_name: "Ssh2Message",
                value: value as u64,
            }),
        }
    }
}

impl From<Ssh2Message> for u8 {
    fn from(message: Ssh2Message) -> Self {
        message as u8
    }
}

impl fmt::Display for Ssh2Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Ssh1Message ──────────────────────────────────────────────────

/// SSH-1 session messages used once the pty has been requested.
///
/// `C` variants travel client → server, `S` variants server → client.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ssh1Message {
    CmsgRequestPty = 10,
    CmsgExecShell = 12,
    SmsgSuccess = 14,
    SmsgFailure = 15,
    CmsgStdinData = 16,
    SmsgStdoutData = 17,
    SmsgStderrData = 18,
    SmsgExitStatus = 20,
    CmsgExitConfirmation = 33,
}

impl TryFrom<u8> for Ssh1Message {
    type Error = ChannelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Ssh1Message::CmsgRequestPty),
            12 => Ok(Ssh1Message::CmsgExecShell),
            14 => Ok(Ssh1Message::SmsgSuccess),
            15 => Ok(Ssh1Message::SmsgFailure),
            16 => Ok(Ssh1Message::CmsgStdinData),
            17 => Ok(Ssh1Message::SmsgStdoutData),
            18 => Ok(Ssh1Message::SmsgStderrData),
            20 => Ok(Ssh1Message::SmsgExitStatus),
            33 => Ok(Ssh1Message::CmsgExitConfirmation),
            _ => Err(ChannelError::UnknownVariant {
                type_name: "Ssh1Message",
                value: value as u64,
            }),
        }
    }
}

impl From<Ssh1Message> for u8 {
    fn from(message: Ssh1Message) -> Self {
        message as u8
    }
}

impl fmt::Display for Ssh1Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── OpenFailureReason ────────────────────────────────────────────

/// Reason code carried by `SSH_MSG_CHANNEL_OPEN_FAILURE`.
///
/// Peers may send codes outside the RFC range, so unknown values are kept
/// rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenFailureReason {
    AdministrativelyProhibited,
    ConnectFailed,
    UnknownChannelType,
    ResourceShortage,
    Other(u32),
}

impl From<u32> for OpenFailureReason {
    fn from(value: u32) -> Self {
        match value {
            1 => OpenFailureReason::AdministrativelyProhibited,
            2 => OpenFailureReason::ConnectFailed,
            3 => OpenFailureReason::UnknownChannelType,
            4 => OpenFailureReason::ResourceShortage,
            other => OpenFailureReason::Other(other),
        }
    }
}

impl From<OpenFailureReason> for u32 {
    fn from(reason: OpenFailureReason) -> Self {
        match reason {
            OpenFailureReason::AdministrativelyProhibited => 1,
            OpenFailureReason::ConnectFailed => 2,
            OpenFailureReason::UnknownChannelType => 3,
            OpenFailureReason::ResourceShortage => 4,
            OpenFailureReason::Other(code) => code,
        }
    }
}

impl fmt::Display for OpenFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenFailureReason::AdministrativelyProhibited => write!(f, "administratively prohibited"),
            OpenFailureReason::ConnectFailed => write!(f, "connect failed"),
            OpenFailureReason::UnknownChannelType => write!(f, "unknown channel type"),
            OpenFailureReason::ResourceShortage => write!(f, "resource shortage"),
            OpenFailureReason::Other(code) => write!(f, "reason {code}"),
        }
    }
}
