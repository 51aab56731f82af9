//! # sshmux-core
//!
//! The channel layer of an SSH client: everything between an authenticated
//! transport and a terminal that wants byte streams.
//!
//! This crate contains:
//! - **Wire types**: `Packet`, `PacketReader`, `PacketBuilder`, `Ssh2Message`, `Ssh1Message`
//! - **Channel model**: `Channel`, `ChannelTable`, `ChannelFlags`, window accounting
//! - **SSH-2**: `ChannelMultiplexer`, windowed multiplexing with flow control
//! - **SSH-1**: `LegacyChannel`, the single windowless session channel
//! - **Session**: `ChannelLayer`, `Session`, `SessionHandle` with its async packet pump
//! - **Loopback**: in-process echo peers for tests and demos
//! - **Error**: `ChannelError`, typed, `thiserror`-based

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod loopback;
pub mod message;
pub mod packet;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{Channel, ChannelFlags, ChannelId, ChannelTable};
pub use config::{ChannelConfig, PtyConfig, WindowConfig};
pub use dispatch::{MessageHandler, dispatch};
pub use error::ChannelError;
pub use event::{ChannelEvent, ChannelEventReceiver, ChannelEventSender};
pub use loopback::{EchoPeer, LegacyEchoPeer, Loopback};
pub use message::{OpenFailureReason, Ssh1Message, Ssh2Message};
pub use packet::{Packet, PacketBuilder, PacketReader};
pub use protocol::{ChannelMultiplexer, LEGACY_CHANNEL, LegacyChannel};
pub use session::{ChannelLayer, ProtocolGeneration, Session, SessionHandle};
pub use state::{ChannelPhase, LegacyPhase};
pub use transport::{PacketReceiver, PacketSender, PacketSink, packet_channel};
