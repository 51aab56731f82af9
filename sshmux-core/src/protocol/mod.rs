//! The two protocol generations of the channel layer.
//!
//! - [`ssh2`]: windowed multiplexing of any number of session channels.
//! - [`ssh1`]: the single, windowless legacy session channel.
//!
//! Both route inbound packets through [`dispatch`](crate::dispatch::dispatch)
//! and report to the consumer through [`ChannelEvent`](crate::event::ChannelEvent)s.

pub mod ssh1;
pub mod ssh2;

pub use ssh1::{LEGACY_CHANNEL, LegacyChannel};
pub use ssh2::{ChannelMultiplexer, EXTENDED_DATA_STDERR, SESSION_CHANNEL_TYPE};
