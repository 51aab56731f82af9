//! Tag-based routing of inbound packets.
//!
//! Both protocol generations share this mechanism: the handler names its
//! message enum, the dispatcher decodes the tag, drops unknown tags with a
//! diagnostic and hands known ones to the handler together with a reader
//! positioned at the start of the body.

use std::fmt::Debug;

use tracing::{debug, trace};

use crate::error::ChannelError;
use crate::packet::{Packet, PacketReader};

/// A protocol state machine that consumes tagged packets.
pub trait MessageHandler {
    /// The generation's message enum, decoded from the tag byte.
    type Message: TryFrom<u8, Error = ChannelError> + Copy + Debug;

    /// Process one message to completion. Must not block.
    fn on_message(
        &mut self,
        message: Self::Message,
        body: &mut PacketReader,
    ) -> Result<(), ChannelError>;
}

/// Route `packet` to `handler`.
///
/// Unknown tags are never an error: they are logged and ignored.
pub fn dispatch<H: MessageHandler>(handler: &mut H, packet: &Packet) -> Result<(), ChannelError> {
    let message = match H::Message::try_from(packet.tag()) {
        Ok(message) => message,
        Err(err) => {
            debug!(tag = packet.tag(), %err, "ignoring unknown packet");
            return Ok(());
        }
    };
    trace!(kind = ?message, len = packet.payload().len(), "dispatching packet");
    let mut body = packet.reader();
    handler.on_message(message, &mut body)
}
