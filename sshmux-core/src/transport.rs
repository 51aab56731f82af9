//! The outbound half of the transport as seen by the channel layer.
//!
//! Encryption and framing live below this boundary. The channel layer only
//! needs somewhere to put finished packets, in order.

use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::packet::Packet;

pub type PacketSender = mpsc::UnboundedSender<Packet>;
pub type PacketReceiver = mpsc::UnboundedReceiver<Packet>;

/// Destination for outbound packets.
///
/// `send_packet` must not block: it is called from inside packet handlers.
pub trait PacketSink {
    fn send_packet(&mut self, packet: Packet) -> Result<(), ChannelError>;
}

/// Collects packets in memory. Handy for driving a channel layer by hand.
impl PacketSink for Vec<Packet> {
    fn send_packet(&mut self, packet: Packet) -> Result<(), ChannelError> {
        self.push(packet);
        Ok(())
    }
}

/// Forwards packets to the transport's writer task.
impl PacketSink for PacketSender {
    fn send_packet(&mut self, packet: Packet) -> Result<(), ChannelError> {
        self.send(packet)?;
        Ok(())
    }
}

impl<S: PacketSink + ?Sized> PacketSink for Box<S> {
    fn send_packet(&mut self, packet: Packet) -> Result<(), ChannelError> {
        (**self).send_packet(packet)
    }
}

/// Create a packet queue between a channel layer and a transport.
pub fn packet_channel() -> (PacketSender, PacketReceiver) {
    mpsc::unbounded_channel()
}
