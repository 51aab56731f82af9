mod channel;
mod legacy;

pub use channel::ChannelPhase;
pub use legacy::LegacyPhase;
