//! Append-only arena of channels indexed by local channel number.

use crate::channel::{Channel, ChannelId};
use crate::config::WindowConfig;
use crate::error::ChannelError;

/// Channels in creation order. Ids are never reused and entries are never
/// removed; the table lives as long as the session.
#[derive(Debug, Default)]
pub struct ChannelTable {
    channels: Vec<Channel>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new channel and return its id (its index).
    pub fn allocate(&mut self, window: &WindowConfig) -> Result<ChannelId, ChannelError> {
        let raw = u32::try_from(self.channels.len()).map_err(|_| ChannelError::TableFull)?;
        let id = ChannelId::new(raw);
        self.channels.push(Channel::new(id, window));
        Ok(id)
    }

    /// Look up by the raw recipient number a peer put on the wire.
    pub fn get(&self, raw: u32) -> Result<&Channel, ChannelError> {
        self.channels
            .get(raw as usize)
            .ok_or(ChannelError::UnknownChannel(raw))
    }

    pub fn get_mut(&mut self, raw: u32) -> Result<&mut Channel, ChannelError> {
        self.channels
            .get_mut(raw as usize)
            .ok_or(ChannelError::UnknownChannel(raw))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }
}
