//! The SSH-2 channel model: identity, window accounting and buffers.
//!
//! A [`Channel`] is pure bookkeeping. It never talks to the transport; the
//! multiplexer asks it what may be sent and tells it what was received.

mod table;

pub use table::ChannelTable;

use std::collections::VecDeque;
use std::fmt;

use bitflags::bitflags;
use bytes::{Bytes, BytesMut};

use crate::config::WindowConfig;
use crate::error::ChannelError;
use crate::state::ChannelPhase;

// ── ChannelId ────────────────────────────────────────────────────

/// Local channel number: the position in the channel table, and the
/// recipient channel the peer addresses us with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u32);

impl ChannelId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ChannelId> for u32 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

// ── ChannelFlags ─────────────────────────────────────────────────

bitflags! {
    /// Half-close and close bookkeeping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelFlags: u8 {
        const EOF_RECEIVED   = 0b0000_0001;
        /// EOF requested locally; sent once queued writes drain.
        const EOF_QUEUED     = 0b0000_0010;
        const EOF_SENT       = 0b0000_0100;
        const CLOSE_RECEIVED = 0b0000_1000;
        const CLOSE_SENT     = 0b0001_0000;
    }
}

// ── Channel ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Channel {
    local_id: ChannelId,
    remote_id: Option<u32>,

    local_window: u32,
    local_packet_size: u32,
    remote_window: u32,
    remote_packet_size: u32,

    /// Received, not yet read by the consumer.
    inbound: BytesMut,
    /// Written by the consumer, waiting for remote window.
    pending: VecDeque<Bytes>,

    phase: ChannelPhase,
    flags: ChannelFlags,
}

impl Channel {
    pub fn new(local_id: ChannelId, window: &WindowConfig) -> Self {
        Self {
            local_id,
            remote_id: None,
            local_window: window.initial_window,
            local_packet_size: window.packet_size,
            remote_window: 0,
            remote_packet_size: 0,
            inbound: BytesMut::new(),
            pending: VecDeque::new(),
            phase: ChannelPhase::Opening,
            flags: ChannelFlags::empty(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn local_id(&self) -> ChannelId {
        self.local_id
    }

    /// The peer's channel number, known once the open is confirmed.
    pub fn remote_id(&self) -> Option<u32> {
        self.remote_id
    }

    pub fn local_window(&self) -> u32 {
        self.local_window
    }

    pub fn local_packet_size(&self) -> u32 {
        self.local_packet_size
    }

    pub fn remote_window(&self) -> u32 {
        self.remote_window
    }

    pub fn remote_packet_size(&self) -> u32 {
        self.remote_packet_size
    }

    pub fn phase(&self) -> &ChannelPhase {
        &self.phase
    }

    pub fn flags(&self) -> ChannelFlags {
        self.flags
    }

    /// Bytes waiting in the inbound buffer.
    pub fn available(&self) -> usize {
        self.inbound.len()
    }

    /// Bytes written by the consumer but not yet transmitted.
    pub fn pending_bytes(&self) -> usize {
        self.pending.iter().map(Bytes::len).sum()
    }

    /// `true` if either side has sent CLOSE or the peer broke the protocol.
    pub fn is_closed(&self) -> bool {
        matches!(self.phase, ChannelPhase::Closed)
            || self
                .flags
                .intersects(ChannelFlags::CLOSE_SENT | ChannelFlags::CLOSE_RECEIVED)
    }

    pub(crate) fn flags_mut(&mut self) -> &mut ChannelFlags {
        &mut self.flags
    }

    fn violation(&self, reason: &'static str) -> ChannelError {
        ChannelError::ProtocolViolation {
            channel: self.local_id,
            reason,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Record the peer's half of the open handshake.
    pub fn confirm(
        &mut self,
        remote_id: u32,
        remote_window: u32,
        remote_packet_size: u32,
    ) -> Result<(), ChannelError> {
        if remote_packet_size == 0 {
            return Err(self.violation("peer advertised a zero packet size"));
        }
        self.phase.confirm().map_err(|reason| self.violation(reason))?;
        self.remote_id = Some(remote_id);
        self.remote_window = remote_window;
        self.remote_packet_size = remote_packet_size;
        Ok(())
    }

    pub fn phase_mut(&mut self) -> &mut ChannelPhase {
        &mut self.phase
    }

    /// Drop everything still queued for transmission, returning how many
    /// bytes were discarded.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending_bytes();
        self.pending.clear();
        dropped
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Account for `data` against the local window and buffer it.
    ///
    /// Fails without touching any state if the data does not fit the
    /// window or the packet size, or if the channel cannot receive.
    pub fn accept_data(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if !self.phase.is_open() {
            return Err(self.violation("data on a channel that is not open"));
        }
        if self
            .flags
            .intersects(ChannelFlags::EOF_RECEIVED | ChannelFlags::CLOSE_RECEIVED)
        {
            return Err(self.violation("data after EOF or CLOSE"));
        }
        if data.len() > self.local_packet_size as usize {
            return Err(ChannelError::PacketTooLarge {
                channel: self.local_id,
                len: data.len(),
                max: self.local_packet_size,
            });
        }
        let remaining = u32::try_from(data.len())
            .ok()
            .and_then(|len| self.local_window.checked_sub(len))
            .ok_or(ChannelError::WindowExceeded {
                channel: self.local_id,
                len: data.len(),
                window: self.local_window,
            })?;

        self.local_window = remaining;
        self.inbound.extend_from_slice(data);
        Ok(())
    }

    /// Grant the peer more window if it has fallen below twice the packet
    /// size. Returns the increment to advertise, already added locally.
    ///
    /// Never replenishes once the peer has sent EOF or CLOSE.
    pub fn replenish(&mut self) -> Option<u32> {
        if self.flags.intersects(
            ChannelFlags::EOF_RECEIVED | ChannelFlags::CLOSE_RECEIVED | ChannelFlags::CLOSE_SENT,
        ) {
            return None;
        }
        let increment = self.local_packet_size.saturating_mul(2);
        if self.local_window >= increment {
            return None;
        }
        let granted = increment.min(u32::MAX - self.local_window);
        if granted == 0 {
            return None;
        }
        self.local_window += granted;
        Some(granted)
    }

    /// Remove up to `max` bytes from the front of the inbound buffer.
    pub fn read(&mut self, max: usize) -> Bytes {
        let n = max.min(self.inbound.len());
        self.inbound.split_to(n).freeze()
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Apply a WINDOW_ADJUST from the peer.
    pub fn grow_remote_window(&mut self, increment: u32) -> Result<(), ChannelError> {
        self.remote_window = self
            .remote_window
            .checked_add(increment)
            .ok_or_else(|| self.violation("window adjust overflows 2^32 - 1"))?;
        Ok(())
    }

    /// Append consumer data to the transmit queue.
    pub fn queue(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.pending.push_back(data);
        }
    }

    /// Take the next chunk that may be transmitted now, charging it to the
    /// remote window.
    ///
    /// A chunk is at most `remote_packet_size` bytes and never more than the
    /// remote window holds, so the window never underflows and a window
    /// smaller than one packet still drains. Returns `None` while the
    /// channel is unconfirmed or the window is exhausted.
    pub fn next_sendable(&mut self) -> Option<Bytes> {
        if !self.phase.is_open() || self.remote_id.is_none() {
            return None;
        }
        let limit = self.remote_packet_size.min(self.remote_window) as usize;
        let front = self.pending.front_mut()?;
        let size = front.len().min(limit);
        if size == 0 {
            return None;
        }

        let chunk = if size == front.len() {
            self.pending.pop_front()?
        } else {
            front.split_to(size)
        };
        // `size` is bounded by `remote_window`, a u32.
        self.remote_window -= size as u32;
        Some(chunk)
    }
}
