//! Drives one session against the echo peer and collects what comes back.

use bytes::Bytes;
use tracing::{debug, info};

use sshmux_core::loopback::{self, Loopback};
use sshmux_core::{ChannelError, ChannelEvent, ChannelEventReceiver, ChannelId, ProtocolGeneration};

use crate::config::LoopbackConfig;

/// What one channel sent and received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub channel: ChannelId,
    pub sent: usize,
    pub echoed: Bytes,
}

impl Transcript {
    /// `true` if the echo matches what was sent byte for byte.
    pub fn matches(&self, message: &[u8]) -> bool {
        self.sent == message.len() && self.echoed[..] == *message
    }
}

async fn next_event(events: &mut ChannelEventReceiver) -> Result<ChannelEvent, ChannelError> {
    events.recv().await.ok_or(ChannelError::TransportClosed)
}

/// Open the configured channels, wait until the peer has answered every one
/// of them, then write `message` on each and read the echo back.
pub async fn run(config: &LoopbackConfig, message: &[u8]) -> Result<Vec<Transcript>, ChannelError> {
    let mut lb = loopback::spawn(config.protocol, &config.channel, config.peer.window.clone())?;
    let result = exchange(&mut lb, config, message).await;
    lb.shutdown();
    result
}

async fn exchange(
    lb: &mut Loopback,
    config: &LoopbackConfig,
    message: &[u8],
) -> Result<Vec<Transcript>, ChannelError> {
    let Loopback {
        session, events, ..
    } = lb;

    let count = match config.protocol {
        ProtocolGeneration::Ssh1 => 1,
        ProtocolGeneration::Ssh2 => config.channels.max(1),
    };
    let ids = (0..count)
        .map(|_| session.open())
        .collect::<Result<Vec<_>, _>>()?;
    info!(protocol = %config.protocol, channels = ids.len(), "session started");

    let mut unanswered = ids.len();
    while unanswered > 0 {
        match next_event(events).await? {
            ChannelEvent::Opened(id) | ChannelEvent::PtyRefused(id) => {
                debug!(channel = %id, "channel ready");
                unanswered -= 1;
            }
            ChannelEvent::OpenFailed {
                channel,
                reason,
                description,
            } => {
                return Err(ChannelError::OpenFailed {
                    channel,
                    reason,
                    description,
                });
            }
            other => debug!(?other, "event while opening"),
        }
    }

    for id in &ids {
        session.write(*id, message)?;
    }

    let mut transcripts = Vec::with_capacity(ids.len());
    for id in ids {
        let mut echoed = Vec::with_capacity(message.len());
        while echoed.len() < message.len() {
            let chunk = session.read(id, message.len() - echoed.len())?;
            if chunk.is_empty() {
                next_event(events).await?;
                continue;
            }
            echoed.extend_from_slice(&chunk);
        }
        info!(channel = %id, bytes = echoed.len(), "echo received");
        transcripts.push(Transcript {
            channel: id,
            sent: message.len(),
            echoed: Bytes::from(echoed),
        });
    }
    Ok(transcripts)
}
