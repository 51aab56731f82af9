//! Configuration for the loopback driver.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sshmux_core::{ChannelConfig, ProtocolGeneration, WindowConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Protocol generation: "ssh1" or "ssh2".
    pub protocol: ProtocolGeneration,
    /// Channels to open in SSH-2 mode. SSH-1 always has exactly one.
    pub channels: usize,
    /// Give up if the echo has not come back after this many seconds.
    pub timeout_secs: u64,
    /// Client side window and pty parameters.
    pub channel: ChannelConfig,
    /// Echo peer settings.
    pub peer: PeerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Echo peer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Window and packet size the peer advertises for its receive side.
    pub window: WindowConfig,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolGeneration::Ssh2,
            channels: 1,
            timeout_secs: 10,
            channel: ChannelConfig::default(),
            peer: PeerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        // Deliberately small so the driver exercises window adjusts.
        Self {
            window: WindowConfig::new(8 * 1024, 2 * 1024),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl LoopbackConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────
