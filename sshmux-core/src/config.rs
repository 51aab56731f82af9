//! Channel-layer configuration: window sizing and the pseudo-terminal
//! parameters sent when a shell is started.
//!
//! Every section derives `serde` so a front end can embed it in its own
//! TOML file; missing fields fall back to the protocol defaults.

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Maximum payload of a single data message we accept.
pub const DEFAULT_PACKET_SIZE: u32 = 32 * 1024;

/// Window advertised when a channel is opened.
pub const DEFAULT_WINDOW_SIZE: u32 = 4 * DEFAULT_PACKET_SIZE;

/// Terminal type requested for the pty.
pub const DEFAULT_TERM: &str = "vt100";

pub const DEFAULT_COLS: u32 = 80;
pub const DEFAULT_ROWS: u32 = 24;

/// Top-level channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Flow-control sizing for SSH-2 channels.
    pub window: WindowConfig,
    /// Pseudo-terminal request parameters (both generations).
    pub pty: PtyConfig,
}

/// Local flow-control parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Bytes the peer may send before it must wait for an adjust.
    pub initial_window: u32,
    /// Largest single data payload we accept.
    pub packet_size: u32,
}

/// Pseudo-terminal request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    /// `TERM` value, e.g. `"vt100"`.
    pub term: String,
    /// Width in characters.
    pub cols: u32,
    /// Height in rows.
    pub rows: u32,
    /// Width in pixels (0 = unspecified).
    pub width_px: u32,
    /// Height in pixels (0 = unspecified).
    pub height_px: u32,
    /// SSH-2 encoded terminal modes (RFC 4254 section 8), sent as the
    /// `pty-req` modes string. Empty by default.
    pub modes: Vec<u8>,
    /// SSH-1 encoded terminal modes, without the closing `TTY_OP_END`.
    /// The two encodings differ, so SSH-1 never reads `modes`.
    pub legacy_modes: Vec<u8>,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            initial_window: DEFAULT_WINDOW_SIZE,
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            term: DEFAULT_TERM.into(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            width_px: 0,
            height_px: 0,
            modes: Vec::new(),
            legacy_modes: Vec::new(),
        }
    }
}

impl WindowConfig {
    pub fn new(initial_window: u32, packet_size: u32) -> Self {
        Self {
            initial_window,
            packet_size,
        }
    }

    /// Reject sizes that would stall a channel: a zero packet size refuses
    /// every data message and a zero window is never replenished.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.packet_size == 0 {
            return Err(ChannelError::InvalidConfig("packet_size must be non-zero"));
        }
        if self.initial_window == 0 {
            return Err(ChannelError::InvalidConfig("initial_window must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.window.initial_window, 131_072);
        assert_eq!(cfg.window.packet_size, 32_768);
        assert_eq!(cfg.pty.term, "vt100");
        assert_eq!((cfg.pty.cols, cfg.pty.rows), (80, 24));
        assert_eq!((cfg.pty.width_px, cfg.pty.height_px), (0, 0));
        assert!(cfg.pty.modes.is_empty());
        assert!(cfg.pty.legacy_modes.is_empty());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: ChannelConfig = toml::from_str(
            r#"
            [pty]
            term = "xterm"
            cols = 132
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pty.term, "xterm");
        assert_eq!(cfg.pty.cols, 132);
        assert_eq!(cfg.pty.rows, 24);
        assert_eq!(cfg.window, WindowConfig::default());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(WindowConfig::default().validate().is_ok());
        assert!(WindowConfig::new(1000, 4096).validate().is_ok());
        assert!(matches!(
            WindowConfig::new(1024, 0).validate(),
            Err(ChannelError::InvalidConfig(_))
        ));
        assert!(matches!(
            WindowConfig::new(0, 512).validate(),
            Err(ChannelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = ChannelConfig {
            window: WindowConfig::new(1024, 512),
            ..Default::default()
        };
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ChannelConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, cfg);
    }
}
