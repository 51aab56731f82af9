//! sshmux-loopback entry point.
//!
//! ```text
//! sshmux-loopback                      Echo one message over one SSH-2 channel
//! sshmux-loopback --channels 4         Open four channels
//! sshmux-loopback --legacy             Use the SSH-1 session channel
//! sshmux-loopback --message <text>     Send <text> instead of the default
//! sshmux-loopback --config <path>      Load a custom config TOML
//! sshmux-loopback --gen-config         Write default config to stdout
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sshmux_core::ProtocolGeneration;
use sshmux_loopback::config::LoopbackConfig;
use sshmux_loopback::driver;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sshmux-loopback", about = "Exercise the SSH channel layer against an echo peer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "sshmux-loopback.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Run the SSH-1 session channel instead of SSH-2.
    #[arg(long)]
    legacy: bool,

    /// Text to echo.
    #[arg(short, long, default_value = "hello from sshmux\n")]
    message: String,

    /// Number of SSH-2 channels to open (overrides the config file).
    #[arg(long)]
    channels: Option<usize>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&LoopbackConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let mut config = LoopbackConfig::load(&cli.config);
    if cli.legacy {
        config.protocol = ProtocolGeneration::Ssh1;
    }
    if let Some(channels) = cli.channels {
        config.channels = channels;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("sshmux-loopback v{}", env!("CARGO_PKG_VERSION"));
    info!("protocol: {}", config.protocol);
    info!(
        "client window: {} / packet {}",
        config.channel.window.initial_window, config.channel.window.packet_size
    );
    info!(
        "peer window: {} / packet {}",
        config.peer.window.initial_window, config.peer.window.packet_size
    );

    let message = cli.message.into_bytes();
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let transcripts = tokio::time::timeout(timeout, driver::run(&config, &message)).await??;

    let mut mismatches = 0;
    for transcript in &transcripts {
        if transcript.matches(&message) {
            println!(
                "channel {}: {} bytes echoed: {}",
                transcript.channel,
                transcript.echoed.len(),
                String::from_utf8_lossy(&transcript.echoed).trim_end()
            );
        } else {
            mismatches += 1;
            error!(
                channel = %transcript.channel,
                sent = transcript.sent,
                received = transcript.echoed.len(),
                "echo mismatch"
            );
        }
    }

    if mismatches > 0 {
        return Err(format!("{mismatches} channel(s) returned a corrupted echo").into());
    }
    Ok(())
}
