//! Audio Sender Application
//!
//! Captures audio from the local input device and streams raw PCM to the
//! receiver over UDP.
//!
//! Usage: `sender [peer-host:port]`

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcm_relay::{
    audio::{list_devices, open_capture},
    config::AppConfig,
    network::{create_socket, resolve_peer, udp::sender_bind_addr},
    pipeline::{Pipeline, PipelineSettings},
    supervisor::{supervise, STATS_INTERVAL},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PCM Sender");
    let log = config.logging.debug_log();

    println!("\n=== Available Input Devices ===");
    for device in list_devices().iter().filter(|d| d.is_input) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    // Peer from args, falling back to config
    let peer_arg = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.network.peer.clone());
    let peer = resolve_peer(&peer_arg)?;
    tracing::info!("Target receiver: {}", peer);

    let settings = PipelineSettings::from_config(&config);
    tracing::info!(
        "Format: {} Hz, {} ch, S16LE; period {} us ({} bytes), buffer {} us",
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.period_us,
        settings.period_bytes,
        config.audio.buffer_us
    );

    let socket = create_socket(sender_bind_addr(peer), None)?;
    let device = open_capture(&config.audio, log)?;

    let pipeline = Pipeline::sender(&settings, device, socket, peer, log)?;
    tracing::info!("Streaming - press Ctrl+C to stop");

    supervise(pipeline, STATS_INTERVAL).await?;
    tracing::info!("Sender stopped");
    Ok(())
}
