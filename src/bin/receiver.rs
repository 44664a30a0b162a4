//! Audio Receiver Application
//!
//! Receives raw PCM datagrams from any sender and plays them on the local
//! output device.
//!
//! Usage: `receiver [bind-port]`

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcm_relay::{
    audio::{list_devices, open_playback},
    config::AppConfig,
    network::{create_socket, udp::receiver_bind_addr},
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

    tracing::info!("Starting PCM Receiver");
    let log = config.logging.debug_log();

    println!("\n=== Available Output Devices ===");
    for device in list_devices().iter().filter(|d| d.is_output) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u16>()
            .with_context(|| format!("Invalid port: {}", arg))?,
        None => config.network.bind_port,
    };

    let settings = PipelineSettings::from_config(&config);
    let socket = create_socket(receiver_bind_addr(port), config.network.recv_buffer_bytes)?;
    tracing::info!("Listening on {}", socket.local_addr()?);

    let device = open_playback(&config.audio, log)?;

    let pipeline = Pipeline::receiver(&settings, socket, device, log)?;
    tracing::info!("Waiting for audio - press Ctrl+C to stop");

    supervise(pipeline, STATS_INTERVAL).await?;
    tracing::info!("Receiver stopped");
    Ok(())
}
