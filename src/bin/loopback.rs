//! Roomcast loopback
//!
//! Runs a host and a listener in one process over an in-process hub:
//! microphone → capture chunks → channel → jitter buffer → speakers.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomcast::{
    audio::{device::list_devices, AudioBackend, CpalBackend},
    config::AppConfig,
    service::{CaptureService, PlaybackService},
    session::{HostSession, ListenerSession},
    transport::LocalHub,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Roomcast loopback");

    let config = AppConfig::load()?;
    let room = std::env::args().nth(1).unwrap_or_else(|| "loopback".to_string());

    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let backend: Arc<dyn AudioBackend> = Arc::new(CpalBackend::new());
    let hub = LocalHub::new();

    let capture = CaptureService::new(backend.clone(), config.audio.clone())
        .with_encoding(config.transport.encoding);
    let mut host = HostSession::new("host", Arc::new(hub.channel(&room)), capture);
    host.on_listener_count(|n| tracing::info!("Listeners: {}", n));
    host.go_live().await?;

    let playback = PlaybackService::new(backend.clone(), config.playback.clone());
    let mut listener = ListenerSession::new("listener", Arc::new(hub.channel(&room)), playback);
    listener
        .join(|| tracing::warn!("Host left the room"))
        .await?;

    tracing::info!("Streaming room '{}' - press Ctrl+C to stop", room);

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let sent = host.stats();
                let played = listener.stats();
                tracing::info!(
                    "Stats: {} chunks published, {} dropped at capture, {} received, {} played, {} lost, {} underruns",
                    sent.chunks_published,
                    sent.chunks_dropped,
                    played.chunks_received,
                    played.chunks_played,
                    played.lost,
                    played.underrun_blocks
                );
            }
        }
    }

    tracing::info!("Shutting down");
    host.end().await;
    listener.leave().await;
    Ok(())
}
