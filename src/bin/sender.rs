//! Audio Sender Application
//!
//! Captures audio from an input device and streams it to the relay.
//! Optional first argument: relay url. Control messages are read as JSON
//! lines from stdin, e.g. `{"type":"stop"}`.

use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ws_audio_stream::{
    audio::{
        capture::{AudioCapture, CaptureProcessor},
        device::{list_devices, Direction},
    },
    config::AppConfig,
    network::WebSocketConnector,
    pipeline::CompressTask,
    protocol::{ControlMessage, StartRequest},
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

    tracing::info!("Starting audio sender");

    let mut config = AppConfig::load_default()?;
    if let Some(url) = std::env::args().nth(1) {
        config.network.url = url;
    }
    config.validate()?;

    println!("\n=== Input Devices ===");
    for device in list_devices().iter().filter(|d| d.direction == Direction::Input) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let (processor, frames) = CaptureProcessor::new(&config.audio);
    let mut capture = AudioCapture::new(&config.audio, processor);

    let connector = Arc::new(WebSocketConnector::new(&config.network));
    let mut task = CompressTask::new(&config, frames, connector, Handle::current());
    task.start(&StartRequest::default())?;
    capture.start()?;

    tracing::info!(
        "Capturing {} Hz, {} channels, {} samples per frame - press Ctrl+C to stop",
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.frame_capacity
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut status = task.status();
    let mut ticker = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match ControlMessage::parse(&line) {
                    Ok(ControlMessage::Stop) => break,
                    Ok(message) => {
                        if let Err(e) = task.handle(&message) {
                            tracing::error!("Control message failed: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring control line {:?}: {}", line, e),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("stdin unreadable: {}", e);
                    stdin_open = false;
                }
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.is_faulted() {
                    tracing::error!("Compress task faulted: {:?}", current);
                    break;
                }
            }
            _ = ticker.tick() => {
                while let Some(e) = capture.check_errors() {
                    tracing::warn!("Input stream error: {}", e);
                }
                let capture_stats = capture.stats();
                let stats = task.stats();
                tracing::info!(
                    "Stats: {} frames sealed, {} dropped at hand-off, {} chunks sent ({:.1} KB), {} dropped, {} flushes",
                    capture_stats.frames_sealed.load(Ordering::Relaxed),
                    capture_stats.frames_dropped.load(Ordering::Relaxed),
                    stats.chunks_sent.load(Ordering::Relaxed),
                    stats.bytes_sent.load(Ordering::Relaxed) as f64 / 1024.0,
                    stats.chunks_dropped.load(Ordering::Relaxed),
                    stats.flushes.load(Ordering::Relaxed),
                );
            }
        }
    }

    capture.stop();
    task.handle(&ControlMessage::Stop)?;
    tracing::info!("Sender stopped");
    Ok(())
}
