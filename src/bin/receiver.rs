//! Audio Receiver Application
//!
//! Receives the stream from the relay and plays it on an output device.
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
        device::{list_devices, Direction},
        playback::{AudioPlayback, PlaybackQueue},
    },
    config::AppConfig,
    network::WebSocketConnector,
    pipeline::DecompressTask,
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

    tracing::info!("Starting audio receiver");

    let mut config = AppConfig::load_default()?;
    if let Some(url) = std::env::args().nth(1) {
        config.network.url = url;
    }
    config.validate()?;

    println!("\n=== Output Devices ===");
    for device in list_devices().iter().filter(|d| d.direction == Direction::Output) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let queue = PlaybackQueue::new(&config.playback);
    let mut playback = AudioPlayback::new(&config.audio, queue.processor());

    let connector = Arc::new(WebSocketConnector::new(&config.network));
    let mut task = DecompressTask::new(&config, queue.clone(), connector, Handle::current());
    task.start(&StartRequest::default())?;
    playback.start()?;

    tracing::info!(
        "Playing {} Hz, {} channels, starting after {} queued blocks - press Ctrl+C to stop",
        config.audio.sample_rate,
        config.audio.channels,
        config.playback.watermark + 1
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
                    tracing::error!("Decompress task faulted: {:?}", current);
                    break;
                }
            }
            _ = ticker.tick() => {
                while let Some(e) = playback.check_errors() {
                    tracing::warn!("Output stream error: {}", e);
                }
                let playing = queue.monitor().snapshot();
                let stats = task.stats();
                tracing::info!(
                    "Stats: {:?}, {} pending, {} underruns, {} chunks, {} malformed, {} dropped",
                    playing.state,
                    playing.pending,
                    playing.underruns,
                    stats.chunks.load(Ordering::Relaxed),
                    stats.malformed.load(Ordering::Relaxed),
                    stats.blocks_dropped.load(Ordering::Relaxed) + queue.inbox_overflows() as u64,
                );
            }
        }
    }

    task.handle(&ControlMessage::Stop)?;
    playback.stop();
    tracing::info!("Receiver stopped");
    Ok(())
}
