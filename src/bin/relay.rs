//! Relay Server Application
//!
//! Forwards every message between connected sender and receiver clients.
//! Usage: `relay [--public] [port]`. `--public` listens on all interfaces.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ws_audio_stream::{config::AppConfig, relay::RelayServer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::load_default()?;
    for arg in std::env::args().skip(1) {
        if arg == "--public" {
            config.relay.bind_address = "0.0.0.0".to_string();
        } else {
            config.relay.port = arg
                .parse()
                .with_context(|| format!("invalid port {:?}", arg))?;
        }
    }

    let server = RelayServer::bind(&config.relay).await?;
    let hub = server.hub();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            let stats = hub.stats();
            tracing::info!(
                "Relay stopped after {}s: {} messages, {} bytes, longest {} bytes, {} dropped",
                stats.uptime_seconds,
                stats.messages,
                stats.bytes,
                stats.longest_message,
                stats.dropped
            );
        }
    }

    Ok(())
}
