//! # Relay Server
//!
//! Live byte stream relay: one producer per stream, any number of
//! WebSocket consumers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with a custom config file
//! RELAY_CONFIG=/path/to/relay.toml relay
//!
//! # Override single settings
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 RELAY_BROKER__INBOX_CAPACITY=4 relay
//!
//! # Push a stream and watch it
//! curl -T video.ts http://127.0.0.1:8080/publish/live/cam1
//! websocat ws://127.0.0.1:8080/subscribe/live/cam1
//! ```

mod config;
mod handlers;
mod metrics;
mod relay;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str =
    "relay=debug,relay_core=debug,relay_transport=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Relay server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter_covers_workspace_crates() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        for target in ["relay=", "relay_core=", "relay_transport=", "tower_http="] {
            assert!(
                DEFAULT_LOG_FILTER.split(',').any(|d| d.starts_with(target)),
                "missing directive for {target}"
            );
        }
    }
}
