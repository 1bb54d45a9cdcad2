//! # Fanout Server
//!
//! Room-based frame relay over UDP, WebSocket and MessagePack pub/sub.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! fanout
//!
//! # Run with environment variables
//! FANOUT_PORT=8000 FANOUT_HOST=0.0.0.0 fanout
//!
//! # More logging
//! RUST_LOG=fanout=trace fanout
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod relay;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Fanout relay on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
