//! # FinAgent Server
//!
//! Financial analysis agent server built with Rust, Axum, and Tokio. Routes
//! natural-language queries to specialised AI agents and serves aggregated
//! market data snapshots.
//!
//! ## Architecture
//! The server is organized into modules:
//! - `server`: Core server initialization and router assembly
//! - `config`: Environment variable configuration management
//! - `agent`: Agent orchestration, sessions, and the streaming inference backend
//! - `market`: Market data fetching, indicators, and snapshot aggregation
//! - `routes`: HTTP route handlers organized by functionality
//!   - `health`: Health check and monitoring endpoints
//!   - `agent`: Chat and analysis endpoints
//!   - `market`: Market data endpoint
//!   - `session`: Session management endpoints
//!
//! ## Environment Setup
//! `OPENAI_API_KEY` and `ALPHA_VANTAGE_API_KEY` are required. A `.env` file in
//! the working directory is loaded if present.
//!
//! ## Running the Server
//! ```bash
//! cargo run
//! curl http://localhost:3000/ping
//! ```

mod server;
mod routes;
mod agent;
mod market;
mod config;

use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

use crate::config::Config;

/// Application entry point.
///
/// Loads configuration, initializes logging, and runs the HTTP server until
/// the process is terminated.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber
        ::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt
                ::layer()
                .with_target(false)
                .compact()
        )
        .init();

    tracing::info!("🏁 Starting FinAgent Server...");
    tracing::info!("📦 Package: {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!(
        "⚙️  Agent model: {}, market interval: {}",
        config.agent_backend.model,
        config.market_data.interval
    );

    server::start(config).await
}
