//! # Server Module
//!
//! HTTP server setup and route configuration for the financial agent server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::{
    AgentOrchestrator, FinancialAgent, InMemorySessionStore, InferenceBackend, OpenAiBackend,
    SessionStore,
};
use crate::config::Config;
use crate::market::{AlphaVantageClient, FundamentalsClient, MarketAggregator};
use crate::routes::{agent, health, market, session};

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AgentOrchestrator>,
    pub aggregator: Arc<MarketAggregator>,
    pub fundamentals: Arc<dyn FundamentalsClient>,
    pub sessions: Arc<dyn SessionStore>,
    pub market_fetch_timeout: Duration,
}

impl AppState {
    /// Wire the core services from configuration.
    ///
    /// The session store lives as long as the returned state; nothing is
    /// persisted across restarts.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend_config = &config.agent_backend;
        let backend: Arc<dyn InferenceBackend> = Arc::new(
            OpenAiBackend::new(backend_config.api_key.clone(), backend_config.base_url.clone())?
                .with_model(backend_config.model.clone())
                .with_max_tokens(backend_config.max_tokens)
                .with_temperature(backend_config.temperature),
        );

        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(
            config.policy.unknown_session_policy(),
        ));

        let mut orchestrator = AgentOrchestrator::new(Arc::clone(&sessions), backend_config.timeout)
            .with_routing_policy(config.policy.routing_policy());
        orchestrator.register_agent("general", Arc::new(FinancialAgent::general(Arc::clone(&backend))));
        orchestrator.register_agent("portfolio", Arc::new(FinancialAgent::portfolio(Arc::clone(&backend))));
        orchestrator.register_agent("risk", Arc::new(FinancialAgent::risk(backend)));

        let market_config = &config.market_data;
        let market_client = Arc::new(AlphaVantageClient::new(
            market_config.api_key.clone(),
            market_config.base_url.clone(),
        )?);
        let aggregator = MarketAggregator::new(market_client.clone(), market_config.max_concurrent_fetches)
            .with_interval(market_config.interval)
            .with_series_limit(market_config.series_limit);

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            aggregator: Arc::new(aggregator),
            fundamentals: market_client,
            sessions,
            market_fetch_timeout: market_config.fetch_timeout,
        })
    }
}

/// Assemble the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(health::ping))
        .route("/health", get(health::health))
        .merge(agent::create_routes())
        .merge(market::create_routes())
        .merge(session::create_routes())
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([
                            axum::http::Method::GET,
                            axum::http::Method::POST,
                            axum::http::Method::OPTIONS,
                        ])
                        .allow_headers([
                            axum::http::header::ORIGIN,
                            axum::http::header::CONTENT_TYPE,
                            axum::http::header::ACCEPT,
                        ])
                )
        )
        .with_state(state)
}

/// Starts the HTTP server and serves until the process is terminated.
pub async fn start(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {} - port may already be in use", addr))?;

    tracing::info!("🚀 Financial agent server listening on http://{}", addr);
    tracing::info!("🏥 Health check available at http://{}/ping", addr);
    tracing::info!("🤖 Chat endpoint available at http://{}/api/v1/chat", addr);
    tracing::info!("📊 Market data endpoint available at http://{}/api/v1/market-data", addr);
    tracing::info!("🏢 Fundamentals endpoint available at http://{}/api/v1/fundamentals/{{symbol}}", addr);

    axum::serve(listener, app).await.context("Server terminated unexpectedly")?;
    Ok(())
}
