use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::orchestrator::DEFAULT_AGENT;
use crate::market::{FinancialStatements, MarketDataError, MarketSnapshot};
use crate::server::AppState;

fn default_include_analysis() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct MarketDataRequest {
    pub symbols: Vec<String>,
    #[serde(default = "default_include_analysis")]
    pub include_analysis: bool,
}

#[derive(Debug, Serialize)]
pub struct MarketDataResponse {
    #[serde(flatten)]
    pub snapshot: MarketSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FundamentalsResponse {
    pub symbol: String,
    pub overview: serde_json::Value,
    pub financial_statements: FinancialStatements,
}

/// Snapshot for the requested symbols, optionally with an AI commentary
pub async fn get_market_data(
    State(state): State<AppState>,
    Json(request): Json<MarketDataRequest>,
) -> Result<ResponseJson<MarketDataResponse>, (StatusCode, String)> {
    info!("Market data requested for {} symbols", request.symbols.len());

    let snapshot = state.aggregator
        .get_snapshot(&request.symbols, state.market_fetch_timeout)
        .await;

    let ai_analysis = if request.include_analysis && !snapshot.market_data.is_empty() {
        let summary = serde_json::to_string_pretty(&snapshot.market_summary)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let mut symbols: Vec<&str> = snapshot.market_data.keys().map(String::as_str).collect();
        symbols.sort_unstable();

        let query = format!(
            "Analyze the current market data for {}\n\nMarket Summary: {}",
            symbols.join(", "),
            summary
        );
        let result = state.orchestrator.route_query(&query, None, DEFAULT_AGENT).await;
        if !result.success {
            warn!(
                "Market analysis unavailable: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        result.response
    } else {
        None
    };

    Ok(ResponseJson(MarketDataResponse {
        snapshot,
        ai_analysis,
    }))
}

/// Company overview plus income statement, balance sheet and cash flow
pub async fn get_fundamentals(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<ResponseJson<FundamentalsResponse>, (StatusCode, String)> {
    let symbol = symbol.trim().to_uppercase();
    info!("Fundamentals requested for {}", symbol);

    let (overview, financial_statements) = tokio::try_join!(
        state.fundamentals.company_overview(&symbol),
        state.fundamentals.financial_statements(&symbol),
    )
    .map_err(|e| {
        warn!("Fundamentals for {} unavailable: {}", symbol, e);
        market_error(e)
    })?;

    Ok(ResponseJson(FundamentalsResponse {
        symbol,
        overview,
        financial_statements,
    }))
}

fn market_error(e: MarketDataError) -> (StatusCode, String) {
    let status = match &e {
        MarketDataError::InvalidSymbol(_) => StatusCode::NOT_FOUND,
        MarketDataError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        MarketDataError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        MarketDataError::Transport(_)
        | MarketDataError::Http { .. }
        | MarketDataError::Malformed(_)
        | MarketDataError::EmptySeries(_) => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/market-data", post(get_market_data))
        .route("/api/v1/fundamentals/{symbol}", get(get_fundamentals))
}
