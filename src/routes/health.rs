use axum::extract::State;
use axum::response::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::server::AppState;

/// Health check endpoint handler.
///
/// Lightweight liveness probe for load balancers and container
/// orchestrators.
///
/// # Route
/// - **Method**: GET
/// - **Path**: `/ping`
///
/// # Examples
/// ```bash
/// curl http://localhost:3000/ping
/// # Response: {"status":"pong"}
/// ```
pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "pong" }))
}

/// Detailed health check listing the services and registered agents.
///
/// # Route
/// - **Method**: GET
/// - **Path**: `/health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "services": {
            "agent_orchestrator": "active",
            "market_aggregator": "active",
            "session_store": "active"
        },
        "agents": state.orchestrator.agent_types(),
        "timestamp": Utc::now().to_rfc3339()
    }))
}
