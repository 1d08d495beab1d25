use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::agent::orchestrator::DEFAULT_AGENT;
use crate::agent::session::SessionError;
use crate::agent::{AgentInvocationResult, SessionContext};
use crate::server::AppState;

/// Caller recorded for sessions opened by a chat request that carried
/// context but no session id.
const CHAT_CALLER: &str = "session";

/// Request body for the chat endpoint
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub session_id: Option<String>,
    pub context: Option<SessionContext>,
    pub agent_type: Option<String>,
}

/// Route a natural-language query to an agent
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<ResponseJson<AgentInvocationResult>, (StatusCode, String)> {
    if request.query.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query must not be empty".to_string()));
    }

    let agent_type = request.agent_type.as_deref().unwrap_or(DEFAULT_AGENT);
    info!("Chat query for agent '{}'", agent_type);

    let session_id = request.session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    // A named session is created on first reference so its context lands
    // before the agent sees it.
    let session_id = match (session_id, request.context) {
        (Some(session_id), Some(context)) => {
            state.sessions.get_or_create(&session_id).await;
            state.sessions.update_context(&session_id, context).await.map_err(session_error)?;
            Some(session_id)
        }
        (None, Some(context)) => {
            let session_id = state.sessions.create_session(CHAT_CALLER).await;
            state.sessions.update_context(&session_id, context).await.map_err(session_error)?;
            Some(session_id)
        }
        (session_id, None) => session_id,
    };

    let result = state.orchestrator
        .route_query(&request.query, session_id.as_deref(), agent_type)
        .await;

    Ok(ResponseJson(result))
}

/// Portfolio performance and optimisation analysis
pub async fn portfolio_analysis(
    State(state): State<AppState>,
    Json(portfolio_data): Json<Value>,
) -> Result<ResponseJson<AgentInvocationResult>, (StatusCode, String)> {
    let query = analysis_query(
        "Analyze the following portfolio data and provide:",
        &[
            "Performance analysis",
            "Risk assessment",
            "Optimization recommendations",
            "Diversification analysis",
        ],
        "Portfolio Data",
        &portfolio_data,
    )?;

    Ok(ResponseJson(state.orchestrator.route_query(&query, None, "portfolio").await))
}

/// Comprehensive risk assessment over caller-supplied data
pub async fn risk_assessment(
    State(state): State<AppState>,
    Json(risk_data): Json<Value>,
) -> Result<ResponseJson<AgentInvocationResult>, (StatusCode, String)> {
    let query = analysis_query(
        "Perform a comprehensive risk assessment based on:",
        &[
            "Market risk analysis",
            "Credit risk evaluation",
            "Operational risk factors",
            "Liquidity risk assessment",
        ],
        "Risk Data",
        &risk_data,
    )?;

    Ok(ResponseJson(state.orchestrator.route_query(&query, None, "risk").await))
}

fn analysis_query(
    heading: &str,
    points: &[&str],
    data_label: &str,
    data: &Value,
) -> Result<String, (StatusCode, String)> {
    let data = serde_json::to_string_pretty(data)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid payload: {}", e)))?;

    let numbered: Vec<String> = points
        .iter()
        .enumerate()
        .map(|(i, point)| format!("{}. {}", i + 1, point))
        .collect();

    Ok(format!("{}\n{}\n\n{}: {}", heading, numbered.join("\n"), data_label, data))
}

pub(crate) fn session_error(e: SessionError) -> (StatusCode, String) {
    match e {
        SessionError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// Create agent routes
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/portfolio-analysis", post(portfolio_analysis))
        .route("/api/v1/risk-assessment", post(risk_assessment))
}
