use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::agent::session::{ContextUpdate, Session};
use crate::agent::SessionContext;
use crate::routes::agent::session_error;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub caller_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<ResponseJson<CreateSessionResponse>, (StatusCode, String)> {
    let caller_id = request.caller_id.trim();
    if caller_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "caller_id must not be empty".to_string()));
    }

    let session_id = state.sessions.create_session(caller_id).await;
    Ok(ResponseJson(CreateSessionResponse { session_id }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<ResponseJson<Session>, (StatusCode, String)> {
    state.sessions
        .get_session(&session_id)
        .await
        .map(ResponseJson)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Session not found: {}", session_id)))
}

pub async fn update_context(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(context): Json<SessionContext>,
) -> Result<ResponseJson<ContextUpdate>, (StatusCode, String)> {
    state.sessions
        .update_context(&session_id, context)
        .await
        .map(ResponseJson)
        .map_err(session_error)
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/sessions", post(create_session))
        .route("/api/v1/sessions/{session_id}", get(get_session))
        .route("/api/v1/sessions/{session_id}/context", post(update_context))
}
