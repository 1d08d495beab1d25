use chrono::Utc;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::agent::session::SessionError;
use crate::agent::stream::StreamError;

/// Structured context attached to a session.
pub type SessionContext = Map<String, Value>;

/// One event from the inference backend's response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Fragment(String),
    Terminal,
}

/// Incremental response from the inference backend.
pub type EventStream = BoxStream<'static, Result<StreamEvent, AgentError>>;

/// Everything the inference backend needs for one invocation
#[derive(Debug, Clone, Serialize)]
pub struct BackendRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub session_id: String,
    pub context: Option<SessionContext>,
}

/// Outcome of routing a query, returned by value to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub session_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentInvocationResult {
    pub fn succeeded(session_id: impl Into<String>, response: String) -> Self {
        Self {
            success: true,
            response: Some(response),
            session_id: session_id.into(),
            timestamp: Utc::now().to_rfc3339(),
            error: None,
        }
    }

    pub fn failed(session_id: impl Into<String>, error: impl ToString) -> Self {
        Self {
            success: false,
            response: None,
            session_id: session_id.into(),
            timestamp: Utc::now().to_rfc3339(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Inference backend error: {0}")]
    Backend(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("Agent invocation timed out after {0} ms")]
    Timeout(u128),

    #[error("Unknown agent type: {0}")]
    UnknownAgent(String),

    #[error("No default agent registered")]
    NoDefaultHandler,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
