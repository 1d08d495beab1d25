use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::types::SessionContext;

/// Caller recorded for sessions created implicitly by routing.
pub const ANONYMOUS_CALLER: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Conversational state for one caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_id: String,
    pub caller_id: String,
    pub created_at: DateTime<Utc>,
    pub context: SessionContext,
    pub history: Vec<Turn>,
    /// Bumped by every context update; the highest revision wrote last.
    pub revision: u64,
}

impl Session {
    fn new(session_id: String, caller_id: &str) -> Self {
        Self {
            session_id,
            caller_id: caller_id.to_string(),
            created_at: Utc::now(),
            context: SessionContext::new(),
            history: Vec::new(),
            revision: 0,
        }
    }
}

/// What to do when a context update names a session that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownSessionPolicy {
    #[default]
    Ignore,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ContextUpdate {
    Applied { revision: u64 },
    Ignored,
}

/// Keyed session state shared by all request handlers.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a fresh session for `caller_id` and return its identifier.
    async fn create_session(&self, caller_id: &str) -> String;

    /// Look up `session_id`, creating an empty session under that id if absent.
    async fn get_or_create(&self, session_id: &str) -> Session;

    /// Merge `partial` into the session context, last write wins per key.
    async fn update_context(
        &self,
        session_id: &str,
        partial: SessionContext,
    ) -> Result<ContextUpdate, SessionError>;

    async fn append_turns(&self, session_id: &str, turns: Vec<Turn>) -> Result<(), SessionError>;

    async fn get_session(&self, session_id: &str) -> Option<Session>;
}

/// Process-lifetime session store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
    unknown_policy: UnknownSessionPolicy,
}

impl InMemorySessionStore {
    pub fn new(unknown_policy: UnknownSessionPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            unknown_policy,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn generate_session_id(caller_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", caller_id, Utc::now().timestamp_micros(), &suffix[..8])
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, caller_id: &str) -> String {
        loop {
            let session_id = generate_session_id(caller_id);
            if let Entry::Vacant(slot) = self.sessions.entry(session_id.clone()) {
                slot.insert(Session::new(session_id.clone(), caller_id));
                info!("Created session {}", session_id);
                return session_id;
            }
        }
    }

    async fn get_or_create(&self, session_id: &str) -> Session {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!("Implicitly created session {}", session_id);
                Session::new(session_id.to_string(), ANONYMOUS_CALLER)
            })
            .clone()
    }

    async fn update_context(
        &self,
        session_id: &str,
        partial: SessionContext,
    ) -> Result<ContextUpdate, SessionError> {
        // get_mut holds the shard write lock for the whole merge
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.context.extend(partial);
                session.revision += 1;
                Ok(ContextUpdate::Applied { revision: session.revision })
            }
            None => match self.unknown_policy {
                UnknownSessionPolicy::Ignore => {
                    debug!("Ignoring context update for unknown session {}", session_id);
                    Ok(ContextUpdate::Ignored)
                }
                UnknownSessionPolicy::Reject => Err(SessionError::NotFound(session_id.to_string())),
            },
        }
    }

    async fn append_turns(&self, session_id: &str, turns: Vec<Turn>) -> Result<(), SessionError> {
        let mut session = self.sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.history.extend(turns);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }
}
