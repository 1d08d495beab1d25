use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::agent::ai_client::InferenceBackend;
use crate::agent::session::{Session, SessionStore, Turn, TurnRole};
use crate::agent::stream::ResponseStreamAccumulator;
use crate::agent::types::{AgentError, AgentInvocationResult, BackendRequest, EventStream};

pub const DEFAULT_AGENT: &str = "general";

/// Caller name used for sessions generated when a query arrives without one.
const IMPLICIT_SESSION_CALLER: &str = "session";

/// How to treat an agent type with no registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingPolicy {
    #[default]
    FallbackToDefault,
    Strict,
}

/// A specialised agent the orchestrator can route to.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    fn name(&self) -> &str;

    fn build_request(&self, query: &str, session: &Session) -> BackendRequest;

    async fn invoke(&self, request: BackendRequest) -> Result<EventStream, AgentError>;
}

/// Financial analysis agent backed by the shared inference backend
pub struct FinancialAgent {
    name: String,
    focus: String,
    backend: Arc<dyn InferenceBackend>,
}

impl FinancialAgent {
    pub fn new(name: impl Into<String>, focus: impl Into<String>, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            name: name.into(),
            focus: focus.into(),
            backend,
        }
    }

    pub fn general(backend: Arc<dyn InferenceBackend>) -> Self {
        Self::new(
            DEFAULT_AGENT,
            "financial analysis and modeling, investment research, portfolio optimization, \
             market analysis and forecasting, and quantitative and fundamental analysis",
            backend,
        )
    }

    pub fn portfolio(backend: Arc<dyn InferenceBackend>) -> Self {
        Self::new(
            "portfolio",
            "portfolio construction, performance attribution, diversification and rebalancing",
            backend,
        )
    }

    pub fn risk(backend: Arc<dyn InferenceBackend>) -> Self {
        Self::new(
            "risk",
            "market, credit, liquidity and operational risk assessment",
            backend,
        )
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"You are a financial AI agent specialising in {}.

For every query provide:
1. Key insights and findings
2. Data-driven recommendations
3. Risk assessment
4. Actionable next steps

Format your response for professional financial reporting."#,
            self.focus
        )
    }
}

#[async_trait]
impl AgentHandler for FinancialAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_request(&self, query: &str, session: &Session) -> BackendRequest {
        BackendRequest {
            system_prompt: self.system_prompt(),
            prompt: format!("Current Query: {}", query),
            session_id: session.session_id.clone(),
            context: (!session.context.is_empty()).then(|| session.context.clone()),
        }
    }

    async fn invoke(&self, request: BackendRequest) -> Result<EventStream, AgentError> {
        self.backend.invoke(request).await
    }
}

/// Routes queries to registered agents and folds every outcome into an
/// [`AgentInvocationResult`].
pub struct AgentOrchestrator {
    agents: HashMap<String, Arc<dyn AgentHandler>>,
    sessions: Arc<dyn SessionStore>,
    routing: RoutingPolicy,
    invocation_timeout: Duration,
}

impl AgentOrchestrator {
    pub fn new(sessions: Arc<dyn SessionStore>, invocation_timeout: Duration) -> Self {
        Self {
            agents: HashMap::new(),
            sessions,
            routing: RoutingPolicy::default(),
            invocation_timeout,
        }
    }

    pub fn with_routing_policy(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    pub fn register_agent(&mut self, agent_type: impl Into<String>, handler: Arc<dyn AgentHandler>) {
        let agent_type = agent_type.into();
        info!("Registered agent '{}' ({})", agent_type, handler.name());
        self.agents.insert(agent_type, handler);
    }

    pub fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.agents.keys().cloned().collect();
        types.sort();
        types
    }

    #[cfg(test)]
    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// Route `query` to the agent registered for `agent_type`.
    ///
    /// Never returns an error: every failure below this point comes back as
    /// a result with `success == false`. A query rejected during routing
    /// leaves no session behind.
    pub async fn route_query(
        &self,
        query: &str,
        session_id: Option<&str>,
        agent_type: &str,
    ) -> AgentInvocationResult {
        let handler = match self.resolve_handler(agent_type) {
            Ok(handler) => handler,
            Err(e) => {
                error!("Query rejected during routing: {}", e);
                return AgentInvocationResult::failed(session_id.unwrap_or_default(), e);
            }
        };
        let session = self.resolve_session(session_id).await;
        let session_id = session.session_id.clone();

        let outcome = AssertUnwindSafe(self.invoke(handler, query, &session))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(AgentError::Backend("agent handler panicked".to_string())));

        match outcome {
            Ok(response) => {
                let turns = vec![
                    Turn::new(TurnRole::User, query),
                    Turn::new(TurnRole::Assistant, response.as_str()),
                ];
                if let Err(e) = self.sessions.append_turns(&session_id, turns).await {
                    warn!("Could not record history for {}: {}", session_id, e);
                }
                AgentInvocationResult::succeeded(session_id, response)
            }
            Err(e) => {
                error!("Query for session {} failed: {}", session_id, e);
                AgentInvocationResult::failed(session_id, e)
            }
        }
    }

    fn resolve_handler(&self, agent_type: &str) -> Result<Arc<dyn AgentHandler>, AgentError> {
        if let Some(handler) = self.agents.get(agent_type) {
            return Ok(Arc::clone(handler));
        }

        match self.routing {
            RoutingPolicy::Strict => Err(AgentError::UnknownAgent(agent_type.to_string())),
            RoutingPolicy::FallbackToDefault => {
                info!("Unknown agent type '{}', routing to '{}'", agent_type, DEFAULT_AGENT);
                self.agents
                    .get(DEFAULT_AGENT)
                    .cloned()
                    .ok_or(AgentError::NoDefaultHandler)
            }
        }
    }

    async fn resolve_session(&self, session_id: Option<&str>) -> Session {
        match session_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self.sessions.get_or_create(id).await,
            None => {
                let id = self.sessions.create_session(IMPLICIT_SESSION_CALLER).await;
                self.sessions.get_or_create(&id).await
            }
        }
    }

    async fn invoke(
        &self,
        handler: Arc<dyn AgentHandler>,
        query: &str,
        session: &Session,
    ) -> Result<String, AgentError> {
        let request = handler.build_request(query, session);

        let run = async {
            let stream = handler.invoke(request).await?;
            let text = ResponseStreamAccumulator::new().collect(stream).await?;
            Ok::<_, AgentError>(text)
        };

        timeout(self.invocation_timeout, run)
            .await
            .map_err(|_| AgentError::Timeout(self.invocation_timeout.as_millis()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::session::InMemorySessionStore;
    use crate::agent::types::StreamEvent;
    use futures::stream::{self, StreamExt};
    use serde_json::{json, Map};
    use std::sync::Mutex;

    enum Script {
        Reply(Vec<&'static str>),
        FailMidStream(Vec<&'static str>),
        RejectRequest,
        Hang,
        Panic,
    }

    struct ScriptedBackend {
        script: Script,
        last_request: Mutex<Option<BackendRequest>>,
    }

    impl ScriptedBackend {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                last_request: Mutex::new(None),
            })
        }

        fn last_request(&self) -> Option<BackendRequest> {
            self.last_request.lock().unwrap().clone()
        }
    }

    fn fragments(parts: &[&'static str]) -> Vec<Result<StreamEvent, AgentError>> {
        parts.iter().map(|p| Ok(StreamEvent::Fragment(p.to_string()))).collect()
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn invoke(&self, request: BackendRequest) -> Result<EventStream, AgentError> {
            *self.last_request.lock().unwrap() = Some(request);

            match &self.script {
                Script::Reply(parts) => {
                    let mut events = fragments(parts);
                    events.push(Ok(StreamEvent::Terminal));
                    Ok(stream::iter(events).boxed())
                }
                Script::FailMidStream(parts) => {
                    let mut events = fragments(parts);
                    events.push(Err(AgentError::Backend("connection reset".to_string())));
                    Ok(stream::iter(events).boxed())
                }
                Script::RejectRequest => Err(AgentError::Backend("OpenAI API error 401".to_string())),
                Script::Hang => Ok(stream::pending::<Result<StreamEvent, AgentError>>().boxed()),
                Script::Panic => panic!("backend exploded"),
            }
        }
    }

    fn orchestrator(backend: Arc<ScriptedBackend>, routing: RoutingPolicy) -> AgentOrchestrator {
        let sessions = Arc::new(InMemorySessionStore::default());
        let mut orchestrator = AgentOrchestrator::new(sessions, Duration::from_millis(200))
            .with_routing_policy(routing);
        orchestrator.register_agent("general", Arc::new(FinancialAgent::general(backend.clone())));
        orchestrator.register_agent("risk", Arc::new(FinancialAgent::risk(backend)));
        orchestrator
    }

    #[tokio::test]
    async fn test_unknown_agent_type_falls_back_to_general() {
        let backend = ScriptedBackend::new(Script::Reply(vec!["Hel", "lo, ", "world"]));
        let orchestrator = orchestrator(backend.clone(), RoutingPolicy::FallbackToDefault);

        let result = orchestrator.route_query("How is AAPL doing?", None, "nonexistent").await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.response.as_deref(), Some("Hello, world"));
        assert!(result.session_id.starts_with("session_"));
        assert!(result.error.is_none());

        let request = backend.last_request().unwrap();
        assert!(request.system_prompt.contains("financial analysis and modeling"));
        assert_eq!(request.session_id, result.session_id);
    }

    #[tokio::test]
    async fn test_strict_routing_rejects_unknown_agent_type() {
        let backend = ScriptedBackend::new(Script::Reply(vec!["unused"]));
        let orchestrator = orchestrator(backend.clone(), RoutingPolicy::Strict);

        let result = orchestrator.route_query("q", Some("s-1"), "astrology").await;

        assert!(!result.success);
        assert_eq!(result.session_id, "s-1");
        assert_eq!(result.error.as_deref(), Some("Unknown agent type: astrology"));
        assert!(backend.last_request().is_none());
        assert!(orchestrator.sessions().get_session("s-1").await.is_none());
    }

    #[tokio::test]
    async fn test_strict_rejection_without_session_id_creates_nothing() {
        let backend = ScriptedBackend::new(Script::Reply(vec!["unused"]));
        let sessions = Arc::new(InMemorySessionStore::default());
        let mut orchestrator = AgentOrchestrator::new(sessions.clone(), Duration::from_secs(1))
            .with_routing_policy(RoutingPolicy::Strict);
        orchestrator.register_agent("general", Arc::new(FinancialAgent::general(backend)));

        let result = orchestrator.route_query("q", None, "astrology").await;

        assert!(!result.success);
        assert!(result.session_id.is_empty());
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_missing_default_handler_is_a_failure_result() {
        let sessions = Arc::new(InMemorySessionStore::default());
        let orchestrator = AgentOrchestrator::new(sessions, Duration::from_secs(1));

        let result = orchestrator.route_query("q", None, "general").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No default agent registered"));
        assert!(orchestrator.sessions().get_session(&result.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_request_carries_session_context_and_history_is_recorded() {
        let backend = ScriptedBackend::new(Script::Reply(vec!["Hedge ", "duration."]));
        let orchestrator = orchestrator(backend.clone(), RoutingPolicy::FallbackToDefault);
        let sessions = orchestrator.sessions();

        let session_id = sessions.create_session("trader7").await;
        let mut context = Map::new();
        context.insert("portfolio".to_string(), json!(["TLT", "IEF"]));
        sessions.update_context(&session_id, context).await.unwrap();

        let result = orchestrator
            .route_query("What is my rate risk?", Some(session_id.as_str()), "risk")
            .await;
        assert!(result.success);
        assert_eq!(result.session_id, session_id);

        let request = backend.last_request().unwrap();
        assert_eq!(request.prompt, "Current Query: What is my rate risk?");
        assert_eq!(request.context.unwrap()["portfolio"], json!(["TLT", "IEF"]));
        assert!(request.system_prompt.contains("risk assessment"));

        let history = sessions.get_session(&session_id).await.unwrap().history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, TurnRole::User);
        assert_eq!(history[1].content, "Hedge duration.");
    }

    #[tokio::test]
    async fn test_unknown_session_id_is_created_on_route() {
        let backend = ScriptedBackend::new(Script::Reply(vec!["ok"]));
        let orchestrator = orchestrator(backend.clone(), RoutingPolicy::FallbackToDefault);

        let result = orchestrator.route_query("q", Some("session_1724500000.5"), "general").await;
        assert!(result.success);
        assert!(orchestrator.sessions().get_session("session_1724500000.5").await.is_some());
        assert!(backend.last_request().unwrap().context.is_none());
    }

    #[tokio::test]
    async fn test_stream_fault_yields_failure_without_partial_text() {
        let backend = ScriptedBackend::new(Script::FailMidStream(vec!["The market is"]));
        let orchestrator = orchestrator(backend, RoutingPolicy::FallbackToDefault);

        let result = orchestrator.route_query("q", Some("s-2"), "general").await;

        assert!(!result.success);
        assert!(result.response.is_none());
        let error = result.error.unwrap();
        assert!(error.contains("connection reset"), "{}", error);
        assert!(!error.contains("The market is"));

        let session = orchestrator.sessions().get_session("s-2").await.unwrap();
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn test_backend_rejection_is_a_failure_result() {
        let backend = ScriptedBackend::new(Script::RejectRequest);
        let orchestrator = orchestrator(backend, RoutingPolicy::FallbackToDefault);

        let result = orchestrator.route_query("q", None, "general").await;
        assert!(!result.success);
        assert!(!result.session_id.is_empty());
        assert!(result.error.unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_hung_stream_times_out() {
        let backend = ScriptedBackend::new(Script::Hang);
        let orchestrator = orchestrator(backend, RoutingPolicy::FallbackToDefault);

        let result = orchestrator.route_query("q", None, "general").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Agent invocation timed out after 200 ms"));
    }

    #[tokio::test]
    async fn test_panicking_backend_is_contained() {
        let backend = ScriptedBackend::new(Script::Panic);
        let orchestrator = orchestrator(backend, RoutingPolicy::FallbackToDefault);

        let result = orchestrator.route_query("q", None, "general").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Inference backend error: agent handler panicked"));
    }

    #[test]
    fn test_agent_types_are_sorted() {
        let backend = ScriptedBackend::new(Script::Reply(vec![]));
        let orchestrator = orchestrator(backend, RoutingPolicy::FallbackToDefault);
        assert_eq!(orchestrator.agent_types(), vec!["general", "risk"]);
    }
}
