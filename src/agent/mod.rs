pub mod types;
pub mod stream;
pub mod session;
pub mod ai_client;
pub mod orchestrator;

pub use ai_client::{InferenceBackend, OpenAiBackend};
pub use orchestrator::{AgentOrchestrator, FinancialAgent, RoutingPolicy};
pub use session::{InMemorySessionStore, SessionStore, UnknownSessionPolicy};
pub use types::*;
