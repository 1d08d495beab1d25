// # Routes Module
//
// - HTTP route handlers for the financial agent server, one submodule per
//   API area. Each submodule exposes `create_routes()` which `server.rs`
//   merges into the main router.

/// Health check and monitoring endpoints
pub mod health;

/// Chat and analysis endpoints backed by the agent orchestrator
pub mod agent;

/// Market data snapshot endpoint
pub mod market;

/// Session management endpoints
pub mod session;
