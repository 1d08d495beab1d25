//! Configuration module for environment variables and application settings

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::agent::{RoutingPolicy, UnknownSessionPolicy};
use crate::market::Interval;

#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Inference backend used by every agent
    pub agent_backend: AgentBackendConfig,

    /// Market data provider and aggregation limits
    pub market_data: MarketDataConfig,

    /// Tolerance policies for unknown agent types and sessions
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AgentBackendConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub api_key: String,
    pub base_url: String,
    pub interval: Interval,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    /// Number of most recent bars kept per symbol snapshot
    pub series_limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    /// Reject unregistered agent types instead of routing them to "general"
    pub strict_agent_routing: bool,
    /// Reject context updates for unknown sessions instead of ignoring them
    pub strict_session_updates: bool,
}

impl PolicyConfig {
    pub fn routing_policy(&self) -> RoutingPolicy {
        if self.strict_agent_routing {
            RoutingPolicy::Strict
        } else {
            RoutingPolicy::FallbackToDefault
        }
    }

    pub fn unknown_session_policy(&self) -> UnknownSessionPolicy {
        if self.strict_session_updates {
            UnknownSessionPolicy::Reject
        } else {
            UnknownSessionPolicy::Ignore
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("PORT", 3000),
            },

            agent_backend: AgentBackendConfig {
                api_key: env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow!("OPENAI_API_KEY environment variable is required"))?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com".to_string()),
                model: env::var("AGENT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                max_tokens: env_or("AGENT_MAX_TOKENS", 4000),
                temperature: env_or("AGENT_TEMPERATURE", 0.1),
                timeout: Duration::from_millis(env_or("AGENT_TIMEOUT_MS", 60_000)),
            },

            market_data: MarketDataConfig {
                api_key: env::var("ALPHA_VANTAGE_API_KEY")
                    .map_err(|_| anyhow!("ALPHA_VANTAGE_API_KEY environment variable is required"))?,
                base_url: env::var("ALPHA_VANTAGE_URL")
                    .unwrap_or_else(|_| "https://www.alphavantage.co/query".to_string()),
                interval: env_or("MARKET_INTERVAL", Interval::OneMinute),
                fetch_timeout: Duration::from_millis(env_or("MARKET_FETCH_TIMEOUT_MS", 10_000)),
                max_concurrent_fetches: env_or("MARKET_MAX_CONCURRENT_FETCHES", 8),
                series_limit: env_or("MARKET_SERIES_LIMIT", 100),
            },

            policy: PolicyConfig {
                strict_agent_routing: env_flag("STRICT_AGENT_ROUTING"),
                strict_session_updates: env_flag("STRICT_SESSION_UPDATES"),
            },
        })
    }
}

/// Parse `key`, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
