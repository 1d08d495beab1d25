//! # Market Module
//!
//! Concurrent market-data aggregation: per-symbol fetches from the
//! provider, technical indicators over each series, and a summary over
//! whatever symbols came back.

pub mod types;
pub mod indicators;
pub mod data_fetcher;
pub mod aggregator;

pub use aggregator::MarketAggregator;
pub use data_fetcher::{AlphaVantageClient, FundamentalsClient};
pub use types::*;
