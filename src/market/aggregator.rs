use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::market::data_fetcher::MarketDataClient;
use crate::market::indicators::{
    latest, relative_strength_index, simple_moving_average, DEFAULT_RSI_PERIOD,
    DEFAULT_SMA_WINDOW,
};
use crate::market::types::{
    Interval, MarketDataError, MarketSnapshot, MarketSummary, PriceSeries, SymbolSnapshot,
    TechnicalIndicators,
};

pub const DEFAULT_SERIES_LIMIT: usize = 100;

/// Fans out per-symbol fetches and folds the survivors into a snapshot
pub struct MarketAggregator {
    client: Arc<dyn MarketDataClient>,
    interval: Interval,
    fetch_permits: Arc<Semaphore>,
    series_limit: usize,
}

impl MarketAggregator {
    pub fn new(client: Arc<dyn MarketDataClient>, max_concurrent_fetches: usize) -> Self {
        Self {
            client,
            interval: Interval::default(),
            fetch_permits: Arc::new(Semaphore::new(max_concurrent_fetches.max(1))),
            series_limit: DEFAULT_SERIES_LIMIT,
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_series_limit(mut self, series_limit: usize) -> Self {
        self.series_limit = series_limit;
        self
    }

    /// Fetch every symbol concurrently and wait for all of them to settle.
    ///
    /// A symbol whose fetch fails or exceeds `fetch_timeout` is left out of
    /// `market_data` and listed in `unavailable`; it never fails the call.
    pub async fn get_snapshot(&self, symbols: &[String], fetch_timeout: Duration) -> MarketSnapshot {
        let symbols = unique_symbols(symbols);
        if symbols.is_empty() {
            return MarketSnapshot {
                timestamp: Utc::now(),
                market_data: HashMap::new(),
                market_summary: MarketSummary::default(),
                unavailable: Vec::new(),
            };
        }

        let start_time = Instant::now();

        let fetch_tasks: Vec<_> = symbols
            .iter()
            .map(|symbol| self.fetch_symbol(symbol, fetch_timeout))
            .collect();

        let results = futures::future::join_all(fetch_tasks).await;

        let mut market_data = HashMap::new();
        let mut unavailable = Vec::new();
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(series) => match build_symbol_snapshot(&series, self.series_limit) {
                    Some(snapshot) => {
                        market_data.insert(symbol.clone(), snapshot);
                    }
                    None => {
                        warn!("No observations for {}, excluding from snapshot", symbol);
                        unavailable.push(symbol.clone());
                    }
                },
                Err(e) => {
                    warn!("Failed to fetch {} (retryable: {}): {}", symbol, e.is_retryable(), e);
                    unavailable.push(symbol.clone());
                }
            }
        }

        info!(
            "Market snapshot: {}/{} symbols in {:?}",
            market_data.len(),
            symbols.len(),
            start_time.elapsed()
        );

        let market_summary = summarize(&market_data);
        MarketSnapshot {
            timestamp: Utc::now(),
            market_data,
            market_summary,
            unavailable,
        }
    }

    async fn fetch_symbol(
        &self,
        symbol: &str,
        fetch_timeout: Duration,
    ) -> Result<PriceSeries, MarketDataError> {
        let _permit = self.fetch_permits
            .acquire()
            .await
            .map_err(|_| MarketDataError::Transport("fetch pool closed".to_string()))?;

        debug!("Fetching {} ({})", symbol, self.interval);
        match timeout(fetch_timeout, self.client.fetch_series(symbol, self.interval)).await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                symbol: symbol.to_string(),
                millis: fetch_timeout.as_millis(),
            }),
        }
    }
}

/// Trimmed, non-empty symbols in first-seen order without repeats.
fn unique_symbols(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_string()))
        .map(String::from)
        .collect()
}

/// Derive a symbol snapshot from its series; `None` for an empty series.
pub fn build_symbol_snapshot(series: &PriceSeries, series_limit: usize) -> Option<SymbolSnapshot> {
    let last = series.last()?;
    let bars = series.bars();
    let previous_close = bars
        .len()
        .checked_sub(2)
        .map(|i| bars[i].close)
        .unwrap_or(last.close);

    let closes = series.closes();
    let technical_indicators = TechnicalIndicators {
        sma_20: latest(&simple_moving_average(&closes, DEFAULT_SMA_WINDOW)),
        rsi_14: latest(&relative_strength_index(&closes, DEFAULT_RSI_PERIOD)),
    };

    let recent_start = bars.len().saturating_sub(series_limit);
    Some(SymbolSnapshot {
        symbol: series.symbol().to_string(),
        last_refreshed: last.timestamp,
        current_price: last.close,
        change: last.close - previous_close,
        volume: last.volume,
        technical_indicators,
        time_series: bars[recent_start..].to_vec(),
    })
}

/// Summary over present symbols only; an empty map yields all zeros.
pub fn summarize(market_data: &HashMap<String, SymbolSnapshot>) -> MarketSummary {
    if market_data.is_empty() {
        return MarketSummary::default();
    }

    let total_symbols = market_data.len();
    let price_sum: f64 = market_data.values().map(|s| s.current_price).sum();
    let total_change: f64 = market_data.values().map(|s| s.change).sum();

    MarketSummary {
        total_symbols,
        avg_price: price_sum / total_symbols as f64,
        total_change,
        gainers: market_data.values().filter(|s| s.change > 0.0).count(),
        losers: market_data.values().filter(|s| s.change < 0.0).count(),
    }
}
