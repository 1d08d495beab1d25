use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLCV observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Time series for one symbol, strictly increasing by timestamp.
///
/// Built once per fetch and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    symbol: String,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<PriceBar>) -> Result<Self, MarketDataError> {
        let symbol = symbol.into();
        if let Some(pair) = bars.windows(2).find(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(MarketDataError::Malformed(format!(
                "{}: timestamps not strictly increasing at {}",
                symbol, pair[1].timestamp
            )));
        }
        Ok(Self { symbol, bars })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }
}

/// Intraday bar interval accepted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "60min")]
    SixtyMinutes,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1min",
            Interval::FiveMinutes => "5min",
            Interval::FifteenMinutes => "15min",
            Interval::ThirtyMinutes => "30min",
            Interval::SixtyMinutes => "60min",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1min" => Ok(Interval::OneMinute),
            "5min" => Ok(Interval::FiveMinutes),
            "15min" => Ok(Interval::FifteenMinutes),
            "30min" => Ok(Interval::ThirtyMinutes),
            "60min" => Ok(Interval::SixtyMinutes),
            other => Err(format!("Unknown interval: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalIndicators {
    pub sma_20: Option<f64>,
    pub rsi_14: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub last_refreshed: DateTime<Utc>,
    pub current_price: f64,
    pub change: f64,
    pub volume: u64,
    pub technical_indicators: TechnicalIndicators,
    pub time_series: Vec<PriceBar>,
}

/// Aggregate statistics over the symbols that were fetched successfully.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketSummary {
    pub total_symbols: usize,
    pub avg_price: f64,
    pub total_change: f64,
    pub gainers: usize,
    pub losers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub market_data: HashMap<String, SymbolSnapshot>,
    pub market_summary: MarketSummary,
    /// Symbols whose fetch failed or timed out. Never counted in the summary.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
}

/// Annual and quarterly reports as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialStatements {
    pub income_statement: serde_json::Value,
    pub balance_sheet: serde_json::Value,
    pub cash_flow: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Market data transport error: {0}")]
    Transport(String),

    #[error("Market data provider returned HTTP {status} for {symbol}")]
    Http { symbol: String, status: u16 },

    #[error("Market data provider rate limit: {0}")]
    RateLimited(String),

    #[error("Unknown or invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Malformed market data: {0}")]
    Malformed(String),

    #[error("No observations returned for {0}")]
    EmptySeries(String),

    #[error("Fetch for {symbol} timed out after {millis} ms")]
    Timeout { symbol: String, millis: u128 },
}

impl MarketDataError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MarketDataError::Transport(_)
            | MarketDataError::RateLimited(_)
            | MarketDataError::Timeout { .. } => true,
            MarketDataError::Http { status, .. } => *status == 429 || *status >= 500,
            MarketDataError::InvalidSymbol(_)
            | MarketDataError::Malformed(_)
            | MarketDataError::EmptySeries(_) => false,
        }
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(e: reqwest::Error) -> Self {
        MarketDataError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(minute: u32, close: f64) -> PriceBar {
        PriceBar {
            timestamp: Utc.with_ymd_and_hms(2025, 8, 1, 14, minute, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
        }
    }

    #[test]
    fn test_series_rejects_out_of_order_bars() {
        let result = PriceSeries::new("AAPL", vec![bar(2, 1.0), bar(1, 2.0)]);
        assert!(matches!(result, Err(MarketDataError::Malformed(_))));

        let duplicate = PriceSeries::new("AAPL", vec![bar(1, 1.0), bar(1, 2.0)]);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("15min".parse::<Interval>().unwrap(), Interval::FifteenMinutes);
        assert_eq!(Interval::SixtyMinutes.to_string(), "60min");
        assert!("2min".parse::<Interval>().is_err());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(MarketDataError::RateLimited("slow down".into()).is_retryable());
        assert!(MarketDataError::Http { symbol: "X".into(), status: 503 }.is_retryable());
        assert!(!MarketDataError::Http { symbol: "X".into(), status: 404 }.is_retryable());
        assert!(!MarketDataError::InvalidSymbol("X".into()).is_retryable());
    }
}
