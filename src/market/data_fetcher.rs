use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::market::types::{FinancialStatements, Interval, MarketDataError, PriceBar, PriceSeries};

const ALPHA_VANTAGE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source of per-symbol price history.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn fetch_series(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<PriceSeries, MarketDataError>;
}

/// Source of company fundamentals.
#[async_trait]
pub trait FundamentalsClient: Send + Sync {
    async fn company_overview(&self, symbol: &str) -> Result<Value, MarketDataError>;

    async fn financial_statements(&self, symbol: &str) -> Result<FinancialStatements, MarketDataError>;
}

/// Alpha Vantage client for intraday series and company fundamentals
pub struct AlphaVantageClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageClient {
    pub fn new(api_key: String, base_url: String) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    /// Run one `function` query for `symbol` and screen the payload for
    /// provider-level errors.
    async fn query(&self, function: &str, symbol: &str) -> Result<Value, MarketDataError> {
        let response = self.client
            .get(&self.base_url)
            .query(&[
                ("function", function),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MarketDataError::Http {
                symbol: symbol.to_string(),
                status: response.status().as_u16(),
            });
        }

        let json: Value = response.json().await?;
        check_fundamentals_payload(symbol, json)
    }
}

#[async_trait]
impl MarketDataClient for AlphaVantageClient {
    async fn fetch_series(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<PriceSeries, MarketDataError> {
        let response = self.client
            .get(&self.base_url)
            .query(&[
                ("function", "TIME_SERIES_INTRADAY"),
                ("symbol", symbol),
                ("interval", interval.as_str()),
                ("outputsize", "compact"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MarketDataError::Http {
                symbol: symbol.to_string(),
                status: response.status().as_u16(),
            });
        }

        let json: Value = response.json().await?;
        let series = parse_intraday_response(symbol, &json)?;

        debug!("Fetched {} bars for {} ({})", series.bars().len(), symbol, interval);
        Ok(series)
    }
}

#[async_trait]
impl FundamentalsClient for AlphaVantageClient {
    async fn company_overview(&self, symbol: &str) -> Result<Value, MarketDataError> {
        self.query("OVERVIEW", symbol).await
    }

    async fn financial_statements(&self, symbol: &str) -> Result<FinancialStatements, MarketDataError> {
        let (income_statement, balance_sheet, cash_flow) = tokio::try_join!(
            self.query("INCOME_STATEMENT", symbol),
            self.query("BALANCE_SHEET", symbol),
            self.query("CASH_FLOW", symbol),
        )?;

        debug!("Fetched financial statements for {}", symbol);
        Ok(FinancialStatements {
            income_statement,
            balance_sheet,
            cash_flow,
        })
    }
}

fn provider_error(symbol: &str, json: &Value) -> Option<MarketDataError> {
    if let Some(message) = json.get("Error Message").and_then(Value::as_str) {
        return Some(MarketDataError::InvalidSymbol(format!("{}: {}", symbol, message)));
    }
    json.get("Note")
        .or_else(|| json.get("Information"))
        .and_then(Value::as_str)
        .map(|note| MarketDataError::RateLimited(note.to_string()))
}

/// Screen an `OVERVIEW` or statement payload. The provider answers an
/// unknown symbol with an empty object rather than an error message.
pub fn check_fundamentals_payload(symbol: &str, json: Value) -> Result<Value, MarketDataError> {
    if let Some(e) = provider_error(symbol, &json) {
        return Err(e);
    }
    match json.as_object() {
        Some(obj) if obj.is_empty() => Err(MarketDataError::InvalidSymbol(symbol.to_string())),
        Some(_) => Ok(json),
        None => Err(MarketDataError::Malformed(format!("{}: expected a JSON object", symbol))),
    }
}

/// Parse a `TIME_SERIES_INTRADAY` payload into an ascending series.
pub fn parse_intraday_response(symbol: &str, json: &Value) -> Result<PriceSeries, MarketDataError> {
    if let Some(e) = provider_error(symbol, json) {
        return Err(e);
    }

    let time_series = json
        .as_object()
        .and_then(|obj| {
            obj.iter()
                .find(|(key, _)| key.starts_with("Time Series"))
                .map(|(_, v)| v)
        })
        .and_then(Value::as_object)
        .ok_or_else(|| MarketDataError::Malformed(format!("{}: missing time series", symbol)))?;

    let mut bars = Vec::with_capacity(time_series.len());
    for (stamp, fields) in time_series {
        let naive = NaiveDateTime::parse_from_str(stamp, ALPHA_VANTAGE_TIMESTAMP_FORMAT)
            .map_err(|e| MarketDataError::Malformed(format!("{}: bad timestamp {}: {}", symbol, stamp, e)))?;

        bars.push(PriceBar {
            timestamp: Utc.from_utc_datetime(&naive),
            open: numeric_field(symbol, fields, "1. open")?,
            high: numeric_field(symbol, fields, "2. high")?,
            low: numeric_field(symbol, fields, "3. low")?,
            close: numeric_field(symbol, fields, "4. close")?,
            volume: numeric_field::<u64>(symbol, fields, "5. volume")?,
        });
    }

    if bars.is_empty() {
        return Err(MarketDataError::EmptySeries(symbol.to_string()));
    }

    // Provider lists newest first
    bars.sort_by_key(|b| b.timestamp);
    PriceSeries::new(symbol, bars)
}

fn numeric_field<T: std::str::FromStr>(
    symbol: &str,
    fields: &Value,
    name: &str,
) -> Result<T, MarketDataError> {
    fields[name]
        .as_str()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| MarketDataError::Malformed(format!("{}: missing or invalid {}", symbol, name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "Meta Data": {
                "2. Symbol": "IBM",
                "3. Last Refreshed": "2025-08-22 19:59:00"
            },
            "Time Series (5min)": {
                "2025-08-22 19:59:00": {
                    "1. open": "241.10", "2. high": "241.50", "3. low": "240.90",
                    "4. close": "241.30", "5. volume": "1200"
                },
                "2025-08-22 19:54:00": {
                    "1. open": "240.80", "2. high": "241.20", "3. low": "240.70",
                    "4. close": "241.00", "5. volume": "900"
                }
            }
        })
    }

    #[test]
    fn test_parse_sorts_bars_ascending() {
        let series = parse_intraday_response("IBM", &sample_payload()).unwrap();
        assert_eq!(series.symbol(), "IBM");
        assert_eq!(series.closes(), vec![241.00, 241.30]);
        assert_eq!(series.last().unwrap().volume, 1200);
    }

    #[test]
    fn test_parse_error_message_is_invalid_symbol() {
        let payload = json!({ "Error Message": "Invalid API call." });
        let err = parse_intraday_response("NOPE", &payload).unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidSymbol(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_note_is_rate_limit() {
        let payload = json!({ "Note": "Thank you for using Alpha Vantage!" });
        let err = parse_intraday_response("IBM", &payload).unwrap_err();
        assert!(matches!(err, MarketDataError::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_rejects_non_numeric_close() {
        let mut payload = sample_payload();
        payload["Time Series (5min)"]["2025-08-22 19:59:00"]["4. close"] = json!("n/a");
        let err = parse_intraday_response("IBM", &payload).unwrap_err();
        assert!(matches!(err, MarketDataError::Malformed(_)));
    }

    #[test]
    fn test_fundamentals_payload_checks() {
        let overview = json!({ "Symbol": "IBM", "Sector": "TECHNOLOGY", "PERatio": "22.4" });
        assert_eq!(check_fundamentals_payload("IBM", overview.clone()).unwrap(), overview);

        let err = check_fundamentals_payload("NOPE", json!({})).unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidSymbol(_)));

        let err = check_fundamentals_payload("IBM", json!({ "Information": "rate limit" })).unwrap_err();
        assert!(err.is_retryable());

        let err = check_fundamentals_payload("IBM", json!([])).unwrap_err();
        assert!(matches!(err, MarketDataError::Malformed(_)));
    }

    #[test]
    fn test_parse_empty_series() {
        let payload = json!({ "Time Series (1min)": {} });
        let err = parse_intraday_response("IBM", &payload).unwrap_err();
        assert!(matches!(err, MarketDataError::EmptySeries(_)));
    }
}
