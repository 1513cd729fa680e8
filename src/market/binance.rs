//! Binance public market data (REST).
//!
//! API: `https://api.binance.com/api/v3/klines` and `/api/v3/ticker/24hr`
//! Auth: None required.
//! Klines are returned as positional arrays with prices encoded as strings.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::MarketDataSource;
use crate::types::{Bar, EngineError, Ticker};

pub const DEFAULT_REST_BASE: &str = "https://api.binance.com";

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    price_change_percent: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceClient {
    http: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("TARA/0.1.0")
            .build()
            .context("Failed to build Binance HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_REST_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Binance request failed: {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiError>(&text) {
                Ok(e) => format!("HTTP {status} (code {}): {}", e.code, e.msg),
                Err(_) => format!("HTTP {status}: {text}"),
            };
            return Err(EngineError::MarketData {
                source_name: "binance".into(),
                message,
            }
            .into());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Binance response: {path}"))
    }

    /// Convert the positional kline arrays into bars.
    pub fn parse_klines(payload: &Value) -> Result<Vec<Bar>> {
        let rows = payload
            .as_array()
            .ok_or_else(|| anyhow!("Klines payload is not an array"))?;

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let open_ms = row
                    .get(0)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow!("Kline {i}: missing open time"))?;
                let open_time = DateTime::<Utc>::from_timestamp_millis(open_ms)
                    .ok_or_else(|| anyhow!("Kline {i}: open time out of range"))?;
                Ok(Bar {
                    open_time,
                    open: Self::field(row, 1).with_context(|| format!("Kline {i}: open"))?,
                    high: Self::field(row, 2).with_context(|| format!("Kline {i}: high"))?,
                    low: Self::field(row, 3).with_context(|| format!("Kline {i}: low"))?,
                    close: Self::field(row, 4).with_context(|| format!("Kline {i}: close"))?,
                    volume: Self::field(row, 5).with_context(|| format!("Kline {i}: volume"))?,
                })
            })
            .collect()
    }

    /// Numeric kline field, encoded either as a string or a number.
    fn field(row: &Value, idx: usize) -> Result<f64> {
        match row.get(idx) {
            Some(Value::String(s)) => s.parse::<f64>().with_context(|| format!("bad number {s:?}")),
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| anyhow!("bad number {n}")),
            _ => Err(anyhow!("missing field {idx}")),
        }
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn recent_bars(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Bar>> {
        let payload = self
            .get_json(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let bars = Self::parse_klines(&payload)?;
        debug!(symbol, interval, count = bars.len(), "Fetched klines");
        Ok(bars)
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        let payload = self
            .get_json("/api/v3/ticker/24hr", &[("symbol", symbol.to_string())])
            .await?;
        let raw: Ticker24h =
            serde_json::from_value(payload).context("Unexpected 24h ticker payload")?;
        Ok(Ticker {
            symbol: raw.symbol,
            last_price: raw.last_price.parse().context("Bad lastPrice")?,
            change_pct_24h: raw
                .price_change_percent
                .parse()
                .context("Bad priceChangePercent")?,
            updated_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_klines() {
        let payload = json!([
            [1717000000000i64, "67000.10", "67250.00", "66900.50", "67100.00", "812.3", 1717003599999i64, "0", 100, "0", "0", "0"],
            [1717003600000i64, "67100.00", "67400.00", "67050.00", "67390.25", "640.0", 1717007199999i64, "0", 90, "0", "0", "0"]
        ]);
        let bars = BinanceClient::parse_klines(&payload).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 67100.0);
        assert_eq!(bars[1].high, 67400.0);
        assert_eq!(bars[1].low, 67050.0);
        assert!(bars[0].open_time < bars[1].open_time);
    }

    #[test]
    fn test_parse_klines_accepts_numeric_fields() {
        let payload = json!([[1717000000000i64, 1.0, 2.0, 0.5, 1.5, 10.0]]);
        let bars = BinanceClient::parse_klines(&payload).unwrap();
        assert_eq!(bars[0].close, 1.5);
    }

    #[test]
    fn test_parse_klines_rejects_garbage() {
        assert!(BinanceClient::parse_klines(&json!({"code": -1121})).is_err());
        assert!(BinanceClient::parse_klines(&json!([[1717000000000i64, "x"]])).is_err());
        assert!(BinanceClient::parse_klines(&json!([["not-a-time"]])).is_err());
    }

    #[test]
    fn test_ticker_payload_deserializes() {
        let raw: Ticker24h = serde_json::from_value(json!({
            "symbol": "PAXGUSDT",
            "lastPrice": "2145.42",
            "priceChangePercent": "0.82",
            "volume": "123"
        }))
        .unwrap();
        assert_eq!(raw.symbol, "PAXGUSDT");
        assert_eq!(raw.last_price, "2145.42");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = BinanceClient::new(Some("https://example.com/".into())).unwrap();
        assert_eq!(client.base_url, "https://example.com");
    }
}
