//! Shared types for the TARA engine.
//!
//! These types form the data model used across the market, llm, engine
//! and dashboard modules. They carry no behaviour beyond formatting and
//! small constructors so every layer can depend on them freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Text stored in a report whose completion request failed or timed out.
pub const FAILED_PLACEHOLDER: &str = "API timeout or error.";

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One OHLCV bar (kline) from the market-data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl fmt::Display for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C:{} H:{} L:{}", self.close, self.high, self.low)
    }
}

/// Last traded price and 24h change for the tracked symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    /// Percent change over the trailing 24 hours (e.g. 1.24 = +1.24%).
    pub change_pct_24h: f64,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.change_pct_24h > 0.0 { "+" } else { "" };
        write!(
            f,
            "{} ${:.2} ({sign}{:.2}%)",
            self.symbol, self.last_price, self.change_pct_24h
        )
    }
}

// ---------------------------------------------------------------------------
// Analyst reports
// ---------------------------------------------------------------------------

/// Lifecycle of one analyst's report within a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalystStatus {
    Waiting,
    Polling,
    Ok,
    Failed,
}

impl AnalystStatus {
    /// `OK` and `FAILED` are terminal until the next scan starts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalystStatus::Ok | AnalystStatus::Failed)
    }
}

impl fmt::Display for AnalystStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalystStatus::Waiting => write!(f, "WAITING"),
            AnalystStatus::Polling => write!(f, "POLLING"),
            AnalystStatus::Ok => write!(f, "OK"),
            AnalystStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One analyst model's contribution to a scan.
///
/// Also used as the incremental status update the panel emits while its
/// branches settle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystReport {
    pub model_id: String,
    pub status: AnalystStatus,
    pub raw_text: String,
}

impl AnalystReport {
    pub fn waiting(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            status: AnalystStatus::Waiting,
            raw_text: String::new(),
        }
    }

    pub fn polling(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            status: AnalystStatus::Polling,
            raw_text: String::new(),
        }
    }

    /// A successful report, keeping at most `max_chars` characters of text.
    pub fn ok(model_id: &str, text: &str, max_chars: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            status: AnalystStatus::Ok,
            raw_text: text.chars().take(max_chars).collect(),
        }
    }

    pub fn failed(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            status: AnalystStatus::Failed,
            raw_text: FAILED_PLACEHOLDER.to_string(),
        }
    }

    /// Display name: the last path segment of the model id.
    pub fn short_name(&self) -> &str {
        self.model_id.rsplit('/').next().unwrap_or(&self.model_id)
    }
}

impl fmt::Display for AnalystReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.short_name(), self.status)
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Outcome of the risk/reward threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Execute,
    Veto,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Execute => write!(f, "EXECUTE"),
            Decision::Veto => write!(f, "VETO"),
        }
    }
}

/// The consolidated, decision-bearing output of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub scan_id: Uuid,
    /// Upper-cased judge bias: LONG, SHORT, STAY AWAY, ERROR, or whatever
    /// label the judge chose.
    pub bias: String,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// reward / risk, rounded to 2 decimals. Always finite.
    pub risk_reward_ratio: f64,
    pub decision: Decision,
    pub confidence: String,
    pub issued_at: DateTime<Utc>,
}

impl Verdict {
    pub fn is_executable(&self) -> bool {
        self.decision == Decision::Execute
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {:.2} (SL {:.2} / TP {:.2}) RR 1:{:.2} -> {} [{}]",
            self.bias,
            self.entry,
            self.stop_loss,
            self.take_profit,
            self.risk_reward_ratio,
            self.decision,
            self.confidence,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for TARA.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Market data error ({source_name}): {message}")]
    MarketData { source_name: String, message: String },

    #[error("LLM error ({model}): {message}")]
    Llm { model: String, message: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
