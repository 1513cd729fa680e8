//! Mock providers for integration testing.
//!
//! Deterministic `MarketDataSource` and `CompletionProvider`
//! implementations with per-model behaviour and call recording, all
//! in-memory with no network access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tara::llm::{CompletionProvider, CompletionRequest};
use tara::market::MarketDataSource;
use tara::types::{Bar, Ticker};

pub const JUDGE: &str = "judge/arbiter";

pub fn analyst_models() -> Vec<String> {
    vec![
        "alpha/model-a".into(),
        "beta/model-b".into(),
        "gamma/model-c".into(),
        "delta/model-d".into(),
    ]
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A market that always quotes the same price and a short rising series.
pub struct MockMarket {
    price: f64,
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockMarket {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Force all subsequent fetches to fail with `msg`.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketDataSource for MockMarket {
    async fn recent_bars(&self, _symbol: &str, _interval: &str, limit: u32) -> Result<Vec<Bar>> {
        self.check_error()?;
        let start = Utc::now() - ChronoDuration::hours(limit as i64);
        Ok((0..limit)
            .map(|i| {
                let close = self.price - (limit - 1 - i) as f64 * 10.0;
                Bar {
                    open_time: start + ChronoDuration::hours(i as i64),
                    open: close - 5.0,
                    high: close + 20.0,
                    low: close - 20.0,
                    close,
                    volume: 12.5,
                }
            })
            .collect())
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        self.check_error()?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: self.price,
            change_pct_24h: 0.8,
            updated_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Behaviour {
    Reply(String),
    Fail(String),
    /// Reply after a delay.
    Slow(Duration, String),
    /// Never reply.
    Hang,
}

/// Scripted completion provider keyed by model id.
///
/// Models without a script reply with a short LONG call.
pub struct MockCompletion {
    scripts: Mutex<HashMap<String, Behaviour>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn script(self, model: &str, behaviour: Behaviour) -> Self {
        self.scripts.lock().unwrap().insert(model.to_string(), behaviour);
        self
    }

    /// Every request seen so far, in arrival order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, model: &str) -> Vec<CompletionRequest> {
        self.calls().into_iter().filter(|c| c.model == model).collect()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        let behaviour = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.model)
            .cloned()
            .unwrap_or_else(|| Behaviour::Reply("Bias LONG, entry 64000, SL 63000, TP 66000".into()));

        match behaviour {
            Behaviour::Reply(text) => Ok(text),
            Behaviour::Fail(msg) => Err(anyhow!(msg)),
            Behaviour::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Behaviour::Hang => {
                std::future::pending::<()>().await;
                Ok(String::new())
            }
        }
    }
}
