//! One scan: fetch → analyst fan-out → judge → evaluate.
//!
//! Steps run strictly in sequence; only the analyst stage fans out.
//! Market data and judge failures (including timeouts) abort the scan,
//! analyst failures never do.

use anyhow::{Context, Result};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

use super::judge::Judge;
use super::panel::{AnalystPanel, ReportSink};
use crate::config::AppConfig;
use crate::llm::CompletionProvider;
use crate::market::{self, MarketDataSource};
use crate::types::{AnalystReport, EngineError, Ticker, Verdict};

/// Everything a successful scan produced.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub price: f64,
    pub digest: String,
    pub reports: Vec<AnalystReport>,
    pub verdict: Verdict,
    pub elapsed: Duration,
}

pub struct ScanPipeline {
    market: Arc<dyn MarketDataSource>,
    panel: AnalystPanel,
    judge: Judge,
    price_feed: Option<watch::Receiver<Option<Ticker>>>,
    symbol: String,
    asset_label: String,
    bar_interval: String,
    bar_limit: u32,
    call_timeout: Duration,
}

impl ScanPipeline {
    pub fn from_config(
        cfg: &AppConfig,
        market: Arc<dyn MarketDataSource>,
        llm: Arc<dyn CompletionProvider>,
        price_feed: Option<watch::Receiver<Option<Ticker>>>,
    ) -> Self {
        let call_timeout = Duration::from_secs(cfg.engine.call_timeout_secs);
        Self {
            market,
            panel: AnalystPanel::new(
                Arc::clone(&llm),
                cfg.llm.analyst_models.clone(),
                cfg.llm.max_tokens,
                cfg.llm.report_max_chars,
                call_timeout,
            ),
            judge: Judge::new(
                llm,
                &cfg.llm.judge_model,
                cfg.llm.max_tokens,
                &cfg.engine.asset_label,
                cfg.risk.clone(),
            ),
            price_feed,
            symbol: cfg.engine.symbol.clone(),
            asset_label: cfg.engine.asset_label.clone(),
            bar_interval: cfg.market.bar_interval.clone(),
            bar_limit: cfg.market.bar_limit,
            call_timeout,
        }
    }

    pub fn analyst_models(&self) -> &[String] {
        self.panel.models()
    }

    /// Run one full scan.
    pub async fn run(&self, sink: &ReportSink) -> Result<ScanReport> {
        let start = Instant::now();
        let scan_id = Uuid::new_v4();
        info!(scan_id = %scan_id, symbol = %self.symbol, "Scan started");

        // 1. Market snapshot
        let price = self.current_price().await?;
        let bars = self
            .bounded(
                "market snapshot",
                self.market
                    .recent_bars(&self.symbol, &self.bar_interval, self.bar_limit),
            )
            .await
            .context("Market snapshot fetch failed")?;
        let digest = market::digest(&bars);
        debug!(scan_id = %scan_id, price, bars = bars.len(), "Market snapshot ready");

        // 2. Analyst fan-out / join
        let prompt = AnalystPanel::build_prompt(&self.asset_label, price, &self.bar_interval, &digest);
        let reports = self.panel.run(&prompt, sink).await;

        // 3-4. Judge + evaluation
        let verdict = self
            .bounded("judge call", self.judge.consolidate(price, &reports, scan_id))
            .await?;

        let elapsed = start.elapsed();
        info!(
            scan_id = %scan_id,
            judge = %self.judge.model(),
            verdict = %verdict,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scan complete"
        );

        Ok(ScanReport {
            scan_id,
            price,
            digest,
            reports,
            verdict,
            elapsed,
        })
    }

    /// Run one scan with no observer attached; progress goes to the log.
    pub async fn run_once(&self) -> Result<ScanReport> {
        let (tx, mut rx) = mpsc::unbounded_channel::<AnalystReport>();
        let progress = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                debug!(model = %update.model_id, status = %update.status, "Analyst update");
            }
        });

        let result = self.run(&tx).await;
        drop(tx);
        // The logger only ends once every sender is gone.
        let _ = progress.await;
        result
    }

    /// Latest streamed price, or a REST ticker when nothing has streamed
    /// yet or the streamed value is older than the call timeout.
    async fn current_price(&self) -> Result<f64> {
        let max_age = chrono::Duration::from_std(self.call_timeout)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let streamed = self.price_feed.as_ref().and_then(|rx| {
            rx.borrow()
                .as_ref()
                .filter(|t| Utc::now() - t.updated_at <= max_age)
                .map(|t| t.last_price)
        });
        if streamed.is_none() && self.price_feed.is_some() {
            debug!(symbol = %self.symbol, "No fresh streamed price, using REST ticker");
        }

        match streamed {
            Some(p) => Ok(p),
            None => {
                let ticker = self
                    .bounded("ticker fetch", self.market.ticker(&self.symbol))
                    .await
                    .context("Current price unavailable")?;
                Ok(ticker.last_price)
            }
        }
    }

    /// Apply the per-call timeout to an external call.
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                operation: operation.to_string(),
                secs: self.call_timeout.as_secs(),
            }
            .into()),
        }
    }
}
