//! Analyst panel.
//!
//! Fans one completion request out per configured analyst model and
//! joins on all of them. Branches are independent: a failed or timed-out
//! call marks only its own report FAILED. Status changes are pushed to an
//! observer channel as each branch moves, in arrival order.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::llm::{CompletionProvider, CompletionRequest};
use crate::types::{AnalystReport, AnalystStatus};

pub const ANALYST_SYSTEM_PROMPT: &str =
    "You are an elite crypto quantitative analyst. Be extremely concise.";

/// Receives every intermediate and terminal report as branches progress.
pub type ReportSink = UnboundedSender<AnalystReport>;

pub struct AnalystPanel {
    llm: Arc<dyn CompletionProvider>,
    models: Vec<String>,
    max_tokens: u32,
    report_max_chars: usize,
    call_timeout: Duration,
}

impl AnalystPanel {
    pub fn new(
        llm: Arc<dyn CompletionProvider>,
        models: Vec<String>,
        max_tokens: u32,
        report_max_chars: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            models,
            max_tokens,
            report_max_chars,
            call_timeout,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Shared user prompt for every analyst.
    pub fn build_prompt(asset_label: &str, price: f64, interval: &str, digest: &str) -> String {
        format!(
            "{asset_label} @ ${price}\nMarket Context ({}): {digest}\n\
             Output ONLY: Bias (LONG/SHORT), Entry price, Stop Loss, Take Profit. Be purely objective.",
            interval.to_uppercase()
        )
    }

    /// Run every analyst concurrently and wait for all of them.
    ///
    /// Returns reports in configured model order regardless of the order
    /// in which branches settled.
    pub async fn run(&self, prompt: &str, sink: &ReportSink) -> Vec<AnalystReport> {
        let branches = self
            .models
            .iter()
            .map(|model| self.run_branch(model, prompt, sink));
        let reports = join_all(branches).await;

        let ok = reports.iter().filter(|r| r.status == AnalystStatus::Ok).count();
        info!(ok, failed = reports.len() - ok, "Analyst panel settled");
        reports
    }

    async fn run_branch(&self, model: &str, prompt: &str, sink: &ReportSink) -> AnalystReport {
        // The observer may already be gone; reports are still returned.
        let _ = sink.send(AnalystReport::polling(model));

        let request = CompletionRequest::new(model, ANALYST_SYSTEM_PROMPT, prompt, self.max_tokens);
        let report = match tokio::time::timeout(self.call_timeout, self.llm.complete(&request)).await {
            Ok(Ok(text)) => {
                debug!(model, len = text.len(), "Analyst responded");
                AnalystReport::ok(model, &text, self.report_max_chars)
            }
            Ok(Err(e)) => {
                warn!(model, error = %e, "Analyst call failed");
                AnalystReport::failed(model)
            }
            Err(_) => {
                warn!(model, timeout_secs = self.call_timeout.as_secs(), "Analyst call timed out");
                AnalystReport::failed(model)
            }
        };

        let _ = sink.send(report.clone());
        report
    }
}
