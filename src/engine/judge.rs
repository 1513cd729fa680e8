//! Judge consolidation.
//!
//! Merges every analyst report into one prompt, asks the judge model for
//! a strict JSON verdict, and turns whatever comes back into a `Verdict`.
//!
//! The model is not bound by the JSON instruction, so extraction is a
//! best-effort heuristic: strip code fences, take the greedy span from
//! the first `{` to the last `}`, parse it. Nested braces inside string
//! values can defeat this; any failure yields the low-confidence fallback
//! verdict instead of an error.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::evaluator;
use crate::config::RiskConfig;
use crate::llm::{CompletionProvider, CompletionRequest};
use crate::types::{AnalystReport, Verdict};

pub const JUDGE_SYSTEM_PROMPT: &str = "You are a trading signal consolidator. Analyze analyst reports. \
JSON Output ONLY. Exact keys: 'bias' (LONG/SHORT), 'entry' (number), 'sl' (number), 'tp' (number), \
'confidence' (string). No markdown blocks.";

const DEFAULT_BIAS: &str = "STAY AWAY";
const DEFAULT_CONFIDENCE: &str = "MEDIUM";
const FALLBACK_BIAS: &str = "ERROR";
const FALLBACK_CONFIDENCE: &str = "LOW";

/// Fields read from the judge's JSON object. Every field is optional
/// because the model may omit or mistype any of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JudgeOutput {
    pub bias: Option<String>,
    pub entry: Option<f64>,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub confidence: Option<String>,
}

impl JudgeOutput {
    /// Conservative stand-in used when the reply cannot be parsed.
    pub fn fallback(price: f64, risk: &RiskConfig) -> Self {
        Self {
            bias: Some(FALLBACK_BIAS.to_string()),
            entry: Some(price),
            sl: Some(price * risk.fallback_stop_factor),
            tp: Some(price * risk.fallback_target_factor),
            confidence: Some(FALLBACK_CONFIDENCE.to_string()),
        }
    }

    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            bias: obj.get("bias").and_then(Value::as_str).map(str::to_string),
            entry: obj.get("entry").and_then(lenient_number),
            sl: obj.get("sl").and_then(lenient_number),
            tp: obj.get("tp").and_then(lenient_number),
            confidence: obj.get("confidence").and_then(label_text),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Remove markdown code-fence markers (```` ```json ```` and ```` ``` ````).
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// Greedy span from the first `{` to the last `}`, if both exist in order.
pub fn extract_json_candidate(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the judge's raw reply. `None` means the reply is unusable.
pub fn parse_judge_output(raw: &str) -> Option<JudgeOutput> {
    let cleaned = strip_code_fences(raw);
    let candidate = extract_json_candidate(&cleaned)?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(obj)) => Some(JudgeOutput::from_object(&obj)),
        Ok(other) => {
            debug!(kind = %json_kind(&other), "Judge JSON is not an object");
            None
        }
        Err(e) => {
            debug!(error = %e, "Judge JSON parse failed");
            None
        }
    }
}

/// Build the final verdict from a raw judge reply.
///
/// Never fails: an unusable reply becomes the fallback verdict.
pub fn build_verdict(raw: &str, price: f64, risk: &RiskConfig, scan_id: Uuid) -> Verdict {
    let output = parse_judge_output(raw).unwrap_or_else(|| {
        warn!(scan_id = %scan_id, raw_len = raw.len(), "Unparseable judge reply, using fallback verdict");
        JudgeOutput::fallback(price, risk)
    });
    verdict_from_output(&output, price, risk, scan_id)
}

/// Normalise a parsed judge output and score it.
pub fn verdict_from_output(
    output: &JudgeOutput,
    price: f64,
    risk: &RiskConfig,
    scan_id: Uuid,
) -> Verdict {
    let scored = evaluator::evaluate(output.entry, output.sl, output.tp, risk.min_ratio);

    let bias = output
        .bias
        .as_deref()
        .map(|b| b.trim().to_uppercase())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DEFAULT_BIAS.to_string());

    let confidence = output
        .confidence
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIDENCE.to_string());

    Verdict {
        scan_id,
        bias,
        entry: nonzero(output.entry).unwrap_or(price),
        stop_loss: nonzero(output.sl).unwrap_or(0.0),
        take_profit: nonzero(output.tp).unwrap_or(0.0),
        risk_reward_ratio: scored.ratio,
        decision: scored.decision,
        confidence,
        issued_at: Utc::now(),
    }
}

/// A JSON number, or a string that starts with one (`"2150.5 USD"`).
fn lenient_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_leading_float(s),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Free-text label; numbers and booleans are rendered as text.
fn label_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Longest numeric prefix of `s`, ignoring leading whitespace.
fn parse_leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let prefix_len = s
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    (1..=prefix_len)
        .rev()
        .find_map(|len| s[..len].parse::<f64>().ok())
}

fn nonzero(v: Option<f64>) -> Option<f64> {
    v.filter(|x| *x != 0.0)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Judge
// ---------------------------------------------------------------------------

/// Consolidates analyst reports through one judge model call.
pub struct Judge {
    llm: Arc<dyn CompletionProvider>,
    model: String,
    max_tokens: u32,
    asset_label: String,
    risk: RiskConfig,
}

impl Judge {
    pub fn new(
        llm: Arc<dyn CompletionProvider>,
        model: &str,
        max_tokens: u32,
        asset_label: &str,
        risk: RiskConfig,
    ) -> Self {
        Self {
            llm,
            model: model.to_string(),
            max_tokens,
            asset_label: asset_label.to_string(),
            risk,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `[<model>]: <text>` per report, in the order given.
    pub fn build_prompt(&self, price: f64, reports: &[AnalystReport]) -> String {
        let all_intel: String = reports
            .iter()
            .map(|r| format!("[{}]: {}\n", r.model_id, r.raw_text))
            .collect();
        format!(
            "Current {} Price: {}\n\nAnalyst Reports:\n{}\n\nReturn consolidated JSON ONLY.",
            self.asset_label, price, all_intel
        )
    }

    /// Ask the judge for a verdict. Only the completion call itself can
    /// fail; a malformed reply still produces a verdict.
    pub async fn consolidate(
        &self,
        price: f64,
        reports: &[AnalystReport],
        scan_id: Uuid,
    ) -> Result<Verdict> {
        let request = CompletionRequest::new(
            &self.model,
            JUDGE_SYSTEM_PROMPT,
            &self.build_prompt(price, reports),
            self.max_tokens,
        );

        let raw = self
            .llm
            .complete(&request)
            .await
            .with_context(|| format!("Judge call failed (model={})", self.model))?;

        let verdict = build_verdict(&raw, price, &self.risk, scan_id);
        info!(
            scan_id = %scan_id,
            bias = %verdict.bias,
            rr = verdict.risk_reward_ratio,
            decision = %verdict.decision,
            confidence = %verdict.confidence,
            "Judge verdict"
        );
        Ok(verdict)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
