//! SiliconFlow LLM integration.
//!
//! Talks to any OpenAI-compatible chat completions endpoint; the default
//! is SiliconFlow, which hosts the open-weight analyst and judge models.
//! One system message plus one user message per call, capped output.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::{CompletionProvider, CompletionRequest};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_ENDPOINT: &str = "https://api.siliconflow.cn/v1/chat/completions";

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

/// Transport-level ceiling; the engine applies its own tighter per-call timeout.
const HTTP_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

impl ChatRequest {
    fn from_completion(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(request.system.clone()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(request.user.clone()),
                },
            ],
            max_tokens: request.max_tokens,
        }
    }
}

impl ChatResponse {
    /// First choice's message content, or empty when the model sent none.
    fn into_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SiliconFlowClient {
    http: Client,
    endpoint: String,
    api_key: SecretString,
    max_retries: u32,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
}

impl SiliconFlowClient {
    /// Create a new client.
    ///
    /// - `endpoint`: chat completions URL; `None` uses SiliconFlow.
    /// - `max_retries`: extra attempts on 429 / 5xx / transport errors.
    pub fn new(api_key: SecretString, endpoint: Option<String>, max_retries: u32) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent("TARA/0.1.0")
            .build()
            .context("Failed to build SiliconFlow HTTP client")?;

        Ok(Self {
            http,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key,
            max_retries,
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Total successful API calls.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Total calls that ended in an error.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    async fn call_model(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest::from_completion(request);
        let model = request.model.as_str();
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, model, "Retrying completion call");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: ChatResponse = response
                            .json()
                            .await
                            .with_context(|| format!("Failed to parse completion response (model={model})"))?;
                        self.total_calls.fetch_add(1, Ordering::Relaxed);
                        return Ok(parsed.into_text());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, model, error = %error_text, "Retryable completion error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Model Error: {status} (model={model}): {error_text}");
                }
                Err(e) => {
                    warn!(attempt, model, error = %e, "Completion request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        anyhow::bail!(
            "Completion failed after {} attempt(s) (model={}): {}",
            self.max_retries + 1,
            model,
            last_error.unwrap_or_default()
        )
    }
}

#[async_trait]
impl CompletionProvider for SiliconFlowClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        debug!(model = %request.model, max_tokens = request.max_tokens, "Completion request");
        let result = self.call_model(request).await;
        if result.is_err() {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
