//! Language-model completion port.
//!
//! Defines the `CompletionProvider` trait the analyst panel and judge
//! call through, and the OpenAI-compatible HTTP implementation.

pub mod siliconflow;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// One stateless completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: &str, system: &str, user: &str, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            system: system.to_string(),
            user: user.to_string(),
            max_tokens,
        }
    }
}

/// Abstraction over chat completion backends.
///
/// The provider enforces no schema: whatever text the model produced is
/// returned verbatim. Non-success statuses and transport failures surface
/// as a single error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
