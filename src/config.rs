//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every policy constant (model list, ratio cutoff, scan period) has a
//! default, so a missing section falls back to stock behaviour. Secrets
//! are referenced by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use tracing::warn;

use crate::llm::siliconflow::DEFAULT_ENDPOINT;
use crate::market::binance::DEFAULT_REST_BASE;
use crate::market::stream::DEFAULT_WS_BASE;
use crate::types::EngineError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub llm: LlmConfig,
    pub market: MarketConfig,
    pub risk: RiskConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    /// Exchange symbol for bars and ticker, e.g. "BTCUSDT".
    pub symbol: String,
    /// Short label used in prompts, e.g. "BTC".
    pub asset_label: String,
    pub scan_interval_secs: u64,
    pub history_cap: usize,
    /// Upper bound on any single external call.
    pub call_timeout_secs: u64,
    pub scan_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "TARA-001".to_string(),
            symbol: "BTCUSDT".to_string(),
            asset_label: "BTC".to_string(),
            scan_interval_secs: 600,
            history_cap: 6,
            call_timeout_secs: 60,
            scan_on_start: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub api_key_env: String,
    pub analyst_models: Vec<String>,
    pub judge_model: String,
    pub max_tokens: u32,
    /// Analyst text kept for display and for the judge prompt.
    pub report_max_chars: usize,
    /// Retries on 429/5xx per call. Zero keeps single-shot semantics.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: "SILICONFLOW_API_KEY".to_string(),
            analyst_models: vec![
                "Qwen/Qwen3-8B".to_string(),
                "THUDM/glm-4-9b-chat".to_string(),
                "THUDM/GLM-4-9B-0414".to_string(),
                "THUDM/GLM-Z1-9B-0414".to_string(),
            ],
            judge_model: "deepseek-ai/DeepSeek-R1-0528-Qwen3-8B".to_string(),
            max_tokens: 500,
            report_max_chars: 150,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub bar_interval: String,
    pub bar_limit: u32,
    pub stream_enabled: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            rest_base_url: DEFAULT_REST_BASE.to_string(),
            ws_base_url: DEFAULT_WS_BASE.to_string(),
            bar_interval: "1h".to_string(),
            bar_limit: 5,
            stream_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    /// Minimum reward/risk ratio for an EXECUTE decision.
    pub min_ratio: f64,
    /// Stop-loss factor applied to the price when the judge reply is unusable.
    pub fallback_stop_factor: f64,
    /// Take-profit factor applied to the price when the judge reply is unusable.
    pub fallback_target_factor: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_ratio: 1.5,
            fallback_stop_factor: 0.99,
            fallback_target_factor: 1.02,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use built-in defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            warn!(path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.llm.analyst_models.is_empty() {
            return Err(EngineError::Config("llm.analyst_models must not be empty".into()));
        }
        if self.llm.judge_model.trim().is_empty() {
            return Err(EngineError::Config("llm.judge_model must be set".into()));
        }
        if self.engine.scan_interval_secs == 0 {
            return Err(EngineError::Config("engine.scan_interval_secs must be > 0".into()));
        }
        if self.engine.history_cap == 0 {
            return Err(EngineError::Config("engine.history_cap must be > 0".into()));
        }
        if self.engine.call_timeout_secs == 0 {
            return Err(EngineError::Config("engine.call_timeout_secs must be > 0".into()));
        }
        if !self.risk.min_ratio.is_finite() || self.risk.min_ratio < 0.0 {
            return Err(EngineError::Config(format!(
                "risk.min_ratio must be a non-negative number, got {}",
                self.risk.min_ratio
            )));
        }
        Ok(())
    }

    /// Resolve the completion provider token.
    ///
    /// A missing variable is not an error: calls will simply fail
    /// authentication and analysts will report FAILED.
    pub fn api_key(&self) -> SecretString {
        match std::env::var(&self.llm.api_key_env) {
            Ok(key) => SecretString::new(key),
            Err(_) => {
                warn!(env = %self.llm.api_key_env, "API key not set; completion calls will fail");
                SecretString::new(String::new())
            }
        }
    }
}
