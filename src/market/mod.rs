//! Market data providers.
//!
//! Defines the `MarketDataSource` trait the scan pipeline pulls from,
//! the compact text digest handed to the analysts, and the Binance
//! REST and websocket implementations.

pub mod binance;
pub mod stream;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Bar, Ticker};

/// Separator between bars in a market digest.
pub const DIGEST_DELIMITER: &str = " | ";

/// Abstraction over read-only market data.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// The most recent `limit` bars at `interval`, oldest first.
    async fn recent_bars(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Bar>>;

    /// Current 24h ticker for `symbol`.
    async fn ticker(&self, symbol: &str) -> Result<Ticker>;
}

/// Summarise bars as `C:<close> H:<high> L:<low>` joined by `" | "`.
pub fn digest(bars: &[Bar]) -> String {
    bars.iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(DIGEST_DELIMITER)
}
