//! Realtime ticker feed over the Binance websocket stream.
//!
//! Subscribes to `<symbol>@ticker` and publishes the latest price on a
//! `watch` channel. The connection is re-established with exponential
//! backoff whenever it drops.

use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::types::Ticker;

pub const DEFAULT_WS_BASE: &str = "wss://stream.binance.com:9443/ws";

const INITIAL_RECONNECT_DELAY_SECS: u64 = 1;
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Subset of the 24hr ticker stream event.
#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "P")]
    change_pct: String,
}

/// Handle to a background ticker subscription.
pub struct TickerFeed {
    rx: watch::Receiver<Option<Ticker>>,
    task: JoinHandle<()>,
}

impl TickerFeed {
    /// Start streaming `symbol` from `ws_base` on a background task.
    pub fn spawn(ws_base: &str, symbol: &str) -> Self {
        let url = stream_url(ws_base, symbol);
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(run_with_reconnect(url, tx));
        Self { rx, task }
    }

    /// A receiver that always holds the most recent ticker, if any.
    pub fn subscribe(&self) -> watch::Receiver<Option<Ticker>> {
        self.rx.clone()
    }

    pub fn latest(&self) -> Option<Ticker> {
        self.rx.borrow().clone()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// `wss://.../ws/btcusdt@ticker`
pub fn stream_url(ws_base: &str, symbol: &str) -> String {
    format!(
        "{}/{}@ticker",
        ws_base.trim_end_matches('/'),
        symbol.to_lowercase()
    )
}

/// Decode a ticker event. Anything else on the socket yields `None`.
pub fn parse_ticker_message(text: &str) -> Option<Ticker> {
    let event: TickerEvent = serde_json::from_str(text).ok()?;
    Some(Ticker {
        symbol: event.symbol,
        last_price: event.last_price.parse().ok()?,
        change_pct_24h: event.change_pct.parse().ok()?,
        updated_at: Utc::now(),
    })
}

async fn run_with_reconnect(url: String, tx: watch::Sender<Option<Ticker>>) {
    let mut delay = INITIAL_RECONNECT_DELAY_SECS;

    loop {
        info!(url = %url, "Connecting ticker stream");
        match run_stream(&url, &tx).await {
            Ok(()) => {
                warn!("Ticker stream closed. Reconnecting...");
                delay = INITIAL_RECONNECT_DELAY_SECS;
            }
            Err(e) => {
                error!(error = %e, retry_in_secs = delay, "Ticker stream failed");
            }
        }

        if tx.is_closed() {
            debug!("No ticker subscribers left, stopping stream");
            return;
        }

        tokio::time::sleep(Duration::from_secs(delay)).await;
        delay = (delay * 2).min(MAX_RECONNECT_DELAY_SECS);
    }
}

async fn run_stream(url: &str, tx: &watch::Sender<Option<Ticker>>) -> Result<()> {
    let (ws_stream, _) = connect_async(url).await?;
    info!("Ticker stream connected");

    let (_write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => match parse_ticker_message(text.as_str()) {
                Some(ticker) => {
                    // send_replace never fails, even with no receivers
                    tx.send_replace(Some(ticker));
                }
                None => debug!("Ignoring non-ticker message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}
