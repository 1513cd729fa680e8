//! Scheduler runtime driver.
//!
//! A single task owns the `EngineState` and multiplexes the one-second
//! clock, manual scan requests, analyst progress updates and the
//! in-flight scan with `tokio::select!`. Concurrency is interleaving
//! only: the scan future is polled from this same task. After every
//! state change a fresh snapshot is published to the shared handle.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::panel::ReportSink;
use super::pipeline::{ScanPipeline, ScanReport};
use super::scheduler::{EngineSnapshot, EngineState, TickOutcome};
use crate::types::Ticker;

const COMMAND_BUFFER: usize = 16;

/// Requests accepted by the runner.
#[derive(Debug)]
pub enum ScanCommand {
    /// Start a scan now; replies `true` if one started, `false` if busy.
    Trigger(oneshot::Sender<bool>),
}

/// Read side and control side of a running engine, shared with the
/// dashboard and the binary.
pub struct EngineHandle {
    snapshot: RwLock<EngineSnapshot>,
    commands: mpsc::Sender<ScanCommand>,
    pub started_at: DateTime<Utc>,
}

impl EngineHandle {
    pub async fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Ask the runner for an immediate scan.
    pub async fn request_scan(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ScanCommand::Trigger(tx))
            .await
            .map_err(|_| anyhow!("Engine runner is not running"))?;
        rx.await.map_err(|_| anyhow!("Engine runner dropped the request"))
    }
}

pub struct EngineRunner {
    pipeline: Arc<ScanPipeline>,
    state: EngineState,
    handle: Arc<EngineHandle>,
    commands: mpsc::Receiver<ScanCommand>,
    ticker_feed: Option<watch::Receiver<Option<Ticker>>>,
    scan_on_start: bool,
    tick_period: Duration,
}

impl EngineRunner {
    pub fn new(
        pipeline: Arc<ScanPipeline>,
        state: EngineState,
        ticker_feed: Option<watch::Receiver<Option<Ticker>>>,
        scan_on_start: bool,
    ) -> (Self, Arc<EngineHandle>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = Arc::new(EngineHandle {
            snapshot: RwLock::new(state.snapshot()),
            commands: tx,
            started_at: Utc::now(),
        });
        let runner = Self {
            pipeline,
            state,
            handle: Arc::clone(&handle),
            commands: rx,
            ticker_feed,
            scan_on_start,
            tick_period: Duration::from_secs(1),
        };
        (runner, handle)
    }

    /// Shorten the clock period. Tests only; production ticks once a second.
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Drive the scheduler until `shutdown` resolves.
    pub async fn run<S>(mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut clock = tokio::time::interval(self.tick_period);
        clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        clock.tick().await;

        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let mut in_flight: Option<BoxFuture<'static, Result<ScanReport>>> = None;

        if self.scan_on_start && self.state.trigger() {
            info!("Running startup scan");
            in_flight = Some(self.start_scan(&update_tx));
        }
        self.publish().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = clock.tick() => {
                    if self.state.tick() == TickOutcome::Fire {
                        info!("Countdown expired, starting scan");
                        in_flight = Some(self.start_scan(&update_tx));
                    }
                    self.refresh_ticker();
                    self.publish().await;
                }
                Some(cmd) = self.commands.recv() => {
                    match cmd {
                        ScanCommand::Trigger(reply) => {
                            let started = self.state.trigger();
                            if started {
                                info!("Manual scan triggered");
                                in_flight = Some(self.start_scan(&update_tx));
                            }
                            self.publish().await;
                            // Requester may have given up waiting.
                            let _ = reply.send(started);
                        }
                    }
                }
                Some(update) = update_rx.recv() => {
                    debug!(model = %update.model_id, status = %update.status, "Analyst update");
                    self.state.apply_update(update);
                    self.publish().await;
                }
                result = async {
                    match in_flight.as_mut() {
                        Some(scan) => scan.await,
                        None => std::future::pending().await,
                    }
                } => {
                    in_flight = None;
                    while let Ok(update) = update_rx.try_recv() {
                        self.state.apply_update(update);
                    }
                    match result {
                        Ok(report) => self.state.complete(Some((report.reports, report.verdict))),
                        Err(e) => {
                            error!(error = %e, "Scan failed, no verdict recorded");
                            self.state.complete(None);
                        }
                    }
                    self.publish().await;
                }
            }
        }
    }

    fn start_scan(&self, sink: &ReportSink) -> BoxFuture<'static, Result<ScanReport>> {
        let pipeline = Arc::clone(&self.pipeline);
        let sink = sink.clone();
        Box::pin(async move { pipeline.run(&sink).await })
    }

    fn refresh_ticker(&mut self) {
        let latest = self
            .ticker_feed
            .as_ref()
            .and_then(|rx| rx.borrow().clone());
        if let Some(ticker) = latest {
            self.state.set_ticker(ticker);
        }
    }

    async fn publish(&self) {
        *self.handle.snapshot.write().await = self.state.snapshot();
    }
}
