//! Scan scheduler state machine.
//!
//! Two states, IDLE and SCANNING, driven by pure step functions on an
//! owned `EngineState`. The runtime driver in `runner` calls `tick` once
//! per second, `trigger` on manual requests, `apply_update` for analyst
//! progress and `complete` when a scan settles. Nothing here performs I/O.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

use crate::types::{AnalystReport, Ticker, Verdict};

// ---------------------------------------------------------------------------
// Session + history
// ---------------------------------------------------------------------------

/// Transient coordination flags for the scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSession {
    pub is_scanning: bool,
    pub countdown_secs: u64,
}

/// What a clock tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Countdown still running.
    Idle,
    /// Countdown expired while idle; a scan has begun.
    Fire,
    /// A scan is in flight; nothing new starts.
    Busy,
}

/// Bounded most-recent-first list of verdicts.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Verdict>,
    cap: usize,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Prepend, evicting the oldest entry past the cap.
    pub fn push(&mut self, verdict: Verdict) {
        self.entries.push_front(verdict);
        self.entries.truncate(self.cap);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Verdict> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Verdict> {
        self.entries.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// Immutable copy of the engine state handed to readers.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub session: ScanSession,
    pub reports: Vec<AnalystReport>,
    pub verdict: Option<Verdict>,
    pub history: Vec<Verdict>,
    pub last_ticker: Option<Ticker>,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
}

/// All mutable state of the engine, owned by the scheduler driver.
#[derive(Debug, Clone)]
pub struct EngineState {
    session: ScanSession,
    period_secs: u64,
    reports: Vec<AnalystReport>,
    verdict: Option<Verdict>,
    history: History,
    last_ticker: Option<Ticker>,
    scans_completed: u64,
    scans_failed: u64,
    last_scan_at: Option<DateTime<Utc>>,
}

impl EngineState {
    pub fn new(models: &[String], period_secs: u64, history_cap: usize) -> Self {
        Self {
            session: ScanSession {
                is_scanning: false,
                countdown_secs: period_secs,
            },
            period_secs,
            reports: models.iter().map(|m| AnalystReport::waiting(m)).collect(),
            verdict: None,
            history: History::new(history_cap),
            last_ticker: None,
            scans_completed: 0,
            scans_failed: 0,
            last_scan_at: None,
        }
    }

    pub fn session(&self) -> ScanSession {
        self.session
    }

    pub fn is_scanning(&self) -> bool {
        self.session.is_scanning
    }

    pub fn reports(&self) -> &[AnalystReport] {
        &self.reports
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// One-second clock tick.
    ///
    /// An expiry during an in-flight scan is dropped; the countdown is
    /// re-armed to a full period when that scan completes.
    pub fn tick(&mut self) -> TickOutcome {
        self.session.countdown_secs = self.session.countdown_secs.saturating_sub(1);

        if self.session.is_scanning {
            return TickOutcome::Busy;
        }
        if self.session.countdown_secs == 0 {
            self.begin_scan();
            return TickOutcome::Fire;
        }
        TickOutcome::Idle
    }

    /// Manual "scan now". Returns `false` (no-op) while a scan is running.
    pub fn trigger(&mut self) -> bool {
        if self.session.is_scanning {
            debug!("Manual trigger ignored, scan in progress");
            return false;
        }
        self.begin_scan();
        true
    }

    fn begin_scan(&mut self) {
        self.session.is_scanning = true;
        self.session.countdown_secs = self.period_secs;
        self.verdict = None;
        for report in &mut self.reports {
            *report = AnalystReport::waiting(&report.model_id);
        }
    }

    /// Record an analyst status change. Unknown models are ignored, and a
    /// settled report is never moved back to a non-terminal status.
    pub fn apply_update(&mut self, update: AnalystReport) {
        if let Some(slot) = self.reports.iter_mut().find(|r| r.model_id == update.model_id) {
            if slot.status.is_terminal() && !update.status.is_terminal() {
                debug!(model = %update.model_id, "Stale analyst update dropped");
                return;
            }
            *slot = update;
        }
    }

    pub fn set_ticker(&mut self, ticker: Ticker) {
        self.last_ticker = Some(ticker);
    }

    /// Settle the in-flight scan. `None` means it failed fatally: nothing
    /// is recorded, but the guard and countdown are still reset.
    pub fn complete(&mut self, outcome: Option<(Vec<AnalystReport>, Verdict)>) {
        match outcome {
            Some((reports, verdict)) => {
                for report in reports {
                    self.apply_update(report);
                }
                self.history.push(verdict.clone());
                self.verdict = Some(verdict);
                self.scans_completed += 1;
            }
            None => {
                self.scans_failed += 1;
            }
        }
        self.last_scan_at = Some(Utc::now());
        self.session.is_scanning = false;
        self.session.countdown_secs = self.period_secs;
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            session: self.session,
            reports: self.reports.clone(),
            verdict: self.verdict.clone(),
            history: self.history.to_vec(),
            last_ticker: self.last_ticker.clone(),
            scans_completed: self.scans_completed,
            scans_failed: self.scans_failed,
            last_scan_at: self.last_scan_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
