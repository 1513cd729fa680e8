//! Dashboard API route handlers.
//!
//! All endpoints return JSON read from the latest published engine
//! snapshot. The only write is `POST /api/scan`, which asks the runner
//! for a manual scan.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::engine::runner::EngineHandle;
use crate::types::{AnalystReport, Ticker, Verdict};

pub type AppState = Arc<EngineHandle>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub is_scanning: bool,
    pub countdown_secs: u64,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub last_scan_at: Option<String>,
    pub last_ticker: Option<Ticker>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResponse {
    pub accepted: bool,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.snapshot().await;
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds();

    Json(StatusResponse {
        status: if snap.session.is_scanning { "SCANNING" } else { "IDLE" }.into(),
        is_scanning: snap.session.is_scanning,
        countdown_secs: snap.session.countdown_secs,
        scans_completed: snap.scans_completed,
        scans_failed: snap.scans_failed,
        last_scan_at: snap.last_scan_at.map(|t| t.to_rfc3339()),
        last_ticker: snap.last_ticker,
        uptime_secs: uptime,
    })
}

/// GET /api/reports
pub async fn get_reports(State(state): State<AppState>) -> Json<Vec<AnalystReport>> {
    Json(state.snapshot().await.reports)
}

/// GET /api/verdict
pub async fn get_verdict(State(state): State<AppState>) -> Json<Option<Verdict>> {
    Json(state.snapshot().await.verdict)
}

/// GET /api/history
pub async fn get_history(State(state): State<AppState>) -> Json<Vec<Verdict>> {
    Json(state.snapshot().await.history)
}

/// POST /api/scan
pub async fn post_scan(State(state): State<AppState>) -> (StatusCode, Json<ScanResponse>) {
    match state.request_scan().await {
        Ok(true) => (
            StatusCode::ACCEPTED,
            Json(ScanResponse {
                accepted: true,
                message: "Scan started".into(),
            }),
        ),
        Ok(false) => (
            StatusCode::CONFLICT,
            Json(ScanResponse {
                accepted: false,
                message: "Scan already in progress".into(),
            }),
        ),
        Err(e) => {
            error!(error = %e, "Manual scan request failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ScanResponse {
                    accepted: false,
                    message: e.to_string(),
                }),
            )
        }
    }
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
