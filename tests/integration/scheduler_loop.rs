//! The scheduler loop driving real scans on a fast clock.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tara::engine::pipeline::ScanPipeline;
use tara::engine::runner::{EngineHandle, EngineRunner};
use tara::engine::scheduler::{EngineSnapshot, EngineState};
use tara::types::AnalystStatus;

use crate::mock_providers::{analyst_models, Behaviour, MockCompletion, MockMarket, JUDGE};
use crate::scan_flow::test_config;

const VERDICT: &str = "{\"bias\":\"LONG\",\"entry\":100,\"sl\":98,\"tp\":104,\"confidence\":\"MEDIUM\"}";

struct Harness {
    handle: Arc<EngineHandle>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Start a runner whose countdown is `period_ticks` ticks of 10ms.
fn start(llm: Arc<MockCompletion>, period_ticks: u64, call_timeout_secs: u64) -> Harness {
    let cfg = test_config(call_timeout_secs);
    let pipeline = ScanPipeline::from_config(&cfg, Arc::new(MockMarket::new(100.0)), llm, None);
    let state = EngineState::new(&cfg.llm.analyst_models, period_ticks, cfg.engine.history_cap);
    let (runner, handle) = EngineRunner::new(Arc::new(pipeline), state, None, false);
    let runner = runner.with_tick_period(Duration::from_millis(10));

    let (stop, stop_rx) = oneshot::channel();
    let task = tokio::spawn(runner.run(async move {
        let _ = stop_rx.await;
    }));
    Harness { handle, stop, task }
}

async fn wait_for<F>(handle: &EngineHandle, pred: F) -> EngineSnapshot
where
    F: Fn(&EngineSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snap = handle.snapshot().await;
        if pred(&snap) {
            return snap;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not reached: {snap:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_countdown_scans_keep_six_most_recent_verdicts() {
    let llm = Arc::new(MockCompletion::new().script(JUDGE, Behaviour::Reply(VERDICT.into())));
    let h = start(llm, 2, 5);

    let snap = wait_for(&h.handle, |s| s.scans_completed >= 7).await;

    assert_eq!(snap.history.len(), 6);
    assert!(snap
        .history
        .windows(2)
        .all(|pair| pair[0].issued_at >= pair[1].issued_at));
    let current = snap.verdict.as_ref().map(|v| v.scan_id);
    if !snap.session.is_scanning {
        assert_eq!(current, Some(snap.history[0].scan_id));
    }

    h.stop.send(()).unwrap();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_manual_trigger_during_scan_does_not_start_another() {
    let llm = Arc::new(
        MockCompletion::new().script(JUDGE, Behaviour::Slow(Duration::from_millis(300), VERDICT.into())),
    );
    let h = start(Arc::clone(&llm), 100_000, 5);

    assert!(h.handle.request_scan().await.unwrap());
    assert!(!h.handle.request_scan().await.unwrap());
    assert!(h.handle.snapshot().await.session.is_scanning);

    let snap = wait_for(&h.handle, |s| s.scans_completed == 1 && !s.session.is_scanning).await;
    assert_eq!(snap.history.len(), 1);
    assert_eq!(llm.calls_to(JUDGE).len(), 1);
    assert_eq!(llm.calls().len(), 5);

    h.stop.send(()).unwrap();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_hung_judge_returns_engine_to_idle() {
    let llm = Arc::new(MockCompletion::new().script(JUDGE, Behaviour::Hang));
    let h = start(llm, 100_000, 1);

    assert!(h.handle.request_scan().await.unwrap());
    let snap = wait_for(&h.handle, |s| s.scans_failed == 1).await;

    assert!(!snap.session.is_scanning);
    // Re-armed to a full period, give or take ticks since completion.
    assert!(snap.session.countdown_secs > 99_000);
    assert!(snap.verdict.is_none());
    assert!(snap.history.is_empty());

    // Back in IDLE, a new scan may start.
    assert!(h.handle.request_scan().await.unwrap());

    h.stop.send(()).unwrap();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_analyst_progress_is_visible_mid_scan() {
    let models = analyst_models();
    let slow = Behaviour::Slow(Duration::from_millis(400), "LONG".into());
    let llm = Arc::new(
        MockCompletion::new()
            .script(&models[0], Behaviour::Fail("Model Error: 401".into()))
            .script(&models[1], slow.clone())
            .script(&models[2], slow.clone())
            .script(&models[3], slow)
            .script(JUDGE, Behaviour::Reply(VERDICT.into())),
    );
    let h = start(llm, 100_000, 5);

    assert!(h.handle.request_scan().await.unwrap());
    let mid = wait_for(&h.handle, |s| {
        s.reports[0].status == AnalystStatus::Failed
            && s.reports[1..].iter().all(|r| r.status == AnalystStatus::Polling)
    })
    .await;
    assert!(mid.session.is_scanning);
    assert!(mid.verdict.is_none());

    let done = wait_for(&h.handle, |s| s.scans_completed == 1).await;
    assert_eq!(done.reports[0].status, AnalystStatus::Failed);
    assert!(done.reports[1..].iter().all(|r| r.status == AnalystStatus::Ok));
    assert!(done.verdict.is_some());

    h.stop.send(()).unwrap();
    h.task.await.unwrap();
}
