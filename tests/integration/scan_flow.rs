//! Single-scan flows through the full pipeline.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use tara::config::AppConfig;
use tara::engine::pipeline::ScanPipeline;
use tara::types::{AnalystStatus, Decision, FAILED_PLACEHOLDER};

use crate::mock_providers::{analyst_models, Behaviour, MockCompletion, MockMarket, JUDGE};

pub fn test_config(call_timeout_secs: u64) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.llm.analyst_models = analyst_models();
    cfg.llm.judge_model = JUDGE.into();
    cfg.engine.call_timeout_secs = call_timeout_secs;
    cfg
}

fn pipeline(cfg: &AppConfig, market: MockMarket, llm: Arc<MockCompletion>) -> ScanPipeline {
    ScanPipeline::from_config(cfg, Arc::new(market), llm, None)
}

const SHORT_VERDICT: &str =
    "```json\n{\"bias\":\"short\",\"entry\":100,\"sl\":105,\"tp\":85,\"confidence\":\"HIGH\"}\n```";

#[tokio::test]
async fn test_half_the_panel_fails_and_judge_still_sees_four_reports() {
    let models = analyst_models();
    let llm = Arc::new(
        MockCompletion::new()
            .script(&models[1], Behaviour::Fail("Model Error: 500".into()))
            .script(&models[3], Behaviour::Fail("Model Error: 429".into()))
            .script(JUDGE, Behaviour::Reply(SHORT_VERDICT.into())),
    );
    let cfg = test_config(5);
    let (tx, _rx) = mpsc::unbounded_channel();

    let report = pipeline(&cfg, MockMarket::new(100.0), Arc::clone(&llm))
        .run(&tx)
        .await
        .unwrap();

    let statuses: Vec<AnalystStatus> = report.reports.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![AnalystStatus::Ok, AnalystStatus::Failed, AnalystStatus::Ok, AnalystStatus::Failed]
    );

    let judge_calls = llm.calls_to(JUDGE);
    assert_eq!(judge_calls.len(), 1);
    let prompt = &judge_calls[0].user;
    for model in &models {
        assert!(prompt.contains(&format!("[{model}]: ")), "missing {model}");
    }
    assert_eq!(prompt.matches(FAILED_PLACEHOLDER).count(), 2);

    assert_eq!(report.verdict.bias, "SHORT");
    assert_eq!(report.verdict.risk_reward_ratio, 3.0);
    assert_eq!(report.verdict.decision, Decision::Execute);
}

#[tokio::test]
async fn test_analysts_share_one_market_prompt() {
    let llm = Arc::new(MockCompletion::new().script(JUDGE, Behaviour::Reply(SHORT_VERDICT.into())));
    let cfg = test_config(5);
    let (tx, _rx) = mpsc::unbounded_channel();

    pipeline(&cfg, MockMarket::new(64000.0), Arc::clone(&llm))
        .run(&tx)
        .await
        .unwrap();

    let analyst_calls: Vec<_> = llm.calls().into_iter().filter(|c| c.model != JUDGE).collect();
    assert_eq!(analyst_calls.len(), 4);
    let first = &analyst_calls[0].user;
    assert!(first.starts_with("BTC @ $64000\nMarket Context (1H): "));
    assert_eq!(first.matches(" | ").count(), 4);
    assert!(analyst_calls.iter().all(|c| &c.user == first));
    assert!(analyst_calls.iter().all(|c| c.max_tokens == 500));
}

#[tokio::test]
async fn test_truncated_judge_reply_falls_back_to_error_verdict() {
    let llm = Arc::new(MockCompletion::new().script(
        JUDGE,
        Behaviour::Reply("here is your answer: ```json\n{\"bias\":\"LONG\"```".into()),
    ));
    let cfg = test_config(5);
    let (tx, _rx) = mpsc::unbounded_channel();

    let report = tokio_test::assert_ok!(pipeline(&cfg, MockMarket::new(200.0), llm).run(&tx).await);

    let v = &report.verdict;
    assert_eq!(v.bias, "ERROR");
    assert_eq!(v.confidence, "LOW");
    assert_eq!(v.entry, 200.0);
    assert!((v.stop_loss - 198.0).abs() < 1e-9);
    assert!((v.take_profit - 204.0).abs() < 1e-9);
    assert_eq!(v.risk_reward_ratio, 2.0);
}

#[tokio::test]
async fn test_market_outage_aborts_before_any_llm_call() {
    let llm = Arc::new(MockCompletion::new());
    let market = MockMarket::new(100.0);
    market.set_error("HTTP 503 Service Unavailable");
    let cfg = test_config(5);
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = tokio_test::assert_err!(pipeline(&cfg, market, Arc::clone(&llm)).run(&tx).await);

    assert!(format!("{err:#}").contains("HTTP 503"));
    assert!(llm.calls().is_empty());
}

#[tokio::test]
async fn test_hung_analyst_times_out_without_blocking_scan() {
    let models = analyst_models();
    let llm = Arc::new(
        MockCompletion::new()
            .script(&models[0], Behaviour::Hang)
            .script(JUDGE, Behaviour::Reply(SHORT_VERDICT.into())),
    );
    let cfg = test_config(1);
    let (tx, _rx) = mpsc::unbounded_channel();

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline(&cfg, MockMarket::new(100.0), llm).run(&tx),
    )
    .await
    .expect("scan should settle")
    .unwrap();

    assert_eq!(report.reports[0].status, AnalystStatus::Failed);
    assert_eq!(report.reports[0].raw_text, FAILED_PLACEHOLDER);
    assert!(report.reports[1..].iter().all(|r| r.status == AnalystStatus::Ok));
}

#[tokio::test]
async fn test_hung_judge_aborts_scan_with_timeout() {
    let llm = Arc::new(MockCompletion::new().script(JUDGE, Behaviour::Hang));
    let cfg = test_config(1);
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline(&cfg, MockMarket::new(100.0), llm).run(&tx),
    )
    .await
    .expect("scan should settle")
    .unwrap_err();

    assert!(err.to_string().contains("judge call timed out after 1s"));
}

#[tokio::test]
async fn test_single_shot_scan_produces_serializable_verdict() {
    let llm = Arc::new(MockCompletion::new().script(JUDGE, Behaviour::Reply(SHORT_VERDICT.into())));
    let cfg = test_config(5);

    let report = tokio_test::assert_ok!(pipeline(&cfg, MockMarket::new(100.0), llm).run_once().await);

    assert_eq!(report.reports.len(), 4);
    let json = serde_json::to_value(&report.verdict).unwrap();
    assert_eq!(json["bias"], "SHORT");
    assert_eq!(json["decision"], "EXECUTE");
    assert_eq!(json["risk_reward_ratio"], 3.0);
}
