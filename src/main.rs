//! TARA: multi-model trading signal consolidation engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the market, completion and ticker clients into the scan
//! pipeline, then either runs one scan (`--once`) or the scheduled loop
//! with the dashboard until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use tara::config::AppConfig;
use tara::dashboard;
use tara::engine::pipeline::ScanPipeline;
use tara::engine::runner::EngineRunner;
use tara::engine::scheduler::EngineState;
use tara::llm::siliconflow::SiliconFlowClient;
use tara::llm::CompletionProvider;
use tara::market::binance::BinanceClient;
use tara::market::stream::TickerFeed;

const BANNER: &str = r#"
 _____  _    ____      _
|_   _|/ \  |  _ \    / \
  | | / _ \ | |_) |  / _ \
  | |/ ___ \|  _ <  / ___ \
  |_/_/   \_\_| \_\/_/   \_\

  Trading Analyst Router & Arbiter
  v0.1.0: Signal Consolidation Engine
"#;

#[derive(Parser, Debug)]
#[command(name = "tara", version, about = "Multi-model trading signal consolidation engine")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Run a single scan, print the verdict as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    // Before config loading so a missing file is reported.
    init_logging();

    let cfg = AppConfig::load_or_default(&cli.config)?;

    println!("{BANNER}");
    info!(
        engine_name = %cfg.engine.name,
        symbol = %cfg.engine.symbol,
        scan_interval_secs = cfg.engine.scan_interval_secs,
        analysts = cfg.llm.analyst_models.len(),
        judge = %cfg.llm.judge_model,
        "TARA starting up"
    );

    // -- Initialise components -------------------------------------------

    let market = Arc::new(BinanceClient::new(Some(cfg.market.rest_base_url.clone()))?);
    let llm = Arc::new(SiliconFlowClient::new(
        cfg.api_key(),
        Some(cfg.llm.endpoint.clone()),
        cfg.llm.max_retries,
    )?);

    let completion: Arc<dyn CompletionProvider> = llm.clone();

    let feed = if cfg.market.stream_enabled && !cli.once {
        Some(TickerFeed::spawn(&cfg.market.ws_base_url, &cfg.engine.symbol))
    } else {
        None
    };

    let pipeline = Arc::new(ScanPipeline::from_config(
        &cfg,
        market,
        completion,
        feed.as_ref().map(TickerFeed::subscribe),
    ));

    if cli.once {
        return run_once(&pipeline).await;
    }

    // -- Scheduled loop --------------------------------------------------

    let state = EngineState::new(
        pipeline.analyst_models(),
        cfg.engine.scan_interval_secs,
        cfg.engine.history_cap,
    );
    let (runner, handle) = EngineRunner::new(
        Arc::clone(&pipeline),
        state,
        feed.as_ref().map(TickerFeed::subscribe),
        cfg.engine.scan_on_start,
    );

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(Arc::clone(&handle), cfg.dashboard.port).await?;
    }

    info!(
        interval_secs = cfg.engine.scan_interval_secs,
        "Entering scan loop. Press Ctrl+C to stop."
    );

    runner
        .run(async {
            // Treat a failed signal listener like a shutdown request.
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received.");
        })
        .await;

    if let Some(feed) = feed {
        if let Some(ticker) = feed.latest() {
            info!(ticker = %ticker, "Last streamed ticker");
        }
        feed.shutdown();
    }

    let snap = handle.snapshot().await;
    info!(
        scans_completed = snap.scans_completed,
        scans_failed = snap.scans_failed,
        llm_calls = llm.total_calls(),
        llm_failures = llm.total_failures(),
        "TARA shut down cleanly."
    );

    Ok(())
}

/// Run one scan and print the verdict.
async fn run_once(pipeline: &ScanPipeline) -> Result<()> {
    let report = pipeline.run_once().await?;
    for r in &report.reports {
        info!(model = r.short_name(), status = %r.status, text = %r.raw_text, "Analyst report");
    }
    println!("{}", serde_json::to_string_pretty(&report.verdict)?);
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tara=info"));

    let json_logging = std::env::var("TARA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
