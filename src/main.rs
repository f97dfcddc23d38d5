use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use solaredge_ingestion::{
    checkpoint::FileCheckpointStore,
    config::AppConfig,
    metrics_server, observability,
    scheduler::PollScheduler,
    sinks::IlpSink,
    sources::MonitoringApiClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let tz = cfg.api.timezone()?;

    let ilp_addr: SocketAddr = cfg
        .sink
        .ilp_tcp_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid sink.ilp_tcp_addr: {e}"))?;
    let sink = IlpSink::new(
        ilp_addr,
        cfg.sink.max_retries,
        Duration::from_millis(cfg.sink.retry_backoff_ms),
    );

    let api = MonitoringApiClient::new(
        cfg.api.base_url.clone(),
        cfg.api.api_key.clone(),
        cfg.api.site.clone(),
    );
    let checkpoints = FileCheckpointStore::new(&cfg.checkpoint.path);

    let scheduler = PollScheduler::new(
        api,
        sink,
        checkpoints,
        cfg.api.site.clone(),
        cfg.api.mode.clone(),
        tz,
        cfg.api.daily_limit,
    )
    .await?;

    tracing::info!(
        site = %cfg.api.site,
        mode = %cfg.api.mode,
        delay_secs = scheduler.delay().as_secs_f64(),
        resume_from = ?scheduler.last_published(),
        "starting poll loop"
    );

    scheduler.run().await;

    Ok(())
}
