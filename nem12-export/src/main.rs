use std::sync::Arc;

use anyhow::Result;
use nem12_export::{
    config::AppConfig,
    metrics_server, observability,
    pipeline::{ExportJob, ExportSettings},
    scheduler::{DailyScheduler, SystemClock},
    sinks::DirectorySink,
    store::PgIntervalSource,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let settings = ExportSettings::from_config(&cfg)?;
    let clock = SystemClock::new(settings.offset);
    let run_at = cfg.schedule.next_run.time_of_day()?;

    let job = ExportJob::new(
        PgIntervalSource::new(&cfg.database),
        DirectorySink::new(&cfg.export.output_dir),
        settings,
    );
    let scheduler = DailyScheduler::new(Arc::new(job), clock, run_at);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown requested");
        shutdown.cancel();
    });

    scheduler.run(cancel).await;
    Ok(())
}
