use anyhow::Result;
use nem12_export::{
    config::AppConfig,
    observability,
    pipeline::{ExportJob, ExportSettings},
    sinks::DirectorySink,
    store::PgIntervalSource,
};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Runs a single export immediately, as if the daily trigger had just fired.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let settings = ExportSettings::from_config(&cfg)?;

    let job = ExportJob::new(
        PgIntervalSource::new(&cfg.database),
        DirectorySink::new(&cfg.export.output_dir),
        settings,
    );

    let report = job
        .run(OffsetDateTime::now_utc(), &CancellationToken::new())
        .await?;

    for file in &report.files {
        println!("{}  {}", file.digest, file.location);
    }
    if !report.failed_sites.is_empty() {
        anyhow::bail!("{} site(s) failed to export", report.failed_sites.len());
    }

    Ok(())
}
