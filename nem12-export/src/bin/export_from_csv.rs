use anyhow::{bail, Result};
use nem12_export::{
    config::AppConfig,
    observability,
    pipeline::{ExportJob, ExportSettings},
    sinks::DirectorySink,
    store::CsvIntervalStore,
};
use std::env;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: export_from_csv <meter_events_csv>");
    }
    let csv_path = &args[1];

    // Load configuration (NEM12_CONFIG may point to a replay-specific file).
    let cfg = AppConfig::load()?;
    let settings = ExportSettings::from_config(&cfg)?;

    let source = CsvIntervalStore::new(csv_path, settings.offset);
    let job = ExportJob::new(source, DirectorySink::new(&cfg.export.output_dir), settings);

    let report = job
        .run(OffsetDateTime::now_utc(), &CancellationToken::new())
        .await?;

    for file in &report.files {
        println!("{}  {}", file.digest, file.location);
    }
    for rejected in &report.rejected_days {
        println!("excluded: {rejected}");
    }

    Ok(())
}
