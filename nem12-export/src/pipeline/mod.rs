use std::time::{Duration, Instant};

use meter_client::domain::{IntervalReading, Site};
use rust_decimal::Decimal;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::{MalformedIntervalDataError, ReadingAggregator},
    audit::audit_records,
    config::{AppConfig, ConfigError},
    file_name::{file_name, RunId},
    nem12::{encode_file, render, Header, InternalConsistencyError, RenderError},
    scheduler::DailyJob,
    sinks::{Nem12Sink, SinkError},
    store::{DataSourceError, IntervalSource, IntervalStore},
    window::{RunWindow, WindowError},
};

/// Static inputs of every run, fixed at startup.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub sites: Vec<Site>,
    pub day_range: u32,
    pub end_offset: u32,
    pub offset: UtcOffset,
    pub from_participant: String,
    pub to_participant: String,
    pub provider: String,
    pub daily_total_alert: Option<Decimal>,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl ExportSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        let export = &cfg.export;
        Ok(Self {
            sites: cfg.sites.clone(),
            day_range: export.day_range,
            end_offset: export.start_test_day,
            offset: export.offset()?,
            from_participant: export.from_participant.clone(),
            to_participant: export.to_participant.clone(),
            provider: export.provider.clone(),
            daily_total_alert: export.daily_total_alert,
            max_retries: export.max_retries,
            retry_backoff: Duration::from_millis(export.retry_backoff_ms),
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error("data source unavailable: {0}")]
    DataSource(#[from] DataSourceError),
}

/// Why one site produced no file.
#[derive(thiserror::Error, Debug)]
pub enum SiteExportError {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug)]
pub struct WrittenFile {
    pub site: String,
    pub file_name: String,
    pub location: String,
    /// blake3 of the file contents, hex encoded.
    pub digest: String,
    pub nmis: usize,
}

#[derive(Debug)]
pub struct SiteFailure {
    pub site: String,
    pub error: SiteExportError,
}

#[derive(Debug)]
pub struct RunReport {
    pub window: RunWindow,
    pub files: Vec<WrittenFile>,
    pub failed_sites: Vec<SiteFailure>,
    pub rejected_days: Vec<MalformedIntervalDataError>,
    pub failed_nmis: Vec<InternalConsistencyError>,
    pub audit_findings: usize,
    /// Sites skipped because there was nothing exportable.
    pub empty_sites: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    fn new(window: RunWindow) -> Self {
        Self {
            window,
            files: Vec::new(),
            failed_sites: Vec::new(),
            rejected_days: Vec::new(),
            failed_nmis: Vec::new(),
            audit_findings: 0,
            empty_sites: Vec::new(),
            cancelled: false,
        }
    }
}

/// One export run: every configured site, in order, into its own NEM12 file.
pub struct ExportJob<S, K> {
    source: S,
    sink: K,
    settings: ExportSettings,
}

impl<S, K> ExportJob<S, K>
where
    S: IntervalSource,
    K: Nem12Sink,
{
    pub fn new(source: S, sink: K, settings: ExportSettings) -> Self {
        Self {
            source,
            sink,
            settings,
        }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Exports the window ending relative to `now`. The store session lives for
    /// this call only. `cancel` is honoured between sites so no file is cut short.
    pub async fn run(
        &self,
        now: OffsetDateTime,
        cancel: &CancellationToken,
    ) -> Result<RunReport, ExportError> {
        let started = Instant::now();
        let settings = &self.settings;
        let local_now = now.to_offset(settings.offset);
        let window = RunWindow::ending_before(
            local_now,
            settings.offset,
            settings.day_range,
            settings.end_offset,
        )?;
        let (start, end) = window.bounds(settings.offset)?;
        let created_at = local_now.replace_nanosecond(0).unwrap_or(local_now);
        let created_at = PrimitiveDateTime::new(created_at.date(), created_at.time());

        tracing::info!(
            start_day = %window.start_day,
            end_day = %window.end_day,
            sites = settings.sites.len(),
            "starting export run"
        );

        let store = self.source.open().await?;
        let mut report = RunReport::new(window);

        for (idx, site) in settings.sites.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(site = %site.name, "run cancelled, remaining sites skipped");
                report.cancelled = true;
                break;
            }

            let sequence = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            let run_id = RunId::new(local_now.date(), sequence);
            let site_export = SiteExport {
                site,
                run_id,
                window,
                start,
                end,
                created_at,
            };

            if let Err(e) = self.export_site(&store, &site_export, cancel, &mut report).await {
                tracing::error!(site = %site.name, error = %e, "site export failed");
                metrics::counter!("nem12_site_failures_total").increment(1);
                report.failed_sites.push(SiteFailure {
                    site: site.name.clone(),
                    error: e,
                });
            }
        }

        store.release().await;
        metrics::histogram!("nem12_run_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            files = report.files.len(),
            failed_sites = report.failed_sites.len(),
            rejected_days = report.rejected_days.len(),
            failed_nmis = report.failed_nmis.len(),
            "export run finished"
        );
        Ok(report)
    }

    async fn export_site(
        &self,
        store: &S::Store,
        job: &SiteExport<'_>,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> Result<(), SiteExportError> {
        let settings = &self.settings;
        let site = job.site;
        let readings = self.fetch_with_retry(store, &site.name, job.start, job.end, cancel).await?;

        let aggregated = ReadingAggregator::new(site, job.window, settings.offset).aggregate(readings);
        if aggregated.unmapped > 0 {
            tracing::warn!(site = %site.name, readings = aggregated.unmapped, "readings for unconfigured NMIs ignored");
        }
        for rejected in &aggregated.rejected {
            tracing::warn!(
                site = %site.name,
                nmi = %rejected.nmi,
                date = %rejected.date,
                error = %rejected,
                "day excluded from export"
            );
        }
        metrics::counter!("nem12_days_rejected_total").increment(aggregated.rejected.len() as u64);
        report.rejected_days.extend(aggregated.rejected);

        let header = Header {
            created_at: job.created_at,
            from_participant: settings.from_participant.clone(),
            to_participant: settings.to_participant.clone(),
        };
        let encoded = encode_file(header, &aggregated.nmis);
        for failure in &encoded.failures {
            tracing::error!(site = %site.name, nmi = %failure.nmi, error = %failure, "NMI left out of file");
        }
        metrics::counter!("nem12_nmi_encode_failures_total").increment(encoded.failures.len() as u64);
        let nmis = encoded.nmi_count();
        report.failed_nmis.extend(encoded.failures);

        if nmis == 0 {
            tracing::warn!(site = %site.name, "no exportable interval data, no file written");
            report.empty_sites.push(site.name.clone());
            return Ok(());
        }

        let findings = audit_records(&encoded.records, settings.daily_total_alert);
        for finding in &findings {
            tracing::warn!(site = %site.name, finding = %finding, "audit finding");
        }
        metrics::counter!("nem12_audit_findings_total").increment(findings.len() as u64);
        report.audit_findings += findings.len();

        let contents = render(&encoded.records)?;
        let digest = blake3::hash(&contents).to_hex().to_string();
        let name = file_name(job.run_id, &settings.from_participant, &settings.provider);
        let location = self.sink.persist(&name, contents).await?;

        tracing::info!(
            site = %site.name,
            file_name = %name,
            location = %location,
            digest = %digest,
            nmis,
            "NEM12 file written"
        );
        metrics::counter!("nem12_files_written_total").increment(1);
        report.files.push(WrittenFile {
            site: site.name.clone(),
            file_name: name,
            location,
            digest,
            nmis,
        });
        Ok(())
    }

    async fn fetch_with_retry(
        &self,
        store: &S::Store,
        site: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        cancel: &CancellationToken,
    ) -> Result<Vec<IntervalReading>, DataSourceError> {
        let mut attempt: u32 = 0;
        loop {
            match store.fetch_readings(site, start, end).await {
                Ok(readings) => return Ok(readings),
                Err(e) if attempt < self.settings.max_retries && !cancel.is_cancelled() => {
                    attempt += 1;
                    tracing::warn!(site, error = %e, attempt, "fetch failed, retrying with backoff");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(self.settings.retry_backoff * attempt) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

struct SiteExport<'a> {
    site: &'a Site,
    run_id: RunId,
    window: RunWindow,
    start: OffsetDateTime,
    end: OffsetDateTime,
    created_at: PrimitiveDateTime,
}

#[async_trait::async_trait]
impl<S, K> DailyJob for ExportJob<S, K>
where
    S: IntervalSource + 'static,
    K: Nem12Sink + 'static,
{
    async fn fire(&self, fired_at: OffsetDateTime, cancel: CancellationToken) -> anyhow::Result<()> {
        let report = self.run(fired_at, &cancel).await?;
        if !report.failed_sites.is_empty() {
            anyhow::bail!(
                "{} of {} sites failed to export",
                report.failed_sites.len(),
                self.settings.sites.len()
            );
        }
        Ok(())
    }
}
