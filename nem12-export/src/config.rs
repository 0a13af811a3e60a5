use std::{collections::HashSet, fs, path::PathBuf};

use meter_client::domain::Site;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::{macros::format_description, Time, UtcOffset};

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Days of history pulled before the evaluation day (`DAY_RANGE`).
    pub day_range: u32,
    /// Days back from today used as the window's final day.
    #[serde(default)]
    pub start_test_day: u32,
    /// Fixed offset defining the local metering day, e.g. `+10:00`.
    pub utc_offset: String,
    pub output_dir: PathBuf,
    pub from_participant: String,
    pub to_participant: String,
    pub provider: String,
    #[serde(default)]
    pub daily_total_alert: Option<Decimal>,
    /// Extra attempts for a site whose fetch fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NextRun {
    pub hour: u8,
    pub minute: u8,
    #[serde(default)]
    pub second: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub next_run: NextRun,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub export: ExportConfig,
    pub schedule: ScheduleConfig,
    pub sites: Vec<Site>,
    pub metrics: Option<MetricsConfig>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no sites configured")]
    NoSites,
    #[error("site '{0}' has no NMIs configured")]
    NoNmis(String),
    #[error("NMI '{0}' is configured more than once")]
    DuplicateNmi(String),
    #[error("start_test_day ({start_test_day}) exceeds day_range ({day_range})")]
    WindowInverted { day_range: u32, start_test_day: u32 },
    #[error("next_run {hour:02}:{minute:02}:{second:02} is not a valid time of day")]
    InvalidRunTime { hour: u8, minute: u8, second: u8 },
    #[error("utc_offset '{0}' is not a fixed offset like +10:00")]
    InvalidOffset(String),
    #[error("{field} '{value}' cannot be used in a file name")]
    InvalidNameComponent { field: &'static str, value: String },
}

impl NextRun {
    pub fn time_of_day(&self) -> Result<Time, ConfigError> {
        Time::from_hms(self.hour, self.minute, self.second).map_err(|_| ConfigError::InvalidRunTime {
            hour: self.hour,
            minute: self.minute,
            second: self.second,
        })
    }
}

impl ExportConfig {
    pub fn offset(&self) -> Result<UtcOffset, ConfigError> {
        let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
        UtcOffset::parse(self.utc_offset.trim(), &format)
            .map_err(|_| ConfigError::InvalidOffset(self.utc_offset.clone()))
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("NEM12_CONFIG").unwrap_or_else(|_| "nem12-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Static checks run once at startup. Anything rejected here would otherwise
    /// surface as a malformed file on every run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sites.is_empty() {
            return Err(ConfigError::NoSites);
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if site.nmis.is_empty() {
                return Err(ConfigError::NoNmis(site.name.clone()));
            }
            for nmi in &site.nmis {
                if !seen.insert(nmi.nmi.as_str()) {
                    return Err(ConfigError::DuplicateNmi(nmi.nmi.clone()));
                }
            }
        }

        if self.export.start_test_day > self.export.day_range {
            return Err(ConfigError::WindowInverted {
                day_range: self.export.day_range,
                start_test_day: self.export.start_test_day,
            });
        }

        self.schedule.next_run.time_of_day()?;
        self.export.offset()?;

        check_name_component("from_participant", &self.export.from_participant)?;
        check_name_component("provider", &self.export.provider)?;

        Ok(())
    }
}

fn check_name_component(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.contains(['#', '/', '\\']) {
        return Err(ConfigError::InvalidNameComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
