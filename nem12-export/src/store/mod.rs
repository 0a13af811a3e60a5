use meter_client::domain::IntervalReading;
use time::OffsetDateTime;

pub mod csv_file;
pub mod postgres;

pub use csv_file::CsvIntervalStore;
pub use postgres::{PgIntervalSource, PgIntervalStore};

#[derive(thiserror::Error, Debug)]
pub enum DataSourceError {
    #[error("failed to open interval store: {0}")]
    Connect(String),
    #[error("interval query for site '{site}' failed: {message}")]
    Query { site: String, message: String },
    #[error("invalid interval row: {0}")]
    InvalidRow(String),
}

/// A live session against the metering data, scoped to one export run.
#[async_trait::async_trait]
pub trait IntervalStore: Send + Sync {
    /// Readings of every NMI at `site` with `start <= timestamp < end`, ordered by
    /// timestamp ascending.
    async fn fetch_readings(
        &self,
        site: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<IntervalReading>, DataSourceError>;

    /// Give back whatever the session holds open.
    async fn release(&self) {}
}

/// Hands out a fresh `IntervalStore` per run so nothing stays connected while the
/// scheduler is idle.
#[async_trait::async_trait]
pub trait IntervalSource: Send + Sync {
    type Store: IntervalStore;

    async fn open(&self) -> Result<Self::Store, DataSourceError>;
}
