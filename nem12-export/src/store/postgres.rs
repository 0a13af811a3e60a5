use meter_client::{db::fetch_site_readings, domain::IntervalReading};
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::OffsetDateTime;

use super::{DataSourceError, IntervalSource, IntervalStore};
use crate::config::DatabaseConfig;

/// Connects to the metering database once per run.
#[derive(Debug, Clone)]
pub struct PgIntervalSource {
    uri: String,
    max_connections: u32,
}

impl PgIntervalSource {
    pub fn new(cfg: &DatabaseConfig) -> Self {
        Self {
            uri: cfg.uri.clone(),
            max_connections: cfg.max_connections.max(1),
        }
    }
}

#[async_trait::async_trait]
impl IntervalSource for PgIntervalSource {
    type Store = PgIntervalStore;

    async fn open(&self) -> Result<PgIntervalStore, DataSourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.uri)
            .await
            .map_err(|e| DataSourceError::Connect(e.to_string()))?;
        tracing::debug!("metering database pool opened");
        Ok(PgIntervalStore { pool })
    }
}

pub struct PgIntervalStore {
    pool: PgPool,
}

#[async_trait::async_trait]
impl IntervalStore for PgIntervalStore {
    async fn fetch_readings(
        &self,
        site: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<IntervalReading>, DataSourceError> {
        fetch_site_readings(&self.pool, site, start, end)
            .await
            .map_err(|e| DataSourceError::Query {
                site: site.to_string(),
                message: format!("{e:#}"),
            })
    }

    async fn release(&self) {
        self.pool.close().await;
        tracing::debug!("metering database pool closed");
    }
}
