use anyhow::Result;
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{IntervalReading, QualityFlag};

#[derive(Debug, Clone, sqlx::FromRow)]
struct IntervalRow {
    nmi: String,
    ts: OffsetDateTime,
    reading: Decimal,
    quality_flag: Option<String>,
}

impl TryFrom<IntervalRow> for IntervalReading {
    type Error = anyhow::Error;

    fn try_from(row: IntervalRow) -> Result<Self> {
        let quality = QualityFlag::from_code(row.quality_flag.as_deref())?;
        Ok(IntervalReading {
            nmi: row.nmi,
            timestamp: row.ts,
            value: row.reading,
            quality,
        })
    }
}

// meter_events carries no quality column; every stored reading is an actual read.
const SITE_READINGS_SQL: &str = r#"
    SELECT
        t.nmi,
        t."timestamp" AS ts,
        t.reading,
        NULL::text AS quality_flag
    FROM all_meter_data.meter_events AS t
    WHERE t.site = $1
      AND t.nmi IS NOT NULL
      AND t.reading IS NOT NULL
      AND t."timestamp" >= $2
      AND t."timestamp" <  $3
    ORDER BY t."timestamp" ASC, t.nmi
"#;

/// Fetch the time-ordered interval readings of every NMI at a site, `start` inclusive,
/// `end` exclusive.
pub async fn fetch_site_readings(
    pool: &PgPool,
    site: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<IntervalReading>> {
    let rows = sqlx::query_as::<_, IntervalRow>(SITE_READINGS_SQL)
        .bind(site)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(IntervalReading::try_from).collect()
}
