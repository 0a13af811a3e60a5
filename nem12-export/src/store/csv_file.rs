use std::{fs::File, path::PathBuf, str::FromStr};

use csv::StringRecord;
use futures::{Stream, TryStreamExt};
use meter_client::domain::{IntervalReading, QualityFlag};
use rust_decimal::Decimal;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime, UtcOffset,
};

use super::{DataSourceError, IntervalSource, IntervalStore};

/// Replays a CSV dump of the meter event table.
///
/// Expected header columns (by name):
/// - site
/// - nmi
/// - timestamp (RFC3339, or naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` in the store's offset)
/// - reading
/// - quality_flag (optional)
///
/// Rows with an empty nmi or reading are skipped, matching the database query.
#[derive(Debug, Clone)]
pub struct CsvIntervalStore {
    path: PathBuf,
    offset: UtcOffset,
}

impl CsvIntervalStore {
    pub fn new<P: Into<PathBuf>>(path: P, offset: UtcOffset) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }
}

struct CsvRow {
    site: String,
    reading: Option<IntervalReading>,
}

fn parse_timestamp(raw: &str, offset: UtcOffset) -> Result<OffsetDateTime, DataSourceError> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(ts);
    }

    let naive = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(raw, &naive)
        .map(|ts| ts.assume_offset(offset))
        .map_err(|e| DataSourceError::InvalidRow(format!("invalid timestamp '{raw}': {e}")))
}

fn record_to_row(
    record: &StringRecord,
    headers: &StringRecord,
    offset: UtcOffset,
) -> Result<CsvRow, DataSourceError> {
    let get = |name: &str| -> Result<&str, DataSourceError> {
        headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .ok_or_else(|| DataSourceError::InvalidRow(format!("missing column '{name}' in CSV record")))
    };

    let site = get("site")?.to_string();
    let nmi = get("nmi")?;
    let reading = get("reading")?;
    if nmi.is_empty() || reading.is_empty() {
        return Ok(CsvRow { site, reading: None });
    }

    let timestamp = parse_timestamp(get("timestamp")?, offset)?;
    let value = Decimal::from_str(reading)
        .map_err(|e| DataSourceError::InvalidRow(format!("invalid reading '{reading}': {e}")))?;
    let quality = QualityFlag::from_code(get("quality_flag").ok())
        .map_err(|e| DataSourceError::InvalidRow(e.to_string()))?;

    Ok(CsvRow {
        site,
        reading: Some(IntervalReading {
            nmi: nmi.to_string(),
            timestamp,
            value,
            quality,
        }),
    })
}

// Blocking CSV reader wrapped in a single stream; dumps only span a few days.
fn read_rows(path: PathBuf, offset: UtcOffset) -> impl Stream<Item = Result<CsvRow, DataSourceError>> {
    async_stream::try_stream! {
        let file = File::open(&path)
            .map_err(|e| DataSourceError::Connect(format!("failed to open CSV dump: {e}")))?;
        let mut rdr = csv::Reader::from_reader(file);
        let headers = rdr
            .headers()
            .map_err(|e| DataSourceError::InvalidRow(format!("failed to read CSV headers: {e}")))?
            .clone();

        for result in rdr.records() {
            let record = result
                .map_err(|e| DataSourceError::InvalidRow(format!("failed to read CSV record: {e}")))?;
            yield record_to_row(&record, &headers, offset)?;
        }
    }
}

#[async_trait::async_trait]
impl IntervalStore for CsvIntervalStore {
    async fn fetch_readings(
        &self,
        site: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<IntervalReading>, DataSourceError> {
        let rows = read_rows(self.path.clone(), self.offset);

        let mut readings: Vec<IntervalReading> = rows
            .try_filter_map(|row: CsvRow| async move {
                Ok(row
                    .reading
                    .filter(|r| row.site == site && r.timestamp >= start && r.timestamp < end))
            })
            .try_collect()
            .await?;

        readings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.nmi.cmp(&b.nmi)));
        Ok(readings)
    }
}

#[async_trait::async_trait]
impl IntervalSource for CsvIntervalStore {
    type Store = CsvIntervalStore;

    async fn open(&self) -> Result<CsvIntervalStore, DataSourceError> {
        if !self.path.is_file() {
            return Err(DataSourceError::Connect(format!(
                "CSV dump {} does not exist",
                self.path.display()
            )));
        }
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use time::macros::{datetime, offset};

    const DUMP: &str = "\
site,nmi,timestamp,reading,quality_flag
233-255 Botany Road,NCCC000001,2025-08-24T00:30:00.000000,1.250,
233-255 Botany Road,NCCC000001,2025-08-24T00:00:00.000000,0.750,A
Other Site,NCCC000009,2025-08-24T00:00:00.000000,9.000,
233-255 Botany Road,,2025-08-24T01:00:00.000000,,
233-255 Botany Road,NCCC000001,2025-08-23T13:00:00Z,2.000,E
233-255 Botany Road,NCCC000001,2025-08-25T00:00:00.000000,3.000,S
";

    fn dump_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn readings_are_filtered_and_sorted() {
        let file = dump_file(DUMP);
        let store = CsvIntervalStore::new(file.path(), offset!(+10));

        let readings = store
            .fetch_readings(
                "233-255 Botany Road",
                datetime!(2025-08-24 00:00:00 +10),
                datetime!(2025-08-25 00:00:00 +10),
            )
            .await
            .unwrap();

        // The RFC3339 row is 23:00 local on the 23rd and the last row is the next day.
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].timestamp, datetime!(2025-08-24 00:00:00 +10));
        assert_eq!(readings[0].value, Decimal::new(750, 3));
        assert_eq!(readings[1].timestamp, datetime!(2025-08-24 00:30:00 +10));
        assert!(readings.iter().all(|r| r.quality == QualityFlag::Actual));
    }

    #[tokio::test]
    async fn rfc3339_timestamps_keep_their_offset() {
        let file = dump_file(DUMP);
        let store = CsvIntervalStore::new(file.path(), offset!(+10));

        let readings = store
            .fetch_readings(
                "233-255 Botany Road",
                datetime!(2025-08-23 00:00:00 +10),
                datetime!(2025-08-24 00:00:00 +10),
            )
            .await
            .unwrap();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].timestamp, datetime!(2025-08-23 23:00:00 +10));
        assert_eq!(readings[0].quality, QualityFlag::Estimated);
    }

    #[tokio::test]
    async fn bad_reading_is_a_data_source_error() {
        let file = dump_file("site,nmi,timestamp,reading\nA,N1,2025-08-24T00:00:00,abc\n");
        let store = CsvIntervalStore::new(file.path(), offset!(+10));

        let err = store
            .fetch_readings(
                "A",
                datetime!(2025-08-24 00:00:00 +10),
                datetime!(2025-08-25 00:00:00 +10),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DataSourceError::InvalidRow(_)));
    }

    #[tokio::test]
    async fn missing_dump_fails_to_open() {
        let store = CsvIntervalStore::new("/nonexistent/merged_messages.csv", offset!(+10));
        assert!(matches!(store.open().await, Err(DataSourceError::Connect(_))));
    }
}
