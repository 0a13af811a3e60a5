use meter_client::domain::IntervalLength;
use rust_decimal::Decimal;
use time::{Date, PrimitiveDateTime};

use super::{Header, IntervalData, Nem12Record, NmiDetails, QualityMethod, VALUE_SCALE};
use crate::aggregate::{DayBucket, NmiDays};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyViolation {
    #[error("{date} holds {found} intervals, expected {expected}")]
    LengthMismatch {
        date: Date,
        found: usize,
        expected: usize,
    },
    #[error("{date} is partial but is not the final day")]
    PartialNotLast { date: Date },
    #[error("bucket for {date} belongs to NMI {found}")]
    ForeignBucket { date: Date, found: String },
    #[error("bucket for {date} uses {found}-minute intervals, expected {expected}")]
    IntervalLength { date: Date, found: u16, expected: u16 },
    #[error("{date} is not after the previous day")]
    OutOfOrder { date: Date },
    #[error("value {value} on {date} does not fit Numeric(15,3)")]
    ValueOutOfRange { date: Date, value: Decimal },
    #[error("value {value} on {date} has more than three decimal places")]
    PrecisionLoss { date: Date, value: Decimal },
}

/// An NMI whose data cannot be encoded. Only that NMI is left out of the file.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot encode NMI {nmi}: {violation}")]
pub struct InternalConsistencyError {
    pub nmi: String,
    pub violation: ConsistencyViolation,
}

#[derive(thiserror::Error, Debug)]
#[error("failed to render NEM12 records: {0}")]
pub struct RenderError(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFile {
    pub records: Vec<Nem12Record>,
    pub failures: Vec<InternalConsistencyError>,
}

impl EncodedFile {
    pub fn nmi_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r, Nem12Record::NmiDetails(_)))
            .count()
    }
}

fn value_limit() -> Decimal {
    Decimal::new(1_000_000_000_000, 0)
}

/// Builds the record sequence for one site file.
///
/// NMIs appear in the order given and NMIs without any exportable day are
/// omitted. The result is a pure function of its inputs.
pub fn encode_file(header: Header, nmis: &[NmiDays]) -> EncodedFile {
    let updated_at = header.created_at;
    let mut records = vec![Nem12Record::Header(header)];
    let mut failures = Vec::new();

    for nmi in nmis {
        if nmi.days.is_empty() {
            continue;
        }
        match encode_nmi(nmi, updated_at) {
            Ok(block) => records.extend(block),
            Err(violation) => failures.push(InternalConsistencyError {
                nmi: nmi.nmi.nmi.clone(),
                violation,
            }),
        }
    }

    records.push(Nem12Record::EndOfData);
    EncodedFile { records, failures }
}

fn encode_nmi(
    nmi: &NmiDays,
    updated_at: PrimitiveDateTime,
) -> Result<Vec<Nem12Record>, ConsistencyViolation> {
    let cfg = &nmi.nmi;
    let mut block = Vec::with_capacity(nmi.days.len() + 1);
    block.push(Nem12Record::NmiDetails(NmiDetails {
        nmi: cfg.nmi.clone(),
        nmi_configuration: cfg.nmi_configuration.clone(),
        register_id: cfg.register_id.clone(),
        nmi_suffix: cfg.nmi_suffix.clone(),
        mdm_data_stream_id: cfg.mdm_data_stream_id.clone(),
        meter_serial: cfg.meter_serial.clone(),
        uom: cfg.uom.clone(),
        interval_length: nmi.interval_length,
        next_scheduled_read_date: None,
    }));

    let last = nmi.days.len() - 1;
    let mut previous: Option<Date> = None;
    for (idx, day) in nmi.days.iter().enumerate() {
        if previous.is_some_and(|p| p >= day.date) {
            return Err(ConsistencyViolation::OutOfOrder { date: day.date });
        }
        previous = Some(day.date);
        check_bucket(&cfg.nmi, nmi.interval_length, day, idx == last)?;

        let quality_method = if day.readings.iter().all(|r| r.quality.is_actual()) {
            QualityMethod::Actual
        } else {
            QualityMethod::Substituted
        };
        block.push(Nem12Record::IntervalData(IntervalData {
            date: day.date,
            values: day.values().collect(),
            quality_method,
            updated_at,
        }));
    }

    Ok(block)
}

fn check_bucket(
    nmi: &str,
    length: IntervalLength,
    day: &DayBucket,
    is_last: bool,
) -> Result<(), ConsistencyViolation> {
    let date = day.date;
    if day.nmi != nmi {
        return Err(ConsistencyViolation::ForeignBucket {
            date,
            found: day.nmi.clone(),
        });
    }
    if day.interval_length != length {
        return Err(ConsistencyViolation::IntervalLength {
            date,
            found: day.interval_length.minutes(),
            expected: length.minutes(),
        });
    }
    if day.partial && !is_last {
        return Err(ConsistencyViolation::PartialNotLast { date });
    }

    let expected = length.intervals_per_day();
    let found = day.readings.len();
    let length_ok = if day.partial {
        found > 0 && found < expected
    } else {
        found == expected
    };
    if !length_ok {
        return Err(ConsistencyViolation::LengthMismatch {
            date,
            found,
            expected,
        });
    }

    let limit = value_limit();
    if let Some(value) = day.values().find(|v| v.abs() >= limit) {
        return Err(ConsistencyViolation::ValueOutOfRange { date, value });
    }
    if let Some(value) = day.values().find(|v| v.normalize().scale() > VALUE_SCALE) {
        return Err(ConsistencyViolation::PrecisionLoss { date, value });
    }
    Ok(())
}

/// Serializes records as CRLF-terminated comma-separated lines.
pub fn render(records: &[Nem12Record]) -> Result<Vec<u8>, RenderError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    for record in records {
        wtr.write_record(record.fields())
            .map_err(|e| RenderError(e.to_string()))?;
    }
    wtr.into_inner().map_err(|e| RenderError(e.to_string()))
}
