use std::{io::Read, str::FromStr};

use csv::StringRecord;
use meter_client::domain::IntervalLength;
use rust_decimal::Decimal;
use time::{macros::format_description, Date, PrimitiveDateTime};

use super::{
    Header, IntervalData, Nem12Record, NmiDetails, QualityMethod, END_OF_DATA, HEADER,
    INTERVAL_DATA, NMI_DETAILS,
};

// quality method, reason code, reason description, update date-time, MSATS load date-time
const INTERVAL_TRAILER: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("line {line}: {message}")]
    Malformed { line: u64, message: String },
    #[error("failed to read NEM12 data: {0}")]
    Csv(#[from] csv::Error),
}

/// Parses a NEM12 file back into records. Record types this crate never writes
/// are reported as malformed.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<Nem12Record>, DecodeError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        let record = decode_row(&row).map_err(|message| DecodeError::Malformed { line, message })?;
        records.push(record);
    }
    Ok(records)
}

fn decode_row(row: &StringRecord) -> Result<Nem12Record, String> {
    let field = |idx: usize| -> Result<&str, String> {
        row.get(idx)
            .map(str::trim)
            .ok_or_else(|| format!("missing field {idx}"))
    };

    match field(0)? {
        HEADER => Ok(Nem12Record::Header(Header {
            created_at: parse_minute_stamp(field(2)?)?,
            from_participant: field(3)?.to_string(),
            to_participant: field(4)?.to_string(),
        })),
        NMI_DETAILS => {
            let minutes: u16 = field(8)?
                .parse()
                .map_err(|e| format!("invalid interval length: {e}"))?;
            let next_read = field(9).unwrap_or_default();
            Ok(Nem12Record::NmiDetails(NmiDetails {
                nmi: field(1)?.to_string(),
                nmi_configuration: field(2)?.to_string(),
                register_id: field(3)?.to_string(),
                nmi_suffix: field(4)?.to_string(),
                mdm_data_stream_id: field(5)?.to_string(),
                meter_serial: field(6)?.to_string(),
                uom: field(7)?.to_string(),
                interval_length: IntervalLength::try_from(minutes).map_err(|e| e.to_string())?,
                next_scheduled_read_date: if next_read.is_empty() {
                    None
                } else {
                    Some(parse_day_stamp(next_read)?)
                },
            }))
        }
        INTERVAL_DATA => {
            if row.len() < 2 + INTERVAL_TRAILER {
                return Err(format!("interval data record has only {} fields", row.len()));
            }
            let trailer = row.len() - INTERVAL_TRAILER;
            let values = (2..trailer)
                .map(|idx| {
                    let raw = field(idx)?;
                    Decimal::from_str(raw).map_err(|e| format!("invalid value '{raw}': {e}"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let code = field(trailer)?;
            Ok(Nem12Record::IntervalData(IntervalData {
                date: parse_day_stamp(field(1)?)?,
                values,
                quality_method: QualityMethod::from_code(code)
                    .ok_or_else(|| format!("unknown quality method '{code}'"))?,
                updated_at: parse_second_stamp(field(trailer + 3)?)?,
            }))
        }
        END_OF_DATA => Ok(Nem12Record::EndOfData),
        other => Err(format!("unsupported record indicator '{other}'")),
    }
}

fn parse_day_stamp(raw: &str) -> Result<Date, String> {
    Date::parse(raw, format_description!("[year][month][day]"))
        .map_err(|e| format!("invalid date '{raw}': {e}"))
}

fn parse_minute_stamp(raw: &str) -> Result<PrimitiveDateTime, String> {
    PrimitiveDateTime::parse(raw, format_description!("[year][month][day][hour][minute]"))
        .map_err(|e| format!("invalid date-time '{raw}': {e}"))
}

fn parse_second_stamp(raw: &str) -> Result<PrimitiveDateTime, String> {
    PrimitiveDateTime::parse(
        raw,
        format_description!("[year][month][day][hour][minute][second]"),
    )
    .map_err(|e| format!("invalid date-time '{raw}': {e}"))
}
