//! NEM12 interval metering records.
//!
//! A file is one `100` header, then per NMI a `200` data-details record followed by
//! its `300` interval-data records (one per day), then a single `900` end marker.

use meter_client::domain::IntervalLength;
use rust_decimal::{Decimal, RoundingStrategy};
use time::{Date, PrimitiveDateTime};

pub mod decode;
pub mod encode;

pub use decode::{read_records, DecodeError};
pub use encode::{
    encode_file, render, ConsistencyViolation, EncodedFile, InternalConsistencyError, RenderError,
};

pub const HEADER: &str = "100";
pub const NMI_DETAILS: &str = "200";
pub const INTERVAL_DATA: &str = "300";
pub const END_OF_DATA: &str = "900";

const VERSION_HEADER: &str = "NEM12";

/// Digits after the decimal point of every interval value (Numeric(15,3)).
pub const VALUE_SCALE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityMethod {
    Actual,
    Substituted,
    FinalSubstituted,
    Estimated,
    Null,
    Variable,
}

impl QualityMethod {
    pub fn code(self) -> &'static str {
        match self {
            Self::Actual => "A",
            Self::Substituted => "S",
            Self::FinalSubstituted => "F",
            Self::Estimated => "E",
            Self::Null => "N",
            Self::Variable => "V",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Self::Actual),
            "S" => Some(Self::Substituted),
            "F" => Some(Self::FinalSubstituted),
            "E" => Some(Self::Estimated),
            "N" => Some(Self::Null),
            "V" => Some(Self::Variable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub created_at: PrimitiveDateTime,
    pub from_participant: String,
    pub to_participant: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmiDetails {
    pub nmi: String,
    pub nmi_configuration: String,
    pub register_id: String,
    pub nmi_suffix: String,
    pub mdm_data_stream_id: String,
    pub meter_serial: String,
    pub uom: String,
    pub interval_length: IntervalLength,
    pub next_scheduled_read_date: Option<Date>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalData {
    pub date: Date,
    pub values: Vec<Decimal>,
    pub quality_method: QualityMethod,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nem12Record {
    Header(Header),
    NmiDetails(NmiDetails),
    IntervalData(IntervalData),
    EndOfData,
}

impl Nem12Record {
    pub fn indicator(&self) -> &'static str {
        match self {
            Self::Header(_) => HEADER,
            Self::NmiDetails(_) => NMI_DETAILS,
            Self::IntervalData(_) => INTERVAL_DATA,
            Self::EndOfData => END_OF_DATA,
        }
    }

    /// The record's comma-separated fields, indicator first.
    pub fn fields(&self) -> Vec<String> {
        let mut out = vec![self.indicator().to_string()];
        match self {
            Self::Header(h) => {
                out.push(VERSION_HEADER.to_string());
                out.push(minute_stamp(h.created_at));
                out.push(h.from_participant.clone());
                out.push(h.to_participant.clone());
            }
            Self::NmiDetails(d) => {
                out.extend([
                    d.nmi.clone(),
                    d.nmi_configuration.clone(),
                    d.register_id.clone(),
                    d.nmi_suffix.clone(),
                    d.mdm_data_stream_id.clone(),
                    d.meter_serial.clone(),
                    d.uom.clone(),
                    d.interval_length.minutes().to_string(),
                    d.next_scheduled_read_date.map(day_stamp).unwrap_or_default(),
                ]);
            }
            Self::IntervalData(d) => {
                out.push(day_stamp(d.date));
                out.extend(d.values.iter().copied().map(format_value));
                out.extend([
                    d.quality_method.code().to_string(),
                    // reason code, reason description
                    String::new(),
                    String::new(),
                    second_stamp(d.updated_at),
                    // MSATS load date-time
                    String::new(),
                ]);
            }
            Self::EndOfData => {}
        }
        out
    }
}

/// Fixed three-decimal rendering, rounded half away from zero.
pub fn format_value(value: Decimal) -> String {
    let mut v = value.round_dp_with_strategy(VALUE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    if v.is_zero() {
        v.set_sign_positive(true);
    }
    v.rescale(VALUE_SCALE);
    v.to_string()
}

pub(crate) fn day_stamp(date: Date) -> String {
    format!("{:04}{:02}{:02}", date.year(), u8::from(date.month()), date.day())
}

fn minute_stamp(at: PrimitiveDateTime) -> String {
    format!("{}{:02}{:02}", day_stamp(at.date()), at.hour(), at.minute())
}

fn second_stamp(at: PrimitiveDateTime) -> String {
    format!("{}{:02}", minute_stamp(at), at.second())
}
