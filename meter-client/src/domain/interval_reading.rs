use rust_decimal::Decimal;
use time::OffsetDateTime;

/// Data quality of a single metered interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QualityFlag {
    #[default]
    Actual,
    Substituted,
    Estimated,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown quality flag '{0}'")]
pub struct UnknownQualityFlag(pub String);

impl QualityFlag {
    /// Parse the flag stored alongside a reading. A missing or blank flag means the
    /// meter delivered the value itself.
    pub fn from_code(code: Option<&str>) -> Result<Self, UnknownQualityFlag> {
        match code.map(str::trim).unwrap_or("") {
            "" | "A" | "a" => Ok(Self::Actual),
            "S" | "s" | "F" | "f" => Ok(Self::Substituted),
            "E" | "e" => Ok(Self::Estimated),
            other => Err(UnknownQualityFlag(other.to_string())),
        }
    }

    pub fn is_actual(self) -> bool {
        matches!(self, Self::Actual)
    }
}

/// One raw interval value as delivered by the metering database.
///
/// `timestamp` marks the start of the interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalReading {
    pub nmi: String,
    pub timestamp: OffsetDateTime,
    pub value: Decimal,
    pub quality: QualityFlag,
}
