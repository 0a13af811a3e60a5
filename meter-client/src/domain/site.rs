#[cfg(feature = "serde")]
use serde::Deserialize;

const MINUTES_PER_DAY: u16 = 1440;

/// Sampling period of a metering point, in minutes.
///
/// Only the lengths NEM12 allows for interval data are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(try_from = "u16"))]
pub struct IntervalLength(u16);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("interval length must be 5, 15 or 30 minutes, got {0}")]
pub struct InvalidIntervalLength(pub u16);

impl IntervalLength {
    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Number of intervals in a complete day.
    pub fn intervals_per_day(self) -> usize {
        usize::from(MINUTES_PER_DAY / self.0)
    }

    pub fn duration(self) -> time::Duration {
        time::Duration::minutes(i64::from(self.0))
    }
}

impl TryFrom<u16> for IntervalLength {
    type Error = InvalidIntervalLength;

    fn try_from(minutes: u16) -> Result<Self, Self::Error> {
        match minutes {
            5 | 15 | 30 => Ok(Self(minutes)),
            other => Err(InvalidIntervalLength(other)),
        }
    }
}

/// A metering point and the register details written to its NMI data-details record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct NmiConfig {
    pub nmi: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub meter_serial: String,
    #[cfg_attr(feature = "serde", serde(default = "default_register"))]
    pub nmi_configuration: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub register_id: String,
    #[cfg_attr(feature = "serde", serde(default = "default_register"))]
    pub nmi_suffix: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub mdm_data_stream_id: String,
    #[cfg_attr(feature = "serde", serde(default = "default_uom"))]
    pub uom: String,
}

impl NmiConfig {
    pub fn new(nmi: impl Into<String>) -> Self {
        Self {
            nmi: nmi.into(),
            meter_serial: String::new(),
            nmi_configuration: default_register(),
            register_id: String::new(),
            nmi_suffix: default_register(),
            mdm_data_stream_id: String::new(),
            uom: default_uom(),
        }
    }
}

fn default_register() -> String {
    "E1".to_string()
}

fn default_uom() -> String {
    "KWH".to_string()
}

/// A physical site (metering address) and the NMIs exported for it, in export order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct Site {
    pub name: String,
    pub interval_length: IntervalLength,
    pub nmis: Vec<NmiConfig>,
}

impl Site {
    pub fn nmi(&self, nmi: &str) -> Option<&NmiConfig> {
        self.nmis.iter().find(|n| n.nmi == nmi)
    }
}
