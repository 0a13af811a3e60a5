mod interval_reading;
mod site;

pub use interval_reading::{IntervalReading, QualityFlag, UnknownQualityFlag};
pub use site::{IntervalLength, InvalidIntervalLength, NmiConfig, Site};
