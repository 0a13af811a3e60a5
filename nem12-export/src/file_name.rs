use std::fmt;

use time::Date;

use crate::nem12::day_stamp;

/// Identifies one site file of one run: the run date followed by the site's
/// 1-based position in the configured site list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunId {
    pub run_date: Date,
    pub sequence: u32,
}

impl RunId {
    pub fn new(run_date: Date, sequence: u32) -> Self {
        Self { run_date, sequence }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:05}", day_stamp(self.run_date), self.sequence)
    }
}

/// `NEM12#<runId>#<suffixTag>#<provider>.csv`
pub fn file_name(run_id: RunId, suffix_tag: &str, provider: &str) -> String {
    format!("NEM12#{run_id}#{suffix_tag}#{provider}.csv")
}
