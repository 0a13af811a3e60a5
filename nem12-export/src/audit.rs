use std::fmt;

use rust_decimal::Decimal;
use time::Date;

use crate::nem12::{Nem12Record, QualityMethod};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditFinding {
    NegativeValue {
        nmi: String,
        date: Date,
        /// 1-based interval number within the day.
        interval: usize,
        value: Decimal,
    },
    DailyTotalAboveAlert {
        nmi: String,
        date: Date,
        total: Decimal,
        alert: Decimal,
    },
    FinalSubstituted {
        nmi: String,
        date: Date,
    },
}

impl fmt::Display for AuditFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeValue {
                nmi,
                date,
                interval,
                value,
            } => write!(f, "NMI {nmi} on {date}: interval {interval} is negative ({value})"),
            Self::DailyTotalAboveAlert {
                nmi,
                date,
                total,
                alert,
            } => write!(f, "NMI {nmi} on {date}: daily total {total} exceeds {alert}"),
            Self::FinalSubstituted { nmi, date } => {
                write!(f, "NMI {nmi} on {date}: final substituted data")
            }
        }
    }
}

/// Scans interval data for values worth a human look. Findings never block a file.
pub fn audit_records(records: &[Nem12Record], daily_total_alert: Option<Decimal>) -> Vec<AuditFinding> {
    let mut findings = Vec::new();
    let mut nmi = "";

    for record in records {
        match record {
            Nem12Record::NmiDetails(details) => nmi = details.nmi.as_str(),
            Nem12Record::IntervalData(day) => {
                for (idx, value) in day.values.iter().enumerate() {
                    if value.is_sign_negative() && !value.is_zero() {
                        findings.push(AuditFinding::NegativeValue {
                            nmi: nmi.to_string(),
                            date: day.date,
                            interval: idx + 1,
                            value: *value,
                        });
                    }
                }

                if let Some(alert) = daily_total_alert {
                    let total: Decimal = day.values.iter().sum();
                    if total > alert {
                        findings.push(AuditFinding::DailyTotalAboveAlert {
                            nmi: nmi.to_string(),
                            date: day.date,
                            total,
                            alert,
                        });
                    }
                }

                if day.quality_method == QualityMethod::FinalSubstituted {
                    findings.push(AuditFinding::FinalSubstituted {
                        nmi: nmi.to_string(),
                        date: day.date,
                    });
                }
            }
            Nem12Record::Header(_) | Nem12Record::EndOfData => {}
        }
    }

    findings
}
