use std::collections::{BTreeMap, HashMap};

use meter_client::domain::{IntervalLength, IntervalReading, NmiConfig, Site};
use rust_decimal::Decimal;
use time::{Date, Time, UtcOffset};

use crate::window::RunWindow;

/// One NMI's readings for one local day, in interval order.
///
/// A bucket holds either every interval of the day, or (only for the final day of
/// the window) a gap-free prefix starting at midnight with `partial` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBucket {
    pub nmi: String,
    pub date: Date,
    pub interval_length: IntervalLength,
    pub readings: Vec<IntervalReading>,
    pub partial: bool,
}

impl DayBucket {
    pub fn values(&self) -> impl Iterator<Item = Decimal> + '_ {
        self.readings.iter().map(|r| r.value)
    }

    pub fn expected_len(&self) -> usize {
        self.interval_length.intervals_per_day()
    }
}

/// The exportable days of one configured NMI, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmiDays {
    pub nmi: NmiConfig,
    pub interval_length: IntervalLength,
    pub days: Vec<DayBucket>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    #[error("interval starting {expected} is missing")]
    Gap { expected: Time },
    #[error("duplicate interval at {at}")]
    Duplicate { at: Time },
    #[error("reading at {at} is off the {minutes}-minute interval grid")]
    Misaligned { at: Time, minutes: u16 },
    #[error("only {found} of {expected} intervals present on a day before the final one")]
    Incomplete { found: usize, expected: usize },
    #[error("no readings for the day")]
    NoReadings,
}

/// A day that cannot be exported as-is. The day is dropped from the file; no values
/// are invented in its place.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed interval data for NMI {nmi} on {date}: {kind}")]
pub struct MalformedIntervalDataError {
    pub nmi: String,
    pub date: Date,
    pub kind: MalformedKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedSite {
    /// Configured NMIs in configuration order.
    pub nmis: Vec<NmiDays>,
    pub rejected: Vec<MalformedIntervalDataError>,
    /// Readings for NMIs the site does not list.
    pub unmapped: usize,
}

pub struct ReadingAggregator<'a> {
    site: &'a Site,
    window: RunWindow,
    offset: UtcOffset,
}

impl<'a> ReadingAggregator<'a> {
    pub fn new(site: &'a Site, window: RunWindow, offset: UtcOffset) -> Self {
        Self {
            site,
            window,
            offset,
        }
    }

    pub fn aggregate(&self, readings: Vec<IntervalReading>) -> AggregatedSite {
        let mut out = AggregatedSite::default();
        let mut by_nmi: HashMap<String, BTreeMap<Date, Vec<IntervalReading>>> = HashMap::new();

        for reading in readings {
            if self.site.nmi(&reading.nmi).is_none() {
                out.unmapped += 1;
                continue;
            }
            let date = reading.timestamp.to_offset(self.offset).date();
            if !self.window.contains(date) {
                continue;
            }
            by_nmi
                .entry(reading.nmi.clone())
                .or_default()
                .entry(date)
                .or_default()
                .push(reading);
        }

        let length = self.site.interval_length;
        for cfg in &self.site.nmis {
            let mut buckets = by_nmi.remove(&cfg.nmi).unwrap_or_default();
            let mut days = Vec::new();

            for date in self.window.days() {
                let is_final = date == self.window.end_day;
                let Some(readings) = buckets.remove(&date) else {
                    // The final day may simply not have reported yet.
                    if !is_final {
                        out.rejected.push(MalformedIntervalDataError {
                            nmi: cfg.nmi.clone(),
                            date,
                            kind: MalformedKind::NoReadings,
                        });
                    }
                    continue;
                };

                match self.check_day(cfg, date, readings, is_final) {
                    Ok(bucket) => days.push(bucket),
                    Err(e) => out.rejected.push(e),
                }
            }

            out.nmis.push(NmiDays {
                nmi: cfg.clone(),
                interval_length: length,
                days,
            });
        }

        out
    }

    fn check_day(
        &self,
        cfg: &NmiConfig,
        date: Date,
        mut readings: Vec<IntervalReading>,
        is_final: bool,
    ) -> Result<DayBucket, MalformedIntervalDataError> {
        let length = self.site.interval_length;
        let reject = |kind| MalformedIntervalDataError {
            nmi: cfg.nmi.clone(),
            date,
            kind,
        };

        readings.sort_by_key(|r| r.timestamp);

        let midnight = date.midnight().assume_offset(self.offset);
        let step = length.duration();
        let mut slot = midnight;
        for (i, reading) in readings.iter().enumerate() {
            if reading.timestamp != slot {
                let at = reading.timestamp.to_offset(self.offset).time();
                let offset_secs = (reading.timestamp - midnight).whole_seconds();
                let kind = if i > 0 && readings[i - 1].timestamp == reading.timestamp {
                    MalformedKind::Duplicate { at }
                } else if offset_secs % step.whole_seconds() != 0 {
                    MalformedKind::Misaligned {
                        at,
                        minutes: length.minutes(),
                    }
                } else if reading.timestamp > slot {
                    MalformedKind::Gap {
                        expected: slot.to_offset(self.offset).time(),
                    }
                } else {
                    MalformedKind::Duplicate { at }
                };
                return Err(reject(kind));
            }
            slot += step;
        }

        let expected = length.intervals_per_day();
        let found = readings.len();
        let partial = found < expected;
        if partial && !is_final {
            return Err(reject(MalformedKind::Incomplete { found, expected }));
        }

        Ok(DayBucket {
            nmi: cfg.nmi.clone(),
            date,
            interval_length: length,
            readings,
            partial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_client::domain::QualityFlag;
    use rust_decimal_macros::dec;
    use time::{
        macros::{date, offset, time},
        Duration,
    };

    const NMI: &str = "NCCC000001";

    fn site(nmis: &[&str]) -> Site {
        Site {
            name: "233-255 Botany Road, Waterloo".to_string(),
            interval_length: IntervalLength::try_from(30).unwrap(),
            nmis: nmis.iter().map(|n| NmiConfig::new(*n)).collect(),
        }
    }

    fn window() -> RunWindow {
        RunWindow {
            start_day: date!(2025-08-24),
            end_day: date!(2025-08-27),
        }
    }

    fn day(nmi: &str, date: Date, slots: impl IntoIterator<Item = usize>) -> Vec<IntervalReading> {
        let midnight = date.midnight().assume_offset(offset!(+10));
        slots
            .into_iter()
            .map(|i| IntervalReading {
                nmi: nmi.to_string(),
                timestamp: midnight + Duration::minutes(30 * i as i64),
                value: dec!(0.125) * Decimal::from(i),
                quality: QualityFlag::Actual,
            })
            .collect()
    }

    fn full_window(nmi: &str) -> Vec<IntervalReading> {
        let mut readings = Vec::new();
        readings.extend(day(nmi, date!(2025-08-24), 0..48));
        readings.extend(day(nmi, date!(2025-08-25), 0..48));
        readings.extend(day(nmi, date!(2025-08-26), 0..48));
        readings.extend(day(nmi, date!(2025-08-27), 0..18));
        readings
    }

    #[test]
    fn complete_days_and_partial_final_day_are_bucketed() {
        let site = site(&[NMI]);
        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(full_window(NMI));

        assert!(out.rejected.is_empty());
        let days = &out.nmis[0].days;
        assert_eq!(days.len(), 4);
        assert_eq!(days[0].date, date!(2025-08-24));
        assert!(days[..3].iter().all(|d| d.readings.len() == 48 && !d.partial));
        assert_eq!(days[3].readings.len(), 18);
        assert!(days[3].partial);
    }

    #[test]
    fn missing_interval_excludes_only_that_day() {
        let site = site(&[NMI]);
        let readings: Vec<_> = full_window(NMI)
            .into_iter()
            .filter(|r| r.timestamp != date!(2025-08-25).with_time(time!(10:30)).assume_offset(offset!(+10)))
            .collect();

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        assert_eq!(
            out.rejected,
            vec![MalformedIntervalDataError {
                nmi: NMI.to_string(),
                date: date!(2025-08-25),
                kind: MalformedKind::Gap { expected: time!(10:30) },
            }]
        );
        let dates: Vec<_> = out.nmis[0].days.iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![date!(2025-08-24), date!(2025-08-26), date!(2025-08-27)]);
    }

    #[test]
    fn duplicate_interval_is_rejected() {
        let site = site(&[NMI]);
        let mut readings = full_window(NMI);
        readings.extend(day(NMI, date!(2025-08-24), [5]));

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].kind, MalformedKind::Duplicate { at: time!(02:30) });
        assert_eq!(out.nmis[0].days.len(), 3);
    }

    #[test]
    fn short_day_before_the_final_one_is_not_padded() {
        let site = site(&[NMI]);
        let mut readings = day(NMI, date!(2025-08-24), 0..48);
        readings.extend(day(NMI, date!(2025-08-25), 0..47));
        readings.extend(day(NMI, date!(2025-08-26), 0..48));

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        assert_eq!(
            out.rejected[0].kind,
            MalformedKind::Incomplete {
                found: 47,
                expected: 48
            }
        );
        assert!(out.nmis[0].days.iter().all(|d| d.readings.len() == 48));
    }

    #[test]
    fn off_grid_reading_is_misaligned() {
        let site = site(&[NMI]);
        let mut readings = day(NMI, date!(2025-08-27), 0..3);
        readings[2].timestamp += Duration::minutes(15);

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        assert!(out.rejected.iter().any(|e| e.date == date!(2025-08-27)
            && e.kind
                == MalformedKind::Misaligned {
                    at: time!(01:15),
                    minutes: 30
                }));
    }

    #[test]
    fn days_with_no_readings_are_reported_except_the_final_one() {
        let site = site(&[NMI]);
        let readings = day(NMI, date!(2025-08-24), 0..48);

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        let missing: Vec<_> = out.rejected.iter().map(|e| (e.date, e.kind.clone())).collect();
        assert_eq!(
            missing,
            vec![
                (date!(2025-08-25), MalformedKind::NoReadings),
                (date!(2025-08-26), MalformedKind::NoReadings),
            ]
        );
    }

    #[test]
    fn nmis_follow_configuration_order_and_unmapped_are_counted() {
        let site = site(&["NCCC000002", NMI]);
        let mut readings = full_window(NMI);
        readings.extend(full_window("NCCC000002"));
        readings.extend(day("NCCC999999", date!(2025-08-24), 0..2));

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        let order: Vec<_> = out.nmis.iter().map(|n| n.nmi.nmi.as_str()).collect();
        assert_eq!(order, vec!["NCCC000002", NMI]);
        assert_eq!(out.unmapped, 2);
    }

    fn site_every(minutes: u16) -> Site {
        Site {
            interval_length: IntervalLength::try_from(minutes).unwrap(),
            ..site(&[NMI])
        }
    }

    fn day_every(
        minutes: i64,
        date: Date,
        slots: impl IntoIterator<Item = i64>,
    ) -> Vec<IntervalReading> {
        let midnight = date.midnight().assume_offset(offset!(+10));
        slots
            .into_iter()
            .map(|i| IntervalReading {
                nmi: NMI.to_string(),
                timestamp: midnight + Duration::minutes(minutes * i),
                value: dec!(0.01),
                quality: QualityFlag::Actual,
            })
            .collect()
    }

    #[test]
    fn quarter_hour_grid_counts_96_and_rejects_gaps() {
        let site = site_every(15);
        let mut readings = day_every(15, date!(2025-08-24), 0..96);
        readings.extend(day_every(15, date!(2025-08-25), (0..96).filter(|i| *i != 41)));
        readings.extend(day_every(15, date!(2025-08-26), 0..96));
        readings.extend(day_every(15, date!(2025-08-27), 0..36));

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        assert_eq!(
            out.rejected,
            vec![MalformedIntervalDataError {
                nmi: NMI.to_string(),
                date: date!(2025-08-25),
                kind: MalformedKind::Gap { expected: time!(10:15) },
            }]
        );
        let lens: Vec<_> = out.nmis[0]
            .days
            .iter()
            .map(|d| (d.readings.len(), d.partial))
            .collect();
        assert_eq!(lens, vec![(96, false), (96, false), (36, true)]);
        assert_eq!(out.nmis[0].days[0].expected_len(), 96);
    }

    #[test]
    fn five_minute_grid_counts_288_and_rejects_gaps() {
        let site = site_every(5);
        let mut readings = day_every(5, date!(2025-08-24), 0..288);
        readings.extend(day_every(5, date!(2025-08-25), 0..288));
        readings.extend(day_every(5, date!(2025-08-26), (0..288).filter(|i| *i != 1)));
        readings.extend(day_every(5, date!(2025-08-27), 0..108));

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].date, date!(2025-08-26));
        assert_eq!(out.rejected[0].kind, MalformedKind::Gap { expected: time!(00:05) });
        let lens: Vec<_> = out.nmis[0]
            .days
            .iter()
            .map(|d| (d.readings.len(), d.partial))
            .collect();
        assert_eq!(lens, vec![(288, false), (288, false), (108, true)]);
    }

    #[test]
    fn thirty_minute_readings_leave_gaps_on_a_five_minute_site() {
        let site = site_every(5);
        let readings = day_every(30, date!(2025-08-24), 0..48);

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        assert_eq!(out.rejected[0].date, date!(2025-08-24));
        assert_eq!(out.rejected[0].kind, MalformedKind::Gap { expected: time!(00:05) });
    }

    #[test]
    fn local_day_boundaries_follow_the_offset() {
        let site = site(&[NMI]);
        // Readings stored in UTC still land on their market-time day.
        let readings: Vec<_> = full_window(NMI)
            .into_iter()
            .map(|mut r| {
                r.timestamp = r.timestamp.to_offset(offset!(UTC));
                r
            })
            .collect();

        let out = ReadingAggregator::new(&site, window(), offset!(+10)).aggregate(readings);

        assert!(out.rejected.is_empty());
        assert_eq!(out.nmis[0].days.len(), 4);
    }
}
