use time::{Date, Duration, OffsetDateTime, UtcOffset};

/// The inclusive range of local days exported by one run.
///
/// Always derived from the instant the run fires, never cached across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    pub start_day: Date,
    pub end_day: Date,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("window end offset {end_offset} exceeds day range {day_range}")]
    Inverted { day_range: u32, end_offset: u32 },
    #[error("window falls outside the representable calendar")]
    OutOfRange,
}

impl RunWindow {
    /// Window running from `today - day_range` through `today - end_offset`, where
    /// `today` is the local date of `now` in `offset`.
    pub fn ending_before(
        now: OffsetDateTime,
        offset: UtcOffset,
        day_range: u32,
        end_offset: u32,
    ) -> Result<Self, WindowError> {
        if end_offset > day_range {
            return Err(WindowError::Inverted {
                day_range,
                end_offset,
            });
        }

        let today = now.to_offset(offset).date();
        let back = |days: u32| {
            today
                .checked_sub(Duration::days(i64::from(days)))
                .ok_or(WindowError::OutOfRange)
        };

        Ok(Self {
            start_day: back(day_range)?,
            end_day: back(end_offset)?,
        })
    }

    pub fn contains(&self, day: Date) -> bool {
        self.start_day <= day && day <= self.end_day
    }

    pub fn days(&self) -> impl Iterator<Item = Date> {
        let end = self.end_day;
        std::iter::successors(Some(self.start_day), move |d| d.next_day().filter(|n| *n <= end))
    }

    /// Right-open instant range covering every local day of the window.
    pub fn bounds(&self, offset: UtcOffset) -> Result<(OffsetDateTime, OffsetDateTime), WindowError> {
        let start = self.start_day.midnight().assume_offset(offset);
        let end = self
            .end_day
            .next_day()
            .ok_or(WindowError::OutOfRange)?
            .midnight()
            .assume_offset(offset);
        Ok((start, end))
    }
}
