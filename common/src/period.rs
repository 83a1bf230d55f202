use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A tracked consumption period: one day, or one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedPeriod {
    Day,
    Month,
}

/// Identifies one (period, date) pair and the window searched when the
/// starting counter value has to be recovered from the time-series source.
///
/// The window intentionally spans the whole anchor day (for months, the whole
/// first day of the month) so devices that report late still land in it.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodWindow {
    pub key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrackedPeriod {
    /// Storage key for the period containing `date`: the date itself for
    /// days, the first of the month for months. Both format as `YYYY-MM-DD`.
    pub fn key_for(self, date: NaiveDate) -> String {
        self.anchor(date).format("%Y-%m-%d").to_string()
    }

    fn anchor(self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => date,
            Self::Month => date.with_day(1).unwrap_or(date),
        }
    }

    /// Build the resolution window for the period containing `date`, with
    /// wall times interpreted in `offset`.
    pub fn window(self, date: NaiveDate, offset: FixedOffset) -> PeriodWindow {
        let anchor = self.anchor(date);
        let start = local_to_utc(anchor, 0, 0, 0, offset);
        let end = local_to_utc(anchor, 23, 59, 59, offset);
        PeriodWindow {
            key: self.key_for(date),
            start,
            end,
        }
    }
}

fn local_to_utc(date: NaiveDate, hour: u32, min: u32, sec: u32, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date
        .and_hms_opt(hour, min, sec)
        .expect("valid wall time");
    match offset.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        _ => DateTime::from_naive_utc_and_offset(naive - offset, Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    #[test]
    fn day_key_is_the_date_itself() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        assert_eq!(TrackedPeriod::Day.key_for(date), "2026-07-15");
    }

    #[test]
    fn month_key_is_first_of_month() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        assert_eq!(TrackedPeriod::Month.key_for(date), "2026-07-01");
    }

    #[test]
    fn day_window_spans_whole_local_day() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let window = TrackedPeriod::Day.window(date, tz());

        // Local midnight at UTC+7 is 17:00 the previous day in UTC.
        assert_eq!(window.start.format("%Y-%m-%dT%H:%M:%S").to_string(), "2026-07-14T17:00:00");
        assert_eq!(window.end.format("%Y-%m-%dT%H:%M:%S").to_string(), "2026-07-15T16:59:59");
    }

    #[test]
    fn month_window_covers_only_the_first_day() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let window = TrackedPeriod::Month.window(date, tz());

        assert_eq!(window.key, "2026-07-01");
        assert_eq!(window.end - window.start, chrono::Duration::seconds(86_399));
    }
}
