use std::collections::HashMap;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike,
};
use serde::{Deserialize, Serialize};

use crate::types::EnergyReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartPeriod {
    Day,
    Week,
    Month,
}

impl ChartPeriod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }
}

/// Inclusive window a chart request covers, in the display timezone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub from: DateTime<FixedOffset>,
    pub to: DateTime<FixedOffset>,
}

/// Resolve the window for a period containing `reference`. A day view of the
/// current day ends at `now` rather than midnight; weeks start on Monday;
/// months cover the calendar month.
pub fn date_range(
    period: ChartPeriod,
    reference: DateTime<FixedOffset>,
    now: DateTime<FixedOffset>,
) -> DateRange {
    let offset = *reference.offset();
    let ref_date = reference.date_naive();

    let (from_naive, to_naive) = match period {
        ChartPeriod::Day => {
            let from = start_of_day(ref_date);
            let to = if ref_date == now.date_naive() {
                now.naive_local()
            } else {
                end_of_day(ref_date)
            };
            (from, to)
        }
        ChartPeriod::Week => {
            let monday = ref_date - Duration::days(ref_date.weekday().num_days_from_monday() as i64);
            (start_of_day(monday), end_of_day(monday + Duration::days(6)))
        }
        ChartPeriod::Month => {
            let first = ref_date.with_day(1).unwrap_or(ref_date);
            let next_month = if first.month() == 12 {
                NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
            };
            let last = next_month
                .map(|d| d - Duration::days(1))
                .unwrap_or(ref_date);
            (start_of_day(first), end_of_day(last))
        }
    };

    DateRange {
        from: local(from_naive, offset),
        to: local(to_naive, offset),
    }
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).expect("midnight always exists")
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(23, 59, 59).expect("valid wall time")
}

fn local(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    match offset.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        // Fixed offsets never produce ambiguous wall times.
        _ => DateTime::from_naive_utc_and_offset(naive - offset, offset),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionBucket {
    pub date: String,
    pub kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionSummary {
    pub total: f64,
    pub buckets: Vec<ConsumptionBucket>,
}

/// Bucket a window of cumulative counter readings for charting.
///
/// Day views bucket hourly and report cumulative consumption since the first
/// reading in the window; week/month views bucket daily and report the spread
/// within each bucket. Every bucket key in the range is emitted, zero-valued
/// when no reading landed in it, so chart axes stay contiguous. The input
/// series is not assumed sorted.
pub fn aggregate_consumption(
    readings: &[EnergyReading],
    period: ChartPeriod,
    range: DateRange,
) -> ConsumptionSummary {
    let offset = *range.from.offset();

    let mut valid: Vec<(NaiveDateTime, f64)> = readings
        .iter()
        .filter(|reading| reading.value.is_finite())
        .map(|reading| {
            (
                reading.timestamp.with_timezone(&offset).naive_local(),
                reading.value,
            )
        })
        .collect();
    valid.sort_by_key(|(at, _)| *at);

    let first_value = valid.first().map(|(_, value)| *value).unwrap_or(0.0);
    let total = match (valid.first(), valid.last()) {
        (Some((_, first)), Some((_, last))) => (last - first).max(0.0),
        _ => 0.0,
    };

    #[derive(Clone, Copy)]
    struct Bounds {
        min: f64,
        max: f64,
    }

    let mut grouped: HashMap<String, Bounds> = HashMap::new();
    for (at, value) in &valid {
        let key = bucket_key(period, *at);
        grouped
            .entry(key)
            .and_modify(|bounds| {
                bounds.min = bounds.min.min(*value);
                bounds.max = bounds.max.max(*value);
            })
            .or_insert(Bounds {
                min: *value,
                max: *value,
            });
    }

    let buckets = bucket_keys(period, range)
        .into_iter()
        .map(|key| {
            let kwh = grouped
                .get(&key)
                .map(|bounds| match period {
                    ChartPeriod::Day => bounds.max - first_value,
                    ChartPeriod::Week | ChartPeriod::Month => bounds.max - bounds.min,
                })
                .unwrap_or(0.0)
                .max(0.0);
            ConsumptionBucket { date: key, kwh }
        })
        .collect();

    ConsumptionSummary { total, buckets }
}

fn bucket_key(period: ChartPeriod, at: NaiveDateTime) -> String {
    match period {
        ChartPeriod::Day => at.format("%Y-%m-%dT%H:00:00").to_string(),
        ChartPeriod::Week | ChartPeriod::Month => at.format("%Y-%m-%d").to_string(),
    }
}

/// Every bucket key across the window, hour starts for day views and dates
/// otherwise.
fn bucket_keys(period: ChartPeriod, range: DateRange) -> Vec<String> {
    let from = range.from.naive_local();
    let to = range.to.naive_local();
    let mut keys = Vec::new();

    match period {
        ChartPeriod::Day => {
            let mut cursor = from
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(from);
            while cursor <= to {
                keys.push(cursor.format("%Y-%m-%dT%H:00:00").to_string());
                cursor += Duration::hours(1);
            }
        }
        ChartPeriod::Week | ChartPeriod::Month => {
            let mut cursor = from.date();
            while cursor <= to.date() {
                keys.push(cursor.format("%Y-%m-%d").to_string());
                cursor += Duration::days(1);
            }
        }
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn local_at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        tz()
            .with_ymd_and_hms(2026, 7, day, hour, minute, 0)
            .unwrap()
    }

    fn reading(day: u32, hour: u32, minute: u32, value: f64) -> EnergyReading {
        EnergyReading {
            timestamp: local_at(day, hour, minute).with_timezone(&Utc),
            value,
        }
    }

    #[test]
    fn day_range_of_today_ends_at_now() {
        let now = local_at(15, 14, 30);
        let range = date_range(ChartPeriod::Day, now, now);
        assert_eq!(range.from, local_at(15, 0, 0));
        assert_eq!(range.to, now);
    }

    #[test]
    fn day_range_of_past_day_covers_whole_day() {
        let range = date_range(ChartPeriod::Day, local_at(10, 9, 0), local_at(15, 14, 30));
        assert_eq!(range.from, local_at(10, 0, 0));
        assert_eq!(range.to.naive_local().time().hour(), 23);
    }

    #[test]
    fn week_range_starts_on_monday() {
        // 2026-07-15 is a Wednesday.
        let range = date_range(ChartPeriod::Week, local_at(15, 9, 0), local_at(15, 9, 0));
        assert_eq!(range.from, local_at(13, 0, 0));
        assert_eq!(range.to.date_naive().day(), 19);
    }

    #[test]
    fn month_range_covers_calendar_month() {
        let range = date_range(ChartPeriod::Month, local_at(15, 9, 0), local_at(15, 9, 0));
        assert_eq!(range.from.date_naive().day(), 1);
        assert_eq!(range.to.date_naive().day(), 31);
    }

    #[test]
    fn hourly_buckets_fill_gaps_across_the_whole_day() {
        let range = DateRange {
            from: local_at(10, 0, 0),
            to: local_at(10, 23, 59),
        };
        let readings = vec![
            reading(10, 9, 0, 120.0),
            reading(10, 9, 40, 120.4),
            reading(10, 10, 15, 121.0),
            reading(10, 11, 0, 121.5),
        ];

        let summary = aggregate_consumption(&readings, ChartPeriod::Day, range);

        assert_eq!(summary.buckets.len(), 24);
        assert_eq!(summary.buckets[0].kwh, 0.0);
        // Cumulative since the first reading of the window.
        assert!((summary.buckets[9].kwh - 0.4).abs() < 1e-9);
        assert!((summary.buckets[10].kwh - 1.0).abs() < 1e-9);
        assert!((summary.buckets[11].kwh - 1.5).abs() < 1e-9);
        assert_eq!(summary.buckets[12].kwh, 0.0);
        assert!((summary.total - 1.5).abs() < 1e-9);
    }

    #[test]
    fn daily_buckets_report_within_bucket_spread() {
        let range = DateRange {
            from: local_at(13, 0, 0),
            to: local_at(19, 23, 59),
        };
        let readings = vec![
            reading(13, 8, 0, 100.0),
            reading(13, 20, 0, 103.0),
            reading(15, 7, 0, 104.0),
            reading(15, 22, 0, 109.5),
        ];

        let summary = aggregate_consumption(&readings, ChartPeriod::Week, range);

        assert_eq!(summary.buckets.len(), 7);
        assert!((summary.buckets[0].kwh - 3.0).abs() < 1e-9);
        assert_eq!(summary.buckets[1].kwh, 0.0);
        assert!((summary.buckets[2].kwh - 5.5).abs() < 1e-9);
        assert!((summary.total - 9.5).abs() < 1e-9);
    }

    #[test]
    fn unsorted_input_and_nan_values_are_handled() {
        let range = DateRange {
            from: local_at(10, 0, 0),
            to: local_at(10, 23, 59),
        };
        let readings = vec![
            reading(10, 11, 0, 121.5),
            EnergyReading {
                timestamp: local_at(10, 10, 0).with_timezone(&Utc),
                value: f64::NAN,
            },
            reading(10, 9, 0, 120.0),
        ];

        let summary = aggregate_consumption(&readings, ChartPeriod::Day, range);
        assert!((summary.total - 1.5).abs() < 1e-9);
    }

    #[test]
    fn counter_reset_clamps_to_zero_not_negative() {
        let range = DateRange {
            from: local_at(10, 0, 0),
            to: local_at(10, 23, 59),
        };
        let readings = vec![reading(10, 9, 0, 120.0), reading(10, 11, 0, 3.0)];

        let summary = aggregate_consumption(&readings, ChartPeriod::Day, range);
        assert_eq!(summary.total, 0.0);
        for bucket in &summary.buckets {
            assert!(bucket.kwh >= 0.0);
        }
    }

    #[test]
    fn empty_series_yields_zeroed_buckets() {
        let range = DateRange {
            from: local_at(10, 0, 0),
            to: local_at(10, 23, 59),
        };
        let summary = aggregate_consumption(&[], ChartPeriod::Day, range);
        assert_eq!(summary.total, 0.0);
        assert_eq!(summary.buckets.len(), 24);
        assert!(summary.buckets.iter().all(|bucket| bucket.kwh == 0.0));
    }
}
