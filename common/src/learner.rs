use std::collections::VecDeque;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::comfort::BASE_TARGET_C;

/// A manual temperature change made while automatic control was active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverrideEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "oldTemp")]
    pub old_temp: i32,
    #[serde(rename = "newTemp")]
    pub new_temp: i32,
}

pub const OVERRIDE_LOG_CAP: usize = 1000;

/// Append-only override history, oldest dropped first. The log is the single
/// source of truth for the learned offset; the offset itself is never stored.
#[derive(Debug, Clone, Default)]
pub struct OverrideLog {
    events: VecDeque<OverrideEvent>,
}

impl OverrideLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<OverrideEvent>) -> Self {
        let mut log = Self::new();
        for event in events {
            log.push(event);
        }
        log
    }

    pub fn push(&mut self, event: OverrideEvent) {
        if self.events.len() >= OVERRIDE_LOG_CAP {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &OverrideEvent> {
        self.events.iter()
    }

    pub fn to_vec(&self) -> Vec<OverrideEvent> {
        self.events.iter().copied().collect()
    }

    /// Offset derived from overrides in the last `window_days` whose
    /// time-of-day falls within ±`window_hours` of `now` (circular, so late
    /// evening neighbours early morning). Mean of (new target − base),
    /// rounded to the nearest 0.5 °C; zero when nothing qualifies.
    pub fn learned_offset(&self, now: DateTime<Utc>, window_days: i64, window_hours: f64) -> f64 {
        let cutoff = now - Duration::days(window_days);
        let now_seconds = seconds_of_day(now);

        let deltas: Vec<f64> = self
            .events
            .iter()
            .filter(|event| event.timestamp > cutoff)
            .filter(|event| {
                circular_hour_distance(now_seconds, seconds_of_day(event.timestamp))
                    <= window_hours
            })
            .map(|event| event.new_temp as f64 - BASE_TARGET_C)
            .collect();

        if deltas.is_empty() {
            return 0.0;
        }

        let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
        (mean * 2.0).round() / 2.0
    }
}

fn seconds_of_day(at: DateTime<Utc>) -> u32 {
    at.num_seconds_from_midnight()
}

/// Hour distance on the 24h clock, wrapping across midnight.
fn circular_hour_distance(a_seconds: u32, b_seconds: u32) -> f64 {
    let diff = a_seconds.abs_diff(b_seconds);
    let wrapped = diff.min(86_400 - diff);
    wrapped as f64 / 3_600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn stale_events_are_excluded_and_recent_ones_counted() {
        let mut log = OverrideLog::new();
        // Seven days old at the same hour: outside the recency window.
        log.push(OverrideEvent {
            timestamp: at(8, 8, 0),
            old_temp: 26,
            new_temp: 28,
        });
        // Ten minutes from evaluation time today.
        log.push(OverrideEvent {
            timestamp: at(15, 8, 10),
            old_temp: 26,
            new_temp: 27,
        });

        assert_eq!(log.learned_offset(at(15, 8, 0), 7, 3.0), 1.0);
    }

    #[test]
    fn events_outside_the_time_of_day_window_do_not_bleed() {
        let mut log = OverrideLog::new();
        log.push(OverrideEvent {
            timestamp: at(15, 8, 10),
            old_temp: 26,
            new_temp: 27,
        });

        // Evening evaluation: the morning preference must not apply.
        assert_eq!(log.learned_offset(at(15, 20, 0), 7, 3.0), 0.0);
    }

    #[test]
    fn window_wraps_across_midnight() {
        let mut log = OverrideLog::new();
        log.push(OverrideEvent {
            timestamp: at(14, 23, 30),
            old_temp: 26,
            new_temp: 24,
        });

        // 01:00 is 1.5h from 23:30 on the circular clock.
        assert_eq!(log.learned_offset(at(15, 1, 0), 7, 3.0), -2.0);
    }

    #[test]
    fn mean_rounds_to_nearest_half_degree() {
        let mut log = OverrideLog::new();
        for new_temp in [27, 28] {
            log.push(OverrideEvent {
                timestamp: at(15, 9, 0),
                old_temp: 26,
                new_temp,
            });
        }

        // Mean of +1 and +2 is +1.5.
        assert_eq!(log.learned_offset(at(15, 9, 30), 7, 3.0), 1.5);

        log.push(OverrideEvent {
            timestamp: at(15, 9, 5),
            old_temp: 26,
            new_temp: 27,
        });
        // Mean of +1, +2, +1 = 1.333 -> 1.5.
        assert_eq!(log.learned_offset(at(15, 9, 30), 7, 3.0), 1.5);
    }

    #[test]
    fn empty_window_yields_zero() {
        let log = OverrideLog::new();
        assert_eq!(log.learned_offset(at(15, 9, 0), 7, 3.0), 0.0);
    }

    #[test]
    fn log_caps_at_limit_dropping_oldest() {
        let mut log = OverrideLog::new();
        for i in 0..(OVERRIDE_LOG_CAP + 10) {
            log.push(OverrideEvent {
                timestamp: at(15, 9, 0) + Duration::seconds(i as i64),
                old_temp: 26,
                new_temp: 27,
            });
        }

        assert_eq!(log.len(), OVERRIDE_LOG_CAP);
        let first = log.events().next().unwrap();
        assert_eq!(first.timestamp, at(15, 9, 0) + Duration::seconds(10));
    }
}
