use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use aircomfort_common::{EnergyReading, HistoryApiConfig};

use crate::{
    collab::HistorySource,
    error::{Error, Result},
};

const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Client for the platform's value-history endpoint.
///
/// The endpoint answers `[{ id, history: [...] }]` with point fields spelled
/// either `x`/`y` or `created_at`/`val` depending on platform version, and
/// values that may arrive as numbers or strings. Unparseable points are
/// dropped, not fatal.
pub struct HistoryApiClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SeriesEnvelope {
    #[serde(default)]
    history: Vec<RawPoint>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    y: Option<serde_json::Value>,
    #[serde(default)]
    val: Option<serde_json::Value>,
}

impl HistoryApiClient {
    pub fn new(config: &HistoryApiConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HistorySource for HistoryApiClient {
    async fn fetch_history(
        &self,
        series_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EnergyReading>> {
        let url = format!("{}/configs/value_history/", self.base_url);
        let date_from = from.format(QUERY_TIME_FORMAT).to_string();
        let date_to = to.format(QUERY_TIME_FORMAT).to_string();
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .query(&[
                ("configs", series_id),
                ("date_from", date_from.as_str()),
                ("date_to", date_to.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::History(format!(
                "history request for series {series_id} failed: {status}"
            )));
        }

        let envelopes: Vec<SeriesEnvelope> = response.json().await?;
        let Some(envelope) = envelopes.into_iter().next() else {
            return Ok(Vec::new());
        };

        let mut readings = Vec::with_capacity(envelope.history.len());
        let mut dropped = 0usize;
        for point in envelope.history {
            match parse_point(&point) {
                Some(reading) => readings.push(reading),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("series {series_id}: dropped {dropped} unparseable history points");
        }
        Ok(readings)
    }
}

fn parse_point(point: &RawPoint) -> Option<EnergyReading> {
    let raw_time = point.created_at.as_deref().or(point.x.as_deref())?;
    let timestamp = parse_timestamp(raw_time)?;
    let raw_value = point.val.as_ref().or(point.y.as_ref())?;
    let value = parse_value(raw_value)?;
    Some(EnergyReading { timestamp, value })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

fn parse_value(raw: &serde_json::Value) -> Option<f64> {
    match raw {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(time: &str, value: serde_json::Value, legacy_fields: bool) -> RawPoint {
        if legacy_fields {
            RawPoint {
                x: Some(time.to_string()),
                created_at: None,
                y: Some(value),
                val: None,
            }
        } else {
            RawPoint {
                x: None,
                created_at: Some(time.to_string()),
                y: None,
                val: Some(value),
            }
        }
    }

    #[test]
    fn parses_both_field_spellings() {
        let modern = point("2026-07-15T09:00:00", serde_json::json!(120.5), false);
        let legacy = point("2026-07-15 09:00:00", serde_json::json!("120.5"), true);

        assert_eq!(parse_point(&modern).unwrap().value, 120.5);
        assert_eq!(parse_point(&legacy).unwrap().value, 120.5);
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let p = point("2026-07-15T09:00:00+07:00", serde_json::json!(1), false);
        let reading = parse_point(&p).unwrap();
        assert_eq!(
            reading.timestamp.format("%H:%M").to_string(),
            "02:00" // 09:00 at +07:00 is 02:00 UTC
        );
    }

    #[test]
    fn garbage_points_are_dropped() {
        let bad_time = point("yesterday-ish", serde_json::json!(1.0), false);
        let bad_value = point("2026-07-15T09:00:00", serde_json::json!("n/a"), false);
        let null_value = point("2026-07-15T09:00:00", serde_json::Value::Null, false);

        assert!(parse_point(&bad_time).is_none());
        assert!(parse_point(&bad_value).is_none());
        assert!(parse_point(&null_value).is_none());
    }
}
