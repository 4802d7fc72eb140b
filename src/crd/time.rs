//! Conversions between API timestamps and `chrono`
//!
//! `Time` is converted through its RFC3339 wire form so the core does not
//! depend on which datetime crate k8s-openapi wraps.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Convert an API timestamp to a UTC datetime
pub fn to_chrono(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    let raw = value.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a UTC datetime to an API timestamp (second precision)
pub fn from_chrono(dt: DateTime<Utc>) -> Option<Time> {
    let raw = dt.to_rfc3339_opts(SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(raw)).ok()
}
