//! Conversions between Kubernetes `Time` and `chrono`.
//!
//! Both sides agree on RFC 3339 in their serde representation, so the
//! conversion goes through JSON rather than depending on the datetime crate
//! backing `k8s-openapi`.

use crate::error::ClusterError;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Converts a Kubernetes timestamp to UTC. Returns `None` for unparsable values.
pub fn to_utc(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Converts a UTC timestamp to a Kubernetes timestamp.
pub fn from_utc(dt: DateTime<Utc>) -> Result<Time, ClusterError> {
    let text = dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    Ok(serde_json::from_value(serde_json::Value::String(text))?)
}
