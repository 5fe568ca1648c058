use chrono::{DateTime, Utc};
use serde::Serializer;

/// Serialize as ISO 8601 with millisecond precision, matching JS `Date.toISOString()`.
pub(crate) fn serialize_iso_opt<S: Serializer>(
    dt: &Option<DateTime<Utc>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match dt {
        Some(dt) => s.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
        None => s.serialize_none(),
    }
}

/// Serde adapter for `Duration` fields stored on the wire as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
