//! RFC 3339 timestamps truncated to millisecond precision.
//!
//! Records are compared byte-for-byte across machines, so every timestamp is
//! normalised to UTC milliseconds on the way in and printed with exactly three
//! fractional digits on the way out.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Truncates a timestamp to whole milliseconds.
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Parses an RFC 3339 string into a millisecond-precision UTC timestamp.
pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let parsed = DateTime::parse_from_rfc3339(raw)?;
    Ok(truncate_millis(parsed.with_timezone(&Utc)))
}

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(ts))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

pub mod option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_str(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_truncates_to_millis_and_normalises_offset() {
        let ts = parse("2025-03-01T12:00:00.123456+02:00").unwrap();
        assert_eq!(format(&ts), "2025-03-01T10:00:00.123Z");
    }

    #[test]
    fn format_always_prints_three_fraction_digits() {
        let ts = parse("2025-03-01T10:00:00Z").unwrap();
        assert_eq!(format(&ts), "2025-03-01T10:00:00.000Z");
    }
}
