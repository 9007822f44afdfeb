//! Serde helpers for backend field encodings.
//!
//! The backend serialises identifiers as JSON numbers (Java `Long`) on some
//! endpoints and as strings on others, and emits `LocalDateTime` values
//! without an offset.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de;
use std::fmt;

struct IdVisitor;

impl<'de> de::Visitor<'de> for IdVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("string or integer identifier")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        Ok(v.to_string())
    }
}

pub fn id<'de, D: de::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    d.deserialize_any(IdVisitor)
}

pub fn opt_id<'de, D: de::Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<String>;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("optional identifier")
        }
        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_some<D: de::Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            id(d).map(Some)
        }
    }
    d.deserialize_option(Visitor)
}

/// Parse RFC 3339, or an ISO local date-time which is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn timestamp<'de, D: de::Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let s: String = de::Deserialize::deserialize(d)?;
    parse_timestamp(&s).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "id")]
        id: String,
        #[serde(default, deserialize_with = "opt_id")]
        other: Option<String>,
        #[serde(deserialize_with = "timestamp")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_numeric_and_string_ids() {
        let a: Probe =
            serde_json::from_str(r#"{"id": 42, "other": "7", "at": "2024-03-01T10:00:00"}"#)
                .unwrap();
        assert_eq!(a.id, "42");
        assert_eq!(a.other.as_deref(), Some("7"));

        let b: Probe =
            serde_json::from_str(r#"{"id": "A1", "other": null, "at": "2024-03-01T10:00:00Z"}"#)
                .unwrap();
        assert_eq!(b.id, "A1");
        assert!(b.other.is_none());
    }

    #[test]
    fn test_local_and_offset_timestamps_agree() {
        let local = parse_timestamp("2024-03-01T10:00:00.123").unwrap();
        let zoned = parse_timestamp("2024-03-01T12:00:00.123+02:00").unwrap();
        assert_eq!(local, zoned);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
