//! Core type definitions for playbook identifiers and timestamps.
//!
//! Identifiers are string newtypes so that records written by other tools
//! (any string id) stay addressable. Freshly generated ids use UUID v7 for
//! time-ordering.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Bullet identifier.
///
/// Generated once when a bullet is constructed and never changed.
/// Ordering is lexicographic and is used as the ranking tie-break.
///
/// # Example
/// ```
/// use ace_playbook::BulletId;
///
/// let id = BulletId::new();
/// assert!(!id.as_str().is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BulletId(String);

impl BulletId {
    /// Creates a new BulletId backed by a UUID v7 (time-ordered).
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the id as a string slice (the storage key).
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BulletId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for BulletId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BulletId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for BulletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trace identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Creates a new TraceId backed by a UUID v7 (time-ordered).
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the id as a string slice (the storage key).
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TraceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TraceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds in one day.
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Unix timestamp in milliseconds.
///
/// Serialized as an ISO-8601 / RFC 3339 string so persisted records stay
/// readable by other tools. Naive ISO strings (no offset) are read as UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    #[inline]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Creates a timestamp from Unix milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns big-endian bytes for storage (enables lexicographic ordering).
    ///
    /// Only meaningful for non-negative timestamps.
    #[inline]
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Formats as RFC 3339 with millisecond precision, e.g.
    /// `2025-01-31T12:00:00.000Z`.
    pub fn to_rfc3339(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parses an ISO-8601 string with or without a UTC offset.
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Self(dt.timestamp_millis()));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Self(naive.and_utc().timestamp_millis()))
    }

    /// Whole and fractional days elapsed from `self` until `now`.
    ///
    /// Negative when `self` lies in the future.
    pub fn days_until(&self, now: Timestamp) -> f64 {
        (now.0 - self.0) as f64 / MILLIS_PER_DAY
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ISO-8601 timestamp: {raw}")))
    }
}

/// Embedding vector type.
///
/// Length is whatever the configured embedding provider produces; the ranker
/// and curator skip vectors whose length differs from the one compared.
pub type Embedding = Vec<f32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bullet_id_unique_and_ordered() {
        let a = BulletId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = BulletId::new();
        assert_ne!(a, b);
        // UUID v7 strings sort by creation time
        assert!(a < b);
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = BulletId::from("b-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"b-1\"");

        let trace: TraceId = serde_json::from_str("\"t-9\"").unwrap();
        assert_eq!(trace.as_str(), "t-9");
    }

    #[test]
    fn test_timestamp_iso_round_trip() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2023-11-14T22:13:20.123Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_timestamp_parses_naive_and_offset_forms() {
        let naive = Timestamp::parse("2023-11-14T22:13:20.123456").unwrap();
        assert_eq!(naive.as_millis(), 1_700_000_000_123);

        let offset = Timestamp::parse("2023-11-14T23:13:20.123+01:00").unwrap();
        assert_eq!(offset.as_millis(), 1_700_000_000_123);

        assert!(Timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_timestamp_bincode_round_trip() {
        let ts = Timestamp::now();
        let bytes = bincode::serialize(&ts).unwrap();
        let back: Timestamp = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_days_until() {
        let start = Timestamp::from_millis(0);
        let later = Timestamp::from_millis(3 * 86_400_000);
        assert!((start.days_until(later) - 3.0).abs() < 1e-9);
        assert!(later.days_until(start) < 0.0);
    }

    #[test]
    fn test_timestamp_be_bytes_ordering() {
        let t1 = Timestamp::from_millis(1000);
        let t2 = Timestamp::from_millis(2000);
        assert!(t1.to_be_bytes() < t2.to_be_bytes());
    }
}
