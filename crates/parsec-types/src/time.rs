//! Timestamps with microsecond precision.
//!
//! Every certificate and vlob atom carries a client-provided timestamp; the
//! server compares them against its own clock and against per-topic bounds.
//! Sub-microsecond precision is truncated so that a timestamp survives a
//! serialization round trip unchanged.

use std::fmt;
use std::ops::Sub;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A UTC timestamp, microsecond precision.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime(chrono::DateTime<Utc>);

impl DateTime {
    /// The current time, truncated to microseconds.
    pub fn now() -> Self {
        Self::from_chrono(Utc::now())
    }

    pub fn from_chrono(dt: chrono::DateTime<Utc>) -> Self {
        let micros = dt.timestamp_micros();
        Self::from_timestamp_micros(micros)
    }

    pub fn from_timestamp_micros(micros: i64) -> Self {
        // Truncation keeps us inside chrono's representable range
        let secs = micros.div_euclid(1_000_000);
        let sub_micros = micros.rem_euclid(1_000_000) as u32;
        let dt = Utc
            .timestamp_opt(secs, sub_micros * 1_000)
            .single()
            .unwrap_or_default();
        Self(dt)
    }

    pub fn as_timestamp_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    pub fn as_timestamp_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Offset by whole seconds. Convenient for ballpark math and tests.
    pub fn add_seconds(&self, seconds: i64) -> Self {
        Self::from_timestamp_micros(self.as_timestamp_micros() + seconds * 1_000_000)
    }

    pub fn add_micros(&self, micros: i64) -> Self {
        Self::from_timestamp_micros(self.as_timestamp_micros() + micros)
    }

    /// Parse an RFC 3339 string, e.g. `2000-01-02T00:00:00Z`.
    pub fn from_rfc3339(raw: &str) -> Result<Self, chrono::ParseError> {
        let dt = chrono::DateTime::parse_from_rfc3339(raw)?;
        Ok(Self::from_chrono(dt.with_timezone(&Utc)))
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    }
}

impl Sub for DateTime {
    type Output = chrono::Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateTime({})", self.to_rfc3339())
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

// Wire format is the integer count of microseconds since the Unix epoch.

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_timestamp_micros())
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let micros = i64::deserialize(deserializer)?;
        Ok(Self::from_timestamp_micros(micros))
    }
}
