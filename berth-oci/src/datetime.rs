use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// RFC3339 timestamp as reported by the container engine, normalized to
/// UTC. Derefs to the inner [`chrono::DateTime`] so sweeps can do age
/// arithmetic on it directly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(chrono::DateTime<Utc>);

impl DateTime {
    /// The engine reports `0001-01-01T00:00:00Z` for timestamps that were
    /// never set, e.g. `finished_at` on a container that has not exited.
    pub fn is_zero(&self) -> bool {
        self.0.year() <= 1
    }
}

impl Deref for DateTime {
    type Target = chrono::DateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(value: chrono::DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.to_rfc3339().fmt(f)
    }
}

impl FromStr for DateTime {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        chrono::DateTime::parse_from_rfc3339(s).map(|t| Self(t.to_utc()))
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid engine timestamp: {e}")))
    }
}
