//! Fixed-format timestamp encoding.
//!
//! Every persisted or transmitted copy of a record stores its timestamps as
//! `YYYY-MM-DDTHH:MM:SS.mmmZ`. The format is fixed-width, so encoded values sort
//! lexicographically in time order and range filters can compare strings.
//! Values are truncated to milliseconds before they are handed out, which keeps
//! the encode/decode pair lossless.

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};

use crate::models::ModelError;

/// Timestamp format with millisecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Calendar date format used for birth dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Drops sub-millisecond precision.
pub fn truncate(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// Current time, truncated to milliseconds.
pub fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}

pub fn encode(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Decodes a stored timestamp. Any RFC 3339 value is accepted so rows written
/// by other tools still load.
pub fn decode(value: &str) -> Result<DateTime<Utc>, ModelError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ModelError::InvalidTimestamp(format!("{}: {}", value, e)))
}

pub fn encode_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn decode_date(value: &str) -> Result<NaiveDate, ModelError> {
    // Accept full timestamps too; only the date part is meaningful.
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, DATE_FORMAT)
        .map_err(|e| ModelError::InvalidTimestamp(format!("{}: {}", value, e)))
}

/// Serde adapter writing `DateTime<Utc>` in the fixed format.
pub mod millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::encode(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::decode(&raw).map_err(serde::de::Error::custom)
    }

    /// Same as the parent module, for optional fields.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => s.serialize_some(&super::super::encode(ts)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|r| super::super::decode(&r).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Hands out creation timestamps that never go backwards, even if the wall
/// clock does.
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let current = now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if current > *last {
            *last = current;
        }
        *last
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
