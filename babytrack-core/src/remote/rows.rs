//! Wire rows exchanged with the backend.
//!
//! Rows mirror the backend tables: snake_case columns, timestamps in the fixed
//! millisecond format, the entry payload as an opaque `payload_json` value next
//! to a separate `type` column, and a `deleted_at` tombstone.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Baby, Entry, EntryPayload, EntryType, ModelError, Units};
use crate::timefmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BabyRow {
    pub id: Uuid,
    pub name: String,
    pub birth_date: NaiveDate,
    pub preferred_units: Units,
    #[serde(with = "timefmt::millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timefmt::millis")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "timefmt::millis::option")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&Baby> for BabyRow {
    fn from(baby: &Baby) -> Self {
        Self {
            id: baby.id,
            name: baby.name.clone(),
            birth_date: baby.birth_date,
            preferred_units: baby.preferred_units,
            created_at: baby.created_at,
            updated_at: baby.updated_at,
            deleted_at: None,
        }
    }
}

impl From<BabyRow> for Baby {
    fn from(row: BabyRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            birth_date: row.birth_date,
            preferred_units: row.preferred_units,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRow {
    pub id: Uuid,
    pub baby_id: Uuid,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(with = "timefmt::millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "timefmt::millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timefmt::millis")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub payload_json: serde_json::Value,
    #[serde(default, with = "timefmt::millis::option")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&Entry> for EntryRow {
    fn from(entry: &Entry) -> Self {
        Self {
            id: entry.id,
            baby_id: entry.baby_id,
            entry_type: entry.entry_type(),
            timestamp: entry.timestamp,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            created_by: entry.created_by.clone(),
            notes: entry.notes.clone(),
            payload_json: entry.payload.to_value(),
            deleted_at: None,
        }
    }
}

impl TryFrom<EntryRow> for Entry {
    type Error = ModelError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let payload = EntryPayload::from_value(row.entry_type, row.payload_json)?;
        Ok(Self {
            id: row.id,
            baby_id: row.baby_id,
            timestamp: row.timestamp,
            created_at: row.created_at,
            updated_at: row.updated_at,
            created_by: row.created_by,
            notes: row.notes,
            payload,
        })
    }
}

/// Error body returned by the backend for non-success statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
