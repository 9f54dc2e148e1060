use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::payload::EntryPayload;
use super::ModelError;
use crate::timefmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Feed,
    Diaper,
    Sleep,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Feed => "feed",
            EntryType::Diaper => "diaper",
            EntryType::Sleep => "sleep",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "feed" => Ok(EntryType::Feed),
            "diaper" => Ok(EntryType::Diaper),
            "sleep" => Ok(EntryType::Sleep),
            _ => Err(ModelError::UnknownEntryType(s.to_string())),
        }
    }
}

/// A logged feeding, diaper change or sleep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub baby_id: Uuid,
    /// When the event happened, as opposed to when it was recorded.
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub notes: Option<String>,
    pub payload: EntryPayload,
}

impl Entry {
    pub fn entry_type(&self) -> EntryType {
        self.payload.entry_type()
    }

    /// Builds a record from creation input with an assigned id and creation
    /// time.
    pub fn from_new(
        new: NewEntry,
        id: Uuid,
        created_at: DateTime<Utc>,
        created_by: Option<String>,
    ) -> Self {
        let created_at = timefmt::truncate(created_at);
        Self {
            id,
            baby_id: new.baby_id,
            timestamp: timefmt::truncate(new.timestamp),
            created_at,
            updated_at: created_at,
            created_by,
            notes: new.notes,
            payload: new.payload,
        }
    }

    /// Fails when the update's payload is of another type than the entry.
    pub fn check_update(&self, update: &EntryUpdate) -> Result<(), ModelError> {
        match &update.payload {
            Some(payload) if payload.entry_type() != self.entry_type() => {
                Err(ModelError::EntryTypeChange {
                    from: self.entry_type(),
                    to: payload.entry_type(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Applies an update. The payload is replaced as a whole, never merged,
    /// and must keep the entry's type.
    pub fn apply(
        &mut self,
        update: &EntryUpdate,
        updated_at: DateTime<Utc>,
    ) -> Result<(), ModelError> {
        self.check_update(update)?;
        if let Some(ts) = update.timestamp {
            self.timestamp = timefmt::truncate(ts);
        }
        if let Some(notes) = &update.notes {
            self.notes = notes.clone();
        }
        if let Some(payload) = &update.payload {
            self.payload = payload.clone();
        }
        self.updated_at = timefmt::truncate(updated_at);
        Ok(())
    }

    /// True for a sleep entry without an end time.
    pub fn is_active_sleep(&self) -> bool {
        self.payload
            .as_sleep()
            .map(|s| s.in_progress())
            .unwrap_or(false)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {:<6}  {}",
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.entry_type(),
            self.payload.summary()
        )?;
        if let Some(notes) = &self.notes {
            write!(f, "  ({})", notes)?;
        }
        Ok(())
    }
}

/// Input for creating an entry; id and creation time are assigned on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub baby_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
    pub payload: EntryPayload,
}

impl NewEntry {
    pub fn new(baby_id: Uuid, payload: EntryPayload) -> Self {
        Self {
            baby_id,
            timestamp: timefmt::now(),
            notes: None,
            payload,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Partial entry update. `notes: Some(None)` clears the notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub notes: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EntryPayload>,
}

impl EntryUpdate {
    pub fn payload(payload: EntryPayload) -> Self {
        Self {
            payload: Some(payload),
            ..Default::default()
        }
    }

    pub fn notes(notes: Option<String>) -> Self {
        Self {
            notes: Some(notes),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none() && self.notes.is_none() && self.payload.is_none()
    }
}

/// Distinguishes an explicit `null` (clear) from an absent field (keep).
fn present_or_null<'de, D>(d: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(d).map(Some)
}
