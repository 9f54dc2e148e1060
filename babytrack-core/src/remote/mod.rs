//! Remote Store Client.
//!
//! Typed CRUD over babies and entries against the shared backend. The backend
//! enforces row-level access: a caregiver sees only babies they have a
//! caregiver relationship with. Deletes set a tombstone and reads skip
//! tombstoned rows.

mod client;
mod error;
mod rows;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use client::{check_server, realtime_url, HttpRemoteStore};
pub use error::RemoteError;
pub use rows::{BabyRow, EntryRow, ErrorBody};

use crate::export::DateRange;
use crate::identity::Caregiver;
use crate::models::{Baby, BabyUpdate, Entry, EntryType, EntryUpdate, NewBaby, NewEntry};
use crate::timefmt;

/// Entries returned by a listing when no limit is given.
pub const DEFAULT_ENTRY_LIMIT: u32 = 100;

/// Filter for entry listings. Results are newest first by event time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryQuery {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<EntryType>,
    /// Inclusive lower bound on the event timestamp.
    #[serde(
        default,
        with = "timefmt::millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the event timestamp.
    #[serde(
        default,
        with = "timefmt::millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl EntryQuery {
    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_ENTRY_LIMIT)
    }

    /// True if the entry satisfies the type and time filters. The limit is
    /// not considered.
    pub fn matches(&self, entry: &Entry) -> bool {
        self.entry_type.map_or(true, |t| entry.entry_type() == t)
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp < to)
    }
}

/// Operations against the shared backend, on behalf of one caregiver.
///
/// Every call returns the canonical server record, including server-side
/// timestamps. Upserts are keyed by id and idempotent; the backend keeps the
/// copy with the newest `updated_at`, so an upsert may answer with a row
/// other than the one sent.
pub trait RemoteStore: Send + Sync {
    fn list_babies(
        &self,
        who: &Caregiver,
    ) -> impl Future<Output = Result<Vec<Baby>, RemoteError>> + Send;

    fn get_baby(
        &self,
        who: &Caregiver,
        id: Uuid,
    ) -> impl Future<Output = Result<Baby, RemoteError>> + Send;

    /// Creates the baby and the caller's caregiver relationship to it.
    fn create_baby(
        &self,
        who: &Caregiver,
        new: &NewBaby,
    ) -> impl Future<Output = Result<Baby, RemoteError>> + Send;

    fn update_baby(
        &self,
        who: &Caregiver,
        id: Uuid,
        update: &BabyUpdate,
    ) -> impl Future<Output = Result<Baby, RemoteError>> + Send;

    fn delete_baby(
        &self,
        who: &Caregiver,
        id: Uuid,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn upsert_baby(
        &self,
        who: &Caregiver,
        baby: &Baby,
    ) -> impl Future<Output = Result<Baby, RemoteError>> + Send;

    fn list_entries(
        &self,
        who: &Caregiver,
        baby_id: Uuid,
        query: &EntryQuery,
    ) -> impl Future<Output = Result<Vec<Entry>, RemoteError>> + Send;

    fn get_entry(
        &self,
        who: &Caregiver,
        id: Uuid,
    ) -> impl Future<Output = Result<Entry, RemoteError>> + Send;

    fn create_entry(
        &self,
        who: &Caregiver,
        new: &NewEntry,
    ) -> impl Future<Output = Result<Entry, RemoteError>> + Send;

    fn update_entry(
        &self,
        who: &Caregiver,
        id: Uuid,
        update: &EntryUpdate,
    ) -> impl Future<Output = Result<Entry, RemoteError>> + Send;

    fn delete_entry(
        &self,
        who: &Caregiver,
        id: Uuid,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn upsert_entry(
        &self,
        who: &Caregiver,
        entry: &Entry,
    ) -> impl Future<Output = Result<Entry, RemoteError>> + Send;

    /// CSV export of a baby's entry history.
    fn export_csv(
        &self,
        who: &Caregiver,
        baby_id: Uuid,
        range: &DateRange,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;
}
