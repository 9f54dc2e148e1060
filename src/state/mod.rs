//! Client state stores.
//!
//! UI-facing projections over the data service: the selected baby, its
//! entries with optimistic mutations, caregivers online on the baby's change
//! feed, and derived daily stats.

mod context;
mod entries;

pub use context::AppContext;
pub use entries::{EntriesSlice, Mutation, RollbackToken};

use std::fmt;

use babytrack_core::FeedError;
use uuid::Uuid;

use crate::sync::SyncError;

#[derive(Debug)]
pub enum StateError {
    Sync(SyncError),
    Feed(FeedError),
    NoActiveBaby,
    UnknownBaby(Uuid),
    UnknownEntry(Uuid),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::Sync(e) => write!(f, "{}", e),
            StateError::Feed(e) => write!(f, "Change feed error: {}", e),
            StateError::NoActiveBaby => write!(f, "No baby selected"),
            StateError::UnknownBaby(id) => write!(f, "Baby not found: {}", id),
            StateError::UnknownEntry(id) => write!(f, "Entry not found: {}", id),
        }
    }
}

impl std::error::Error for StateError {}

impl From<SyncError> for StateError {
    fn from(e: SyncError) -> Self {
        StateError::Sync(e)
    }
}

impl From<FeedError> for StateError {
    fn from(e: FeedError) -> Self {
        StateError::Feed(e)
    }
}

impl From<crate::db::LocalStoreError> for StateError {
    fn from(e: crate::db::LocalStoreError) -> Self {
        StateError::Sync(e.into())
    }
}
