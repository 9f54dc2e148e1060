//! Babytrack Core Library
//!
//! Shared types and logic for Babytrack applications: domain records, the
//! remote store client, the realtime change feed and derived statistics.

pub mod export;
pub mod feed;
pub mod identity;
pub mod models;
pub mod remote;
pub mod stats;
pub mod timefmt;

pub use export::{entries_to_csv, DateRange, ExportError};
pub use feed::{ChangeFeed, ChangeKind, FeedError, FeedEvent, FeedSettings, Subscription};
pub use identity::Caregiver;
pub use models::{
    Baby, BabyUpdate, Entry, EntryPayload, EntryType, EntryUpdate, ModelError, NewBaby, NewEntry,
    Units,
};
pub use remote::{check_server, EntryQuery, HttpRemoteStore, RemoteError, RemoteStore};
pub use stats::{DailyStats, FeedingGapAlert};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
