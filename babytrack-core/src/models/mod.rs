mod baby;
mod entry;
mod payload;

pub use baby::{Baby, BabyUpdate, NewBaby, Units};
pub use entry::{Entry, EntryType, EntryUpdate, NewEntry};
pub use payload::{
    BreastSide, Consistency, DiaperColor, DiaperPayload, DiaperType, EntryPayload, FeedPayload,
    FeedSource, FormulaType, SleepPayload, SleepQuality, VolumeUnit,
};

/// Errors raised while building or decoding domain records.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(String),
    #[error("unknown entry type '{0}'. Valid options: feed, diaper, sleep")]
    UnknownEntryType(String),
    #[error("unknown units '{0}'. Valid options: metric, imperial")]
    UnknownUnits(String),
    #[error("sleep quality must be between 1 and 5, got {0}")]
    InvalidQuality(u8),
    #[error("sleep cannot end before it starts")]
    SleepEndsBeforeStart,
    #[error("invalid {entry_type} payload: {message}")]
    InvalidPayload {
        entry_type: EntryType,
        message: String,
    },
    #[error("cannot change a {from} entry into a {to} entry")]
    EntryTypeChange { from: EntryType, to: EntryType },
    #[error("invalid identifier '{0}'")]
    InvalidId(String),
}
