//! Change Notification Channel.
//!
//! Near-real-time entry changes and caregiver presence, one channel per baby.
//! Delivery order is whatever the transport provides; consumers treat events
//! as a cue to re-fetch. A dropped connection is reported, not retried.

mod channel;
mod presence;
mod protocol;
mod transport;

pub use channel::{ChangeFeed, FeedEvent, FeedSettings, Subscription};
pub use presence::PresenceTracker;
pub use protocol::{ChangeKind, FeedMessage, PresenceInfo, PresenceStatus};
pub use transport::{FeedConnection, FeedTransport, LoopbackTransport, WsTransport};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Change feed connection closed")]
    Closed,
}
