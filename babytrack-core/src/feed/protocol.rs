//! Wire protocol of the realtime change feed.
//!
//! Messages travel as CBOR-encoded binary WebSocket frames. One connection
//! serves one baby's channel.
//!
//! 1. Client sends `join`
//! 2. Server answers `joined` with the caregivers currently online
//! 3. Server pushes `change` for every entry row written on that baby, and
//!    relays `presence` beacons between caregivers
//! 4. Client sends `presence` with status `offline` and `leave` before
//!    disconnecting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::EntryRow;
use crate::timefmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Inserted => write!(f, "inserted"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// A caregiver's last known presence on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceInfo {
    pub caregiver_id: String,
    #[serde(with = "timefmt::millis")]
    pub last_seen: DateTime<Utc>,
}

/// Message types of the change feed protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Client opens the channel
    Join { caregiver_id: String },
    /// Heartbeat or offline beacon, sent by clients and relayed by the server
    Presence {
        caregiver_id: String,
        status: PresenceStatus,
        #[serde(with = "timefmt::millis")]
        last_seen: DateTime<Utc>,
    },
    /// Client closes the channel
    Leave { caregiver_id: String },
    /// Server confirms the join
    Joined {
        baby_id: String,
        online: Vec<PresenceInfo>,
    },
    /// An entry row of the channel's baby was written
    Change { kind: ChangeKind, entry: EntryRow },
    /// Error from server
    Error { message: String },
}

impl FeedMessage {
    /// Encode message as CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    /// Decode message from CBOR bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::from_reader(data)
    }

    pub fn presence(caregiver_id: &str, status: PresenceStatus) -> Self {
        FeedMessage::Presence {
            caregiver_id: caregiver_id.to_string(),
            status,
            last_seen: timefmt::now(),
        }
    }
}
