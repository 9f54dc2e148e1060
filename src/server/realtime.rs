//! Realtime change feed over WebSocket.
//!
//! One broadcast channel per baby. Entry writes made through the REST API are
//! published as `change` messages; presence beacons from connected clients
//! are tracked per baby and relayed to the other connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use babytrack_core::feed::{ChangeKind, FeedMessage, PresenceInfo, PresenceStatus, PresenceTracker};
use babytrack_core::remote::EntryRow;
use babytrack_core::{timefmt, Entry};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Messages buffered per baby before slow connections start lagging.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct Relayed {
    /// Connection the message came from; `None` for server-originated ones.
    from: Option<u64>,
    msg: FeedMessage,
}

/// Tracks connected clients per baby for broadcasting.
pub struct RealtimeHub {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<Relayed>>>,
    presence: Mutex<HashMap<Uuid, PresenceTracker>>,
    presence_timeout: Duration,
    next_connection: AtomicU64,
}

impl RealtimeHub {
    pub fn new(presence_timeout: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            presence: Mutex::new(HashMap::new()),
            presence_timeout,
            next_connection: AtomicU64::new(1),
        }
    }

    async fn subscribe(&self, baby_id: Uuid) -> broadcast::Receiver<Relayed> {
        let mut channels = self.channels.write().await;
        channels
            .entry(baby_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    async fn relay(&self, baby_id: Uuid, from: Option<u64>, msg: FeedMessage) {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(&baby_id) {
            // No receivers means nobody is listening
            let _ = sender.send(Relayed { from, msg });
        }
    }

    /// Publishes an entry write to every connection on the entry's baby.
    pub async fn publish_change(&self, kind: ChangeKind, entry: &Entry) {
        let mut row = EntryRow::from(entry);
        if kind == ChangeKind::Deleted {
            row.deleted_at = Some(timefmt::now());
        }
        tracing::debug!("Publishing {} of entry {}", kind, entry.id);
        self.relay(entry.baby_id, None, FeedMessage::Change { kind, entry: row })
            .await;
    }

    fn with_presence<T>(&self, baby_id: Uuid, f: impl FnOnce(&mut PresenceTracker) -> T) -> T {
        let mut presence = self.presence.lock().unwrap_or_else(|e| e.into_inner());
        let tracker = presence
            .entry(baby_id)
            .or_insert_with(|| PresenceTracker::new(self.presence_timeout));
        f(tracker)
    }

    /// Marks the caregiver online and returns everyone online on the baby.
    fn join(&self, baby_id: Uuid, caregiver_id: &str) -> Vec<PresenceInfo> {
        self.with_presence(baby_id, |tracker| {
            let now = timefmt::now();
            tracker.prune(now);
            tracker.heartbeat(caregiver_id, now);
            tracker.online()
        })
    }

    fn heartbeat(&self, baby_id: Uuid, caregiver_id: &str) {
        self.with_presence(baby_id, |tracker| {
            tracker.heartbeat(caregiver_id, timefmt::now());
        })
    }

    fn leave(&self, baby_id: Uuid, caregiver_id: &str) {
        self.with_presence(baby_id, |tracker| {
            tracker.leave(caregiver_id);
        })
    }

    /// Caregivers currently online on the baby.
    pub fn online(&self, baby_id: Uuid) -> Vec<PresenceInfo> {
        self.with_presence(baby_id, |tracker| {
            tracker.prune(timefmt::now());
            tracker.online()
        })
    }
}

/// Serves one client connection on a baby's channel until either side
/// closes it.
pub async fn serve_connection(socket: WebSocket, hub: &RealtimeHub, baby_id: Uuid, user_id: String) {
    let conn_id = hub.next_connection.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = socket.split();
    let mut relayed = hub.subscribe(baby_id).await;
    let mut joined = false;

    tracing::info!("Realtime connection {} for baby {} by {}", conn_id, baby_id, user_id);

    loop {
        tokio::select! {
            frame = stream.next() => {
                let data = match frame {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!("Realtime connection {} error: {}", conn_id, e);
                        break;
                    }
                };

                let msg = match FeedMessage::decode(&data) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!("Undecodable frame on connection {}: {}", conn_id, e);
                        continue;
                    }
                };

                // Presence is attributed to the authenticated user, whatever
                // id the client put in the message.
                let reply = match msg {
                    FeedMessage::Join { .. } => {
                        joined = true;
                        let online = hub.join(baby_id, &user_id);
                        hub.relay(baby_id, Some(conn_id), FeedMessage::presence(&user_id, PresenceStatus::Online)).await;
                        Some(FeedMessage::Joined { baby_id: baby_id.to_string(), online })
                    }
                    FeedMessage::Presence { status: PresenceStatus::Online, .. } => {
                        hub.heartbeat(baby_id, &user_id);
                        hub.relay(baby_id, Some(conn_id), FeedMessage::presence(&user_id, PresenceStatus::Online)).await;
                        None
                    }
                    FeedMessage::Presence { status: PresenceStatus::Offline, .. } => {
                        hub.leave(baby_id, &user_id);
                        hub.relay(baby_id, Some(conn_id), FeedMessage::presence(&user_id, PresenceStatus::Offline)).await;
                        None
                    }
                    FeedMessage::Leave { .. } => break,
                    other => Some(FeedMessage::Error {
                        message: format!("unexpected message from client: {:?}", other),
                    }),
                };

                if let Some(reply) = reply {
                    if send(&mut sink, &reply).await.is_err() {
                        break;
                    }
                }
            }
            msg = relayed.recv() => {
                match msg {
                    Ok(Relayed { from, .. }) if from == Some(conn_id) => {}
                    Ok(Relayed { msg, .. }) => {
                        if send(&mut sink, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Realtime connection {} lagged, {} messages dropped", conn_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if joined {
        hub.leave(baby_id, &user_id);
        hub.relay(
            baby_id,
            Some(conn_id),
            FeedMessage::presence(&user_id, PresenceStatus::Offline),
        )
        .await;
    }
    tracing::info!("Realtime connection {} closed", conn_id);
}

async fn send<S>(sink: &mut S, msg: &FeedMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let encoded = msg.encode().map_err(|e| {
        tracing::warn!("Failed to encode feed message: {}", e);
    })?;
    sink.send(Message::Binary(encoded.into())).await.map_err(|_| ())
}
