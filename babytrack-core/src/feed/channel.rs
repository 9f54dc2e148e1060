//! Per-baby change channels and their listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::presence::PresenceTracker;
use super::protocol::{ChangeKind, FeedMessage, PresenceInfo, PresenceStatus};
use super::transport::{FeedConnection, FeedTransport};
use super::FeedError;
use crate::identity::Caregiver;
use crate::models::Entry;
use crate::timefmt;

/// Tunables of the change feed.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// How often this client re-announces its presence.
    pub heartbeat: Duration,
    /// Silence after which another caregiver counts as offline.
    pub presence_timeout: Duration,
    /// Capacity of each listener's queue.
    pub channel_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            presence_timeout: Duration::from_secs(90),
            channel_capacity: 64,
        }
    }
}

/// Event delivered to listeners. Events are advisory: consumers re-fetch
/// rather than apply them as deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change {
        baby_id: Uuid,
        kind: ChangeKind,
        entry: Entry,
    },
    /// Caregivers currently online on the channel, this client excluded.
    Presence {
        baby_id: Uuid,
        online: Vec<PresenceInfo>,
    },
    /// The connection ended. The channel must be subscribed again.
    Disconnected { baby_id: Uuid },
}

impl FeedEvent {
    pub fn baby_id(&self) -> Uuid {
        match self {
            FeedEvent::Change { baby_id, .. }
            | FeedEvent::Presence { baby_id, .. }
            | FeedEvent::Disconnected { baby_id } => *baby_id,
        }
    }
}

type ListenerMap = HashMap<Uuid, Vec<(u64, mpsc::Sender<FeedEvent>)>>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    by_baby: Mutex<ListenerMap>,
}

impl Listeners {
    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerMap> {
        self.by_baby.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, baby_id: Uuid, capacity: usize) -> (u64, mpsc::Receiver<FeedEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.lock().entry(baby_id).or_default().push((id, tx));
        (id, rx)
    }

    fn remove(&self, baby_id: Uuid, id: u64) {
        let mut map = self.lock();
        if let Some(list) = map.get_mut(&baby_id) {
            list.retain(|(listener, _)| *listener != id);
            if list.is_empty() {
                map.remove(&baby_id);
            }
        }
    }

    fn count(&self, baby_id: Uuid) -> usize {
        self.lock().get(&baby_id).map_or(0, |l| l.len())
    }

    fn dispatch(&self, event: FeedEvent) {
        let baby_id = event.baby_id();
        let mut map = self.lock();
        let Some(list) = map.get_mut(&baby_id) else {
            return;
        };
        list.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Listener {} on baby {} is full, dropping event", id, baby_id);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            map.remove(&baby_id);
        }
    }
}

/// A listener's handle. Dropping it detaches the listener.
pub struct Subscription {
    id: u64,
    baby_id: Uuid,
    receiver: mpsc::Receiver<FeedEvent>,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn baby_id(&self) -> Uuid {
        self.baby_id
    }

    /// Waits for the next event. `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.baby_id, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("baby_id", &self.baby_id)
            .finish()
    }
}

struct Channel {
    caregiver_id: String,
    outbound: mpsc::Sender<FeedMessage>,
    task: JoinHandle<()>,
}

/// Change Notification Channel: at most one live connection per baby, fanned
/// out to any number of listeners.
pub struct ChangeFeed<T: FeedTransport> {
    transport: T,
    settings: FeedSettings,
    channels: tokio::sync::Mutex<HashMap<Uuid, Channel>>,
    listeners: Arc<Listeners>,
}

impl<T: FeedTransport> ChangeFeed<T> {
    pub fn new(transport: T) -> Self {
        Self::with_settings(transport, FeedSettings::default())
    }

    pub fn with_settings(transport: T, settings: FeedSettings) -> Self {
        Self {
            transport,
            settings,
            channels: tokio::sync::Mutex::new(HashMap::new()),
            listeners: Arc::new(Listeners::default()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Opens the baby's channel. Subscribing to an open channel is a no-op.
    pub async fn subscribe(&self, baby_id: Uuid, who: &Caregiver) -> Result<(), FeedError> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(&baby_id) {
            if !channel.task.is_finished() {
                return Ok(());
            }
            channels.remove(&baby_id);
        }

        let FeedConnection { outbound, inbound } = self.transport.connect(baby_id, who).await?;
        outbound
            .send(FeedMessage::Join {
                caregiver_id: who.id.clone(),
            })
            .await
            .map_err(|_| FeedError::Closed)?;

        let task = tokio::spawn(run_channel(
            baby_id,
            who.id.clone(),
            inbound,
            outbound.clone(),
            Arc::clone(&self.listeners),
            self.settings.clone(),
        ));
        channels.insert(
            baby_id,
            Channel {
                caregiver_id: who.id.clone(),
                outbound,
                task,
            },
        );
        tracing::info!("Subscribed to change feed for baby {}", baby_id);
        Ok(())
    }

    /// Announces this caregiver offline, then closes the channel. Closing a
    /// channel that is not open is a no-op.
    pub async fn unsubscribe(&self, baby_id: Uuid) {
        let Some(channel) = self.channels.lock().await.remove(&baby_id) else {
            return;
        };

        let _ = channel
            .outbound
            .send(FeedMessage::presence(&channel.caregiver_id, PresenceStatus::Offline))
            .await;
        let _ = channel
            .outbound
            .send(FeedMessage::Leave {
                caregiver_id: channel.caregiver_id.clone(),
            })
            .await;
        channel.task.abort();
        tracing::info!("Unsubscribed from change feed for baby {}", baby_id);
    }

    pub async fn unsubscribe_all(&self) {
        let ids: Vec<Uuid> = self.channels.lock().await.keys().copied().collect();
        for id in ids {
            self.unsubscribe(id).await;
        }
    }

    pub async fn is_subscribed(&self, baby_id: Uuid) -> bool {
        self.channels
            .lock()
            .await
            .get(&baby_id)
            .map_or(false, |c| !c.task.is_finished())
    }

    /// Registers a listener for the baby's events. Listening does not open
    /// the channel.
    pub fn listen(&self, baby_id: Uuid) -> Subscription {
        let (id, receiver) = self.listeners.add(baby_id, self.settings.channel_capacity);
        Subscription {
            id,
            baby_id,
            receiver,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self, baby_id: Uuid) -> usize {
        self.listeners.count(baby_id)
    }
}

async fn run_channel(
    baby_id: Uuid,
    caregiver_id: String,
    mut inbound: mpsc::Receiver<FeedMessage>,
    outbound: mpsc::Sender<FeedMessage>,
    listeners: Arc<Listeners>,
    settings: FeedSettings,
) {
    let mut presence = PresenceTracker::new(settings.presence_timeout);
    let mut heartbeat = tokio::time::interval(settings.heartbeat);

    loop {
        tokio::select! {
            msg = inbound.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                if let Some(event) = handle_message(baby_id, &caregiver_id, msg, &mut presence) {
                    listeners.dispatch(event);
                }
            }
            _ = heartbeat.tick() => {
                let beacon = FeedMessage::presence(&caregiver_id, PresenceStatus::Online);
                if outbound.send(beacon).await.is_err() {
                    break;
                }
                let expired = presence.prune(timefmt::now());
                if !expired.is_empty() {
                    tracing::debug!("Presence expired on baby {}: {:?}", baby_id, expired);
                    listeners.dispatch(FeedEvent::Presence {
                        baby_id,
                        online: presence.online(),
                    });
                }
            }
        }
    }

    tracing::info!("Change feed for baby {} disconnected", baby_id);
    listeners.dispatch(FeedEvent::Disconnected { baby_id });
}

/// Turns an inbound message into the event listeners should see, if any.
fn handle_message(
    baby_id: Uuid,
    own_id: &str,
    msg: FeedMessage,
    presence: &mut PresenceTracker,
) -> Option<FeedEvent> {
    let presence_event = |presence: &PresenceTracker| FeedEvent::Presence {
        baby_id,
        online: presence.online(),
    };

    match msg {
        FeedMessage::Change { kind, entry } => {
            if entry.baby_id != baby_id {
                tracing::warn!("Ignoring change for baby {} on channel {}", entry.baby_id, baby_id);
                return None;
            }
            match Entry::try_from(entry) {
                Ok(entry) => Some(FeedEvent::Change {
                    baby_id,
                    kind,
                    entry,
                }),
                Err(e) => {
                    tracing::warn!("Ignoring undecodable change on baby {}: {}", baby_id, e);
                    None
                }
            }
        }
        FeedMessage::Joined { online, .. } => {
            let others: Vec<PresenceInfo> = online
                .into_iter()
                .filter(|p| p.caregiver_id != own_id)
                .collect();
            presence.reset(&others);
            Some(presence_event(presence))
        }
        FeedMessage::Presence {
            caregiver_id,
            status,
            ..
        } if caregiver_id != own_id => {
            // Local receive time, so other clocks cannot keep someone online.
            let changed = match status {
                PresenceStatus::Online => presence.heartbeat(&caregiver_id, timefmt::now()),
                PresenceStatus::Offline => presence.leave(&caregiver_id),
            };
            changed.then(|| presence_event(presence))
        }
        FeedMessage::Leave { caregiver_id } if caregiver_id != own_id => presence
            .leave(&caregiver_id)
            .then(|| presence_event(presence)),
        FeedMessage::Error { message } => {
            tracing::warn!("Change feed error on baby {}: {}", baby_id, message);
            None
        }
        FeedMessage::Presence { .. } | FeedMessage::Leave { .. } | FeedMessage::Join { .. } => {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::transport::LoopbackTransport;
    use crate::models::{DiaperPayload, DiaperType, EntryPayload, NewEntry};
    use crate::remote::EntryRow;

    fn settings() -> FeedSettings {
        FeedSettings {
            heartbeat: Duration::from_secs(3600),
            presence_timeout: Duration::from_secs(90),
            channel_capacity: 8,
        }
    }

    fn diaper_row(baby_id: Uuid) -> EntryRow {
        let entry = Entry::from_new(
            NewEntry::new(baby_id, EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet))),
            Uuid::new_v4(),
            timefmt::now(),
            Some("other".into()),
        );
        EntryRow::from(&entry)
    }

    async fn next_change(sub: &mut Subscription) -> FeedEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("timed out waiting for event")
                .expect("feed closed");
            if matches!(event, FeedEvent::Change { .. }) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let transport = LoopbackTransport::new();
        let feed = ChangeFeed::with_settings(transport.clone(), settings());
        let baby_id = Uuid::new_v4();
        let who = Caregiver::new("me", "key");

        feed.subscribe(baby_id, &who).await.unwrap();
        feed.subscribe(baby_id, &who).await.unwrap();
        assert!(feed.is_subscribed(baby_id).await);

        let mut sub = feed.listen(baby_id);
        transport.publish(
            baby_id,
            FeedMessage::Change {
                kind: ChangeKind::Inserted,
                entry: diaper_row(baby_id),
            },
        );

        assert!(matches!(
            next_change(&mut sub).await,
            FeedEvent::Change { kind: ChangeKind::Inserted, .. }
        ));
        // One connection, so one copy of the event.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!matches!(sub.try_recv(), Some(FeedEvent::Change { .. })));
    }

    #[tokio::test]
    async fn test_unsubscribe_sends_offline_beacon() {
        let transport = LoopbackTransport::new();
        let baby_id = Uuid::new_v4();
        let mine = ChangeFeed::with_settings(transport.clone(), settings());
        let theirs = ChangeFeed::with_settings(transport.clone(), settings());

        theirs
            .subscribe(baby_id, &Caregiver::new("them", "key"))
            .await
            .unwrap();
        let mut watching = theirs.listen(baby_id);

        mine.subscribe(baby_id, &Caregiver::new("me", "key"))
            .await
            .unwrap();

        // First heartbeat fires immediately on subscribe.
        let online = loop {
            match tokio::time::timeout(Duration::from_secs(5), watching.recv()).await {
                Ok(Some(FeedEvent::Presence { online, .. })) if !online.is_empty() => break online,
                Ok(Some(_)) => continue,
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(online[0].caregiver_id, "me");

        mine.unsubscribe(baby_id).await;
        mine.unsubscribe(baby_id).await;
        assert!(!mine.is_subscribed(baby_id).await);

        let online = loop {
            match tokio::time::timeout(Duration::from_secs(5), watching.recv()).await {
                Ok(Some(FeedEvent::Presence { online, .. })) => break online,
                Ok(Some(_)) => continue,
                other => panic!("unexpected {:?}", other),
            }
        };
        assert!(online.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_subscription_detaches_listener() {
        let feed = ChangeFeed::with_settings(LoopbackTransport::new(), settings());
        let baby_id = Uuid::new_v4();

        let a = feed.listen(baby_id);
        let b = feed.listen(baby_id);
        assert_eq!(feed.listener_count(baby_id), 2);

        drop(a);
        b.cancel();
        assert_eq!(feed.listener_count(baby_id), 0);
    }

    #[tokio::test]
    async fn test_full_listener_drops_events() {
        let transport = LoopbackTransport::new();
        let feed = ChangeFeed::with_settings(
            transport.clone(),
            FeedSettings {
                channel_capacity: 1,
                ..settings()
            },
        );
        let baby_id = Uuid::new_v4();
        feed.subscribe(baby_id, &Caregiver::new("me", "key"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut sub = feed.listen(baby_id);
        for _ in 0..3 {
            transport.publish(
                baby_id,
                FeedMessage::Change {
                    kind: ChangeKind::Updated,
                    entry: diaper_row(baby_id),
                },
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
        assert_eq!(feed.listener_count(baby_id), 1);
    }

    #[test]
    fn test_handle_message_ignores_own_presence() {
        let baby_id = Uuid::new_v4();
        let mut presence = PresenceTracker::new(Duration::from_secs(90));
        let own = FeedMessage::presence("me", PresenceStatus::Online);
        assert!(handle_message(baby_id, "me", own, &mut presence).is_none());

        let other = FeedMessage::presence("them", PresenceStatus::Online);
        assert!(matches!(
            handle_message(baby_id, "me", other, &mut presence),
            Some(FeedEvent::Presence { .. })
        ));
        // Repeated heartbeat changes nothing.
        let again = FeedMessage::presence("them", PresenceStatus::Online);
        assert!(handle_message(baby_id, "me", again, &mut presence).is_none());
    }

    #[test]
    fn test_handle_message_rejects_foreign_baby() {
        let mut presence = PresenceTracker::new(Duration::from_secs(90));
        let msg = FeedMessage::Change {
            kind: ChangeKind::Deleted,
            entry: diaper_row(Uuid::new_v4()),
        };
        assert!(handle_message(Uuid::new_v4(), "me", msg, &mut presence).is_none());
    }
}
