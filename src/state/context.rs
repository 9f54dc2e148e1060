use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use babytrack_core::feed::{FeedTransport, PresenceInfo};
use babytrack_core::stats::{self, DailyStats, FeedingGapAlert};
use babytrack_core::{
    timefmt, Baby, ChangeFeed, Entry, EntryPayload, EntryQuery, EntryType, EntryUpdate,
    FeedEvent, NewBaby, NewEntry, RemoteStore, Subscription,
};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entries::{EntriesSlice, Mutation};
use super::StateError;
use crate::sync::{DataService, SyncError};

#[derive(Debug, Default)]
struct ViewState {
    initialized: bool,
    babies: Vec<Baby>,
    active: Option<Uuid>,
    entries: EntriesSlice,
    online: Vec<PresenceInfo>,
}

/// Application state shared by the views of one signed-in session.
///
/// Entry actions are optimistic: the slice changes first, the service call
/// follows, and a failed call restores what the mutation replaced before the
/// error is returned.
pub struct AppContext<R: RemoteStore, T: FeedTransport> {
    service: Arc<DataService<R>>,
    feed: ChangeFeed<T>,
    state: Mutex<ViewState>,
    events: Mutex<Option<Subscription>>,
}

impl<R: RemoteStore, T: FeedTransport> AppContext<R, T> {
    pub fn new(service: Arc<DataService<R>>, feed: ChangeFeed<T>) -> Self {
        Self {
            service,
            feed,
            state: Mutex::new(ViewState::default()),
            events: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<DataService<R>> {
        &self.service
    }

    pub fn feed(&self) -> &ChangeFeed<T> {
        &self.feed
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn events(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads the baby list and restores the baby selected in a previous run.
    pub async fn initialize(&self) -> Result<(), StateError> {
        let babies = self.service.get_babies().await?;
        let restored = self.service.local().active_baby().await?;
        {
            let mut state = self.state();
            state.babies = babies;
            state.initialized = true;
        }

        match restored {
            Some(id) if self.find_baby(id).is_some() => {
                self.select_baby(id).await?;
            }
            Some(id) => {
                debug!("Active baby {} is no longer available", id);
                self.service.local().set_active_baby(None).await?;
            }
            None => {}
        }
        info!("State initialized with {} babies", self.babies().len());
        Ok(())
    }

    /// Closes every change feed channel and forgets the in-memory state. The
    /// persisted active baby is kept for the next `initialize`.
    pub async fn teardown(&self) {
        *self.events() = None;
        self.feed.unsubscribe_all().await;
        *self.state() = ViewState::default();
        debug!("State torn down");
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn babies(&self) -> Vec<Baby> {
        self.state().babies.clone()
    }

    pub fn active_baby(&self) -> Option<Baby> {
        let state = self.state();
        let id = state.active?;
        state.babies.iter().find(|b| b.id == id).cloned()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.state().entries.entries().to_vec()
    }

    /// Other caregivers currently online on the active baby's feed.
    pub fn online_caregivers(&self) -> Vec<PresenceInfo> {
        self.state().online.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.state().entries.is_stale()
    }

    fn find_baby(&self, id: Uuid) -> Option<Baby> {
        self.state().babies.iter().find(|b| b.id == id).cloned()
    }

    fn active_id(&self) -> Result<Uuid, StateError> {
        self.state().active.ok_or(StateError::NoActiveBaby)
    }

    // ========== Babies ==========

    pub async fn refresh_babies(&self) -> Result<Vec<Baby>, StateError> {
        let babies = self.service.get_babies().await?;
        self.state().babies = babies.clone();
        Ok(babies)
    }

    pub async fn add_baby(&self, new: NewBaby) -> Result<Baby, StateError> {
        let baby = self.service.create_baby(new).await?;
        self.state().babies.push(baby.clone());
        Ok(baby)
    }

    /// Makes the baby active: loads its entries, persists the choice and
    /// moves the change feed over from the previous baby.
    pub async fn select_baby(&self, id: Uuid) -> Result<Baby, StateError> {
        let baby = match self.find_baby(id) {
            Some(baby) => baby,
            None => {
                let baby = self.service.get_baby(id).await.map_err(|e| match e {
                    SyncError::NotFound(_) => StateError::UnknownBaby(id),
                    e => e.into(),
                })?;
                self.state().babies.push(baby.clone());
                baby
            }
        };

        let previous = self.state().active;
        if let Some(previous) = previous.filter(|p| *p != id) {
            *self.events() = None;
            self.feed.unsubscribe(previous).await;
        }

        let entries = self.service.get_entries(id, &EntryQuery::default()).await?;
        self.service.local().set_active_baby(Some(id)).await?;
        {
            let mut state = self.state();
            state.active = Some(id);
            state.entries.load(id, entries);
            state.online.clear();
        }

        self.attach(id).await;
        info!("Selected baby {} ({})", baby.name, baby.id);
        Ok(baby)
    }

    async fn attach(&self, baby_id: Uuid) {
        *self.events() = Some(self.feed.listen(baby_id));

        let Some(who) = self.service.identity() else {
            return;
        };
        if !self.service.connectivity().is_online() {
            debug!("Offline, not opening change feed for baby {}", baby_id);
            return;
        }
        if let Err(e) = self.feed.subscribe(baby_id, &who).await {
            warn!("Live updates unavailable for baby {}: {}", baby_id, e);
        }
    }

    /// Reopens the active baby's change feed after a disconnect and catches
    /// up on changes missed meanwhile. Returns false when there is nothing to
    /// resubscribe to.
    pub async fn resubscribe(&self) -> Result<bool, StateError> {
        let Some(id) = self.state().active else {
            return Ok(false);
        };
        let Some(who) = self.service.identity() else {
            return Ok(false);
        };
        self.feed.subscribe(id, &who).await?;
        self.refresh_entries().await?;
        Ok(true)
    }

    // ========== Entries ==========

    pub async fn refresh_entries(&self) -> Result<Vec<Entry>, StateError> {
        let id = self.active_id()?;
        let entries = self.service.get_entries(id, &EntryQuery::default()).await?;
        let mut state = self.state();
        if state.active == Some(id) {
            state.entries.load(id, entries.clone());
        }
        Ok(entries)
    }

    pub async fn add_entry(&self, new: NewEntry) -> Result<Entry, StateError> {
        let mutation = (self.state().active == Some(new.baby_id)).then(|| {
            let created_by = self.service.identity().map(|who| who.id);
            Mutation::Upsert(Entry::from_new(
                new.clone(),
                Uuid::new_v4(),
                timefmt::now(),
                created_by,
            ))
        });

        self.optimistic(mutation, self.service.create_entry(new), |entry| {
            Some(entry.clone())
        })
        .await
    }

    pub async fn update_entry(&self, id: Uuid, update: EntryUpdate) -> Result<Entry, StateError> {
        let mutation = self
            .state()
            .entries
            .get(id)
            .and_then(|entry| optimistic_update(entry, &update));

        self.optimistic(mutation, self.service.update_entry(id, update), |entry| {
            Some(entry.clone())
        })
        .await
    }

    pub async fn delete_entry(&self, id: Uuid) -> Result<(), StateError> {
        let mutation = self
            .state()
            .entries
            .get(id)
            .is_some()
            .then_some(Mutation::Remove(id));

        self.optimistic(mutation, self.service.delete_entry(id), |_| None)
            .await
    }

    pub async fn end_sleep(&self, id: Uuid, end: DateTime<Utc>) -> Result<Entry, StateError> {
        let mutation = self.state().entries.get(id).and_then(|entry| {
            let finished = entry.payload.as_sleep()?.clone().finish(end).ok()?;
            optimistic_update(entry, &EntryUpdate::payload(EntryPayload::Sleep(finished)))
        });

        self.optimistic(mutation, self.service.end_sleep(id, end), |entry| {
            Some(entry.clone())
        })
        .await
    }

    async fn optimistic<O>(
        &self,
        mutation: Option<Mutation>,
        operation: impl Future<Output = Result<O, SyncError>>,
        committed: impl FnOnce(&O) -> Option<Entry>,
    ) -> Result<O, StateError> {
        let token = mutation.map(|m| self.state().entries.apply(m));

        match operation.await {
            Ok(output) => {
                if let Some(token) = token {
                    self.state().entries.commit(token, committed(&output));
                }
                Ok(output)
            }
            Err(e) => {
                if let Some(token) = token {
                    debug!("Rolling back entry {}: {}", token.entry_id(), e);
                    self.state().entries.rollback(token);
                }
                Err(e.into())
            }
        }
    }

    // ========== Change feed ==========

    /// Applies a feed event. Changes are only a cue: the slice is marked
    /// stale and re-fetched through the service.
    pub async fn handle_change(&self, event: FeedEvent) -> Result<(), StateError> {
        if self.state().active != Some(event.baby_id()) {
            debug!("Ignoring feed event for inactive baby {}", event.baby_id());
            return Ok(());
        }

        match event {
            FeedEvent::Change { kind, entry, .. } => {
                debug!("Entry {} {} by another caregiver", entry.id, kind);
                self.state().entries.mark_stale();
                self.refresh_entries().await?;
            }
            FeedEvent::Presence { online, .. } => {
                self.state().online = online;
            }
            FeedEvent::Disconnected { baby_id } => {
                warn!("Lost live updates for baby {}", baby_id);
                self.state().online.clear();
            }
        }
        Ok(())
    }

    /// Handles every event already queued. Returns how many there were.
    pub async fn pump_events(&self) -> Result<usize, StateError> {
        let mut handled = 0;
        loop {
            let event = self.events().as_mut().and_then(|s| s.try_recv());
            let Some(event) = event else {
                break;
            };
            self.handle_change(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Waits for the next feed event of the active baby without applying it.
    /// `None` when no baby is selected or the feed is gone.
    pub async fn next_event(&self) -> Option<FeedEvent> {
        let mut subscription = self.events().take()?;
        let event = subscription.recv().await;

        let active = self.state().active;
        let mut slot = self.events();
        if slot.is_none() && active == Some(subscription.baby_id()) {
            *slot = Some(subscription);
        }
        event
    }

    // ========== Derived ==========

    /// Stats over the loaded entries for one calendar day in `tz`.
    pub fn daily_stats<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> DailyStats {
        DailyStats::compute(self.state().entries.entries(), date, tz)
    }

    pub fn today_stats(&self) -> DailyStats {
        self.daily_stats(Local::now().date_naive(), &Local)
    }

    pub fn feeding_alert<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<FeedingGapAlert> {
        let state = self.state();
        let id = state.active?;
        let baby = state.babies.iter().find(|b| b.id == id)?;
        stats::feeding_gap(baby, state.entries.entries(), now)
    }

    pub fn last_entry(&self, entry_type: Option<EntryType>) -> Option<Entry> {
        stats::last_entry(self.state().entries.entries(), entry_type).cloned()
    }

    pub fn entries_of_type(&self, entry_type: EntryType) -> Vec<Entry> {
        stats::entries_by_type(self.state().entries.entries(), entry_type)
            .into_iter()
            .cloned()
            .collect()
    }
}

/// The entry as an optimistic edit would leave it, or `None` when the update
/// cannot apply.
fn optimistic_update(entry: &Entry, update: &EntryUpdate) -> Option<Mutation> {
    let mut entry = entry.clone();
    entry.apply(update, timefmt::now()).ok()?;
    Some(Mutation::Upsert(entry))
}
