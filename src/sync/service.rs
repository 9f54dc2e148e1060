//! Data Synchronization Service.
//!
//! Every read and write goes through [`DataService`]. With a signed-in
//! caregiver and a reachable backend the call goes to the remote store first
//! and the canonical result is written through to the local store. Transient
//! remote failures (network, 5xx) fall back to the local store and leave the
//! produced row unsynced. Policy rejections and other failures surface
//! unchanged.

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use babytrack_core::timefmt::MonotonicClock;
use babytrack_core::{
    entries_to_csv, Baby, BabyUpdate, Caregiver, DateRange, Entry, EntryPayload, EntryQuery,
    EntryType, EntryUpdate, ModelError, NewBaby, NewEntry, RemoteError, RemoteStore,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connectivity::Connectivity;
use super::report::{SyncFailure, SyncReport};
use super::SyncError;
use crate::db::{EntryFilter, LocalStore, LocalStoreError, RecordKind};

/// Default time a single record may take during a sync pass.
pub const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_secs(15);

pub struct DataService<R: RemoteStore> {
    local: LocalStore,
    remote: R,
    identity: RwLock<Option<Caregiver>>,
    connectivity: Connectivity,
    clock: MonotonicClock,
    record_timeout: Duration,
    pass_lock: tokio::sync::Mutex<()>,
}

impl<R: RemoteStore> DataService<R> {
    pub fn new(local: LocalStore, remote: R, connectivity: Connectivity) -> Self {
        Self {
            local,
            remote,
            identity: RwLock::new(None),
            connectivity,
            clock: MonotonicClock::new(),
            record_timeout: DEFAULT_RECORD_TIMEOUT,
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_identity(self, who: Option<Caregiver>) -> Self {
        self.set_identity(who);
        self
    }

    pub fn with_record_timeout(mut self, timeout: Duration) -> Self {
        self.record_timeout = timeout;
        self
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn identity(&self) -> Option<Caregiver> {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Signs a caregiver in or out. Without one, every call stays local.
    pub fn set_identity(&self, who: Option<Caregiver>) {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = who;
    }

    /// The caregiver to call the backend as, when the backend is usable.
    fn remote_target(&self) -> Option<Caregiver> {
        if self.connectivity.is_online() {
            self.identity()
        } else {
            None
        }
    }

    /// Decides whether a remote failure may be served locally instead.
    fn falls_back(&self, err: &RemoteError, op: &str) -> bool {
        if !err.is_transient() {
            return false;
        }
        warn!("{} failed remotely, using local store: {}", op, err);
        if matches!(err, RemoteError::NetworkUnavailable(_)) {
            self.connectivity.set_online(false);
        }
        true
    }

    // ========== Babies ==========

    pub async fn create_baby(&self, new: NewBaby) -> Result<Baby, SyncError> {
        if let Some(who) = self.remote_target() {
            match self.remote.create_baby(&who, &new).await {
                Ok(baby) => {
                    self.local.put_baby(&baby, true).await?;
                    return Ok(baby);
                }
                Err(e) if self.falls_back(&e, "create baby") => {}
                Err(e) => return Err(e.into()),
            }
        }

        let baby = Baby::from_new(new, Uuid::new_v4(), self.clock.now());
        self.local.put_baby(&baby, false).await?;
        debug!("Created baby {} locally", baby.id);
        Ok(baby)
    }

    pub async fn get_babies(&self) -> Result<Vec<Baby>, SyncError> {
        if let Some(who) = self.remote_target() {
            match self.remote.list_babies(&who).await {
                Ok(babies) => {
                    self.local.reconcile_babies(&babies).await?;
                    return Ok(self.local.list_babies().await?);
                }
                Err(e) if self.falls_back(&e, "list babies") => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.local.list_babies().await?)
    }

    pub async fn get_baby(&self, id: Uuid) -> Result<Baby, SyncError> {
        if let Some(who) = self.remote_target() {
            match self.remote.get_baby(&who, id).await {
                Ok(baby) => {
                    self.local.mirror_babies(std::slice::from_ref(&baby)).await?;
                    return self.require_local_baby(id).await;
                }
                Err(RemoteError::NotFound(msg)) => {
                    return self.local_only_baby(id).await?.ok_or(SyncError::NotFound(msg));
                }
                Err(e) if self.falls_back(&e, "get baby") => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.require_local_baby(id).await
    }

    pub async fn update_baby(&self, id: Uuid, update: BabyUpdate) -> Result<Baby, SyncError> {
        if let Some(who) = self.remote_target() {
            match self.remote.update_baby(&who, id, &update).await {
                Ok(baby) => {
                    self.local.put_baby(&baby, true).await?;
                    return Ok(baby);
                }
                Err(RemoteError::NotFound(msg)) => {
                    // Created offline and not pushed yet: push the edited row.
                    let Some(mut baby) = self.local_only_baby(id).await? else {
                        return Err(SyncError::NotFound(msg));
                    };
                    baby.apply(&update, self.clock.now());
                    let canonical = self.remote.upsert_baby(&who, &baby).await?;
                    self.local.put_baby(&canonical, true).await?;
                    return Ok(canonical);
                }
                Err(e) if self.falls_back(&e, "update baby") => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut baby = self.require_local_baby(id).await?;
        baby.apply(&update, self.clock.now());
        self.local.put_baby(&baby, false).await?;
        Ok(baby)
    }

    /// Deletes the baby and its entries. Deleting a missing baby succeeds.
    pub async fn delete_baby(&self, id: Uuid) -> Result<(), SyncError> {
        if let Some(who) = self.remote_target() {
            match self.remote.delete_baby(&who, id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {
                    self.local.delete_baby(id).await?;
                    return Ok(());
                }
                Err(e) if self.falls_back(&e, "delete baby") => {}
                Err(e) => return Err(e.into()),
            }
        }

        if self.local.delete_baby(id).await? == Some(true) {
            self.local.queue_deletion(RecordKind::Baby, id).await?;
        }
        Ok(())
    }

    async fn require_local_baby(&self, id: Uuid) -> Result<Baby, SyncError> {
        self.local
            .get_baby(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("baby {}", id)))
    }

    async fn local_only_baby(&self, id: Uuid) -> Result<Option<Baby>, SyncError> {
        if self.local.is_synced(RecordKind::Baby, id).await? == Some(false) {
            Ok(self.local.get_baby(id).await?)
        } else {
            // The backend no longer has it; drop the stale mirror.
            self.local.delete_baby(id).await?;
            Ok(None)
        }
    }

    // ========== Entries ==========

    pub async fn create_entry(&self, new: NewEntry) -> Result<Entry, SyncError> {
        if new.payload.as_sleep().map_or(false, |s| s.in_progress()) {
            if let Some(active) = self.local.active_sleep(new.baby_id).await? {
                warn!(
                    "Baby {} already has a sleep in progress ({}); logging another",
                    new.baby_id, active.id
                );
            }
        }

        if let Some(who) = self.remote_target() {
            match self.remote.create_entry(&who, &new).await {
                Ok(entry) => {
                    self.local.put_entry(&entry, true).await?;
                    return Ok(entry);
                }
                Err(e) if self.falls_back(&e, "create entry") => {}
                Err(e) => return Err(e.into()),
            }
        }

        if self.local.get_baby(new.baby_id).await?.is_none() {
            return Err(SyncError::NotFound(format!("baby {}", new.baby_id)));
        }
        let created_by = self.identity().map(|who| who.id);
        let entry = Entry::from_new(new, Uuid::new_v4(), self.clock.now(), created_by);
        self.local.put_entry(&entry, false).await?;
        debug!("Created entry {} locally", entry.id);
        Ok(entry)
    }

    /// Entries of a baby, newest first by event time.
    pub async fn get_entries(
        &self,
        baby_id: Uuid,
        query: &EntryQuery,
    ) -> Result<Vec<Entry>, SyncError> {
        let filter = local_filter(baby_id, query);

        if let Some(who) = self.remote_target() {
            match self.remote.list_entries(&who, baby_id, query).await {
                Ok(entries) => {
                    let complete = entries.len() < query.effective_limit() as usize;
                    self.local
                        .reconcile_entries(&filter, &entries, complete)
                        .await?;
                    return self.merge_unsynced(entries, &filter, query).await;
                }
                Err(e) if self.falls_back(&e, "list entries") => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.local.query_entries(&filter).await?)
    }

    /// Overlays rows that only exist locally onto a remote listing and hides
    /// rows whose deletion is still queued.
    async fn merge_unsynced(
        &self,
        mut entries: Vec<Entry>,
        filter: &EntryFilter,
        query: &EntryQuery,
    ) -> Result<Vec<Entry>, SyncError> {
        let pending = self.local.pending_deletion_ids().await?;
        entries.retain(|e| !pending.contains(&e.id));

        let mut unsynced = filter.clone().only_unsynced();
        unsynced.limit = None;
        for local in self.local.query_entries(&unsynced).await? {
            match entries.iter_mut().find(|e| e.id == local.id) {
                Some(slot) => *slot = local,
                None => entries.push(local),
            }
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        entries.truncate(query.effective_limit() as usize);
        Ok(entries)
    }

    pub async fn get_entry(&self, id: Uuid) -> Result<Entry, SyncError> {
        if let Some(who) = self.remote_target() {
            match self.remote.get_entry(&who, id).await {
                Ok(entry) => {
                    self.local.mirror_entries(std::slice::from_ref(&entry)).await?;
                    return self.require_local_entry(id).await;
                }
                Err(RemoteError::NotFound(msg)) => {
                    return self.local_only_entry(id).await?.ok_or(SyncError::NotFound(msg));
                }
                Err(e) if self.falls_back(&e, "get entry") => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.require_local_entry(id).await
    }

    /// Updates an entry. A payload of another type is rejected on every
    /// route before anything is written.
    pub async fn update_entry(&self, id: Uuid, update: EntryUpdate) -> Result<Entry, SyncError> {
        if update.payload.is_some() {
            self.get_entry(id).await?.check_update(&update)?;
        }

        if let Some(who) = self.remote_target() {
            match self.remote.update_entry(&who, id, &update).await {
                Ok(entry) => {
                    self.local.put_entry(&entry, true).await?;
                    return Ok(entry);
                }
                Err(RemoteError::NotFound(msg)) => {
                    let Some(mut entry) = self.local_only_entry(id).await? else {
                        return Err(SyncError::NotFound(msg));
                    };
                    entry.apply(&update, self.clock.now())?;
                    let canonical = self.remote.upsert_entry(&who, &entry).await?;
                    self.local.put_entry(&canonical, true).await?;
                    return Ok(canonical);
                }
                Err(e) if self.falls_back(&e, "update entry") => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut entry = self.require_local_entry(id).await?;
        entry.apply(&update, self.clock.now())?;
        self.local.put_entry(&entry, false).await?;
        Ok(entry)
    }

    /// Deletes the entry. Deleting a missing entry succeeds.
    pub async fn delete_entry(&self, id: Uuid) -> Result<(), SyncError> {
        if let Some(who) = self.remote_target() {
            match self.remote.delete_entry(&who, id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {
                    self.local.delete_entry(id).await?;
                    return Ok(());
                }
                Err(e) if self.falls_back(&e, "delete entry") => {}
                Err(e) => return Err(e.into()),
            }
        }

        if self.local.delete_entry(id).await? == Some(true) {
            self.local.queue_deletion(RecordKind::Entry, id).await?;
        }
        Ok(())
    }

    /// Ends an in-progress sleep at `end`.
    pub async fn end_sleep(&self, id: Uuid, end: DateTime<Utc>) -> Result<Entry, SyncError> {
        let entry = self.get_entry(id).await?;
        let Some(sleep) = entry.payload.as_sleep() else {
            return Err(SyncError::Model(ModelError::InvalidPayload {
                entry_type: entry.entry_type(),
                message: "not a sleep entry".to_string(),
            }));
        };
        let finished = sleep.clone().finish(end)?;
        self.update_entry(id, EntryUpdate::payload(EntryPayload::Sleep(finished)))
            .await
    }

    /// The baby's most recent sleep without an end time.
    pub async fn active_sleep(&self, baby_id: Uuid) -> Result<Option<Entry>, SyncError> {
        let sleeps = self
            .get_entries(baby_id, &EntryQuery::default().with_type(EntryType::Sleep))
            .await?;
        Ok(sleeps.into_iter().find(Entry::is_active_sleep))
    }

    async fn require_local_entry(&self, id: Uuid) -> Result<Entry, SyncError> {
        self.local
            .get_entry(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("entry {}", id)))
    }

    async fn local_only_entry(&self, id: Uuid) -> Result<Option<Entry>, SyncError> {
        if self.local.is_synced(RecordKind::Entry, id).await? == Some(false) {
            Ok(self.local.get_entry(id).await?)
        } else {
            self.local.delete_entry(id).await?;
            Ok(None)
        }
    }

    // ========== Export ==========

    /// CSV of the baby's entries created within `range`.
    pub async fn export_csv(&self, baby_id: Uuid, range: &DateRange) -> Result<String, SyncError> {
        if let Some(who) = self.remote_target() {
            match self.remote.export_csv(&who, baby_id, range).await {
                Ok(csv) => return Ok(csv),
                Err(e) if self.falls_back(&e, "export") => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.require_local_baby(baby_id).await?;
        let entries = self
            .local
            .query_entries(&EntryFilter::for_baby(baby_id))
            .await?;
        Ok(entries_to_csv(&entries, range)?)
    }

    // ========== Sync pass ==========

    /// Pushes every local baby and entry to the backend, then the queued
    /// deletions. One record failing or timing out does not stop the rest.
    /// Passes never overlap; a second caller waits for the first.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let _pass = self.pass_lock.lock().await;

        let Some(who) = self.remote_target() else {
            debug!("Sync pass skipped: offline or signed out");
            return Ok(SyncReport::skipped());
        };

        let mut report = SyncReport::default();
        let pending = self.local.pending_deletion_ids().await?;

        for baby in self.local.list_babies().await? {
            if pending.contains(&baby.id) {
                continue;
            }
            match self.bounded(self.remote.upsert_baby(&who, &baby)).await {
                Ok(canonical) => match self.local.put_baby(&canonical, true).await {
                    Ok(()) => report.babies_pushed += 1,
                    Err(e) => report.fail(SyncFailure::new(RecordKind::Baby, baby.id, e)),
                },
                Err(RemoteError::NotFound(_)) => match self.local.delete_baby(baby.id).await {
                    Ok(_) => report.removed_locally += 1,
                    Err(e) => report.fail(SyncFailure::new(RecordKind::Baby, baby.id, e)),
                },
                Err(e) => report.fail(SyncFailure::new(RecordKind::Baby, baby.id, e)),
            }
        }

        for entry in self.local.query_entries(&EntryFilter::default()).await? {
            if pending.contains(&entry.id) || pending.contains(&entry.baby_id) {
                continue;
            }
            match self.bounded(self.remote.upsert_entry(&who, &entry)).await {
                Ok(canonical) => match self.local.put_entry(&canonical, true).await {
                    Ok(()) => report.entries_pushed += 1,
                    Err(e) => report.fail(SyncFailure::new(RecordKind::Entry, entry.id, e)),
                },
                Err(RemoteError::NotFound(_)) => match self.local.delete_entry(entry.id).await {
                    Ok(_) => report.removed_locally += 1,
                    Err(e) => report.fail(SyncFailure::new(RecordKind::Entry, entry.id, e)),
                },
                Err(e) => report.fail(SyncFailure::new(RecordKind::Entry, entry.id, e)),
            }
        }

        for pending in self.local.pending_deletions().await? {
            let result = match pending.kind {
                RecordKind::Baby => self.bounded(self.remote.delete_baby(&who, pending.id)).await,
                RecordKind::Entry => {
                    self.bounded(self.remote.delete_entry(&who, pending.id))
                        .await
                }
            };
            if let Err(e) = result {
                if !matches!(e, RemoteError::NotFound(_)) {
                    report.fail(SyncFailure::new(pending.kind, pending.id, e));
                    continue;
                }
            }
            match self.finish_deletion(pending.kind, pending.id).await {
                Ok(()) => report.deletions_pushed += 1,
                Err(e) => report.fail(SyncFailure::new(pending.kind, pending.id, e)),
            }
        }

        // Pick up babies shared by other caregivers.
        match self.bounded(self.remote.list_babies(&who)).await {
            Ok(babies) => self.local.reconcile_babies(&babies).await?,
            Err(e) => warn!("Could not refresh babies after sync: {}", e),
        }

        if report.failures.is_empty() {
            info!("Sync pass complete: {}", report);
        } else {
            warn!("Sync pass finished with failures: {}", report);
        }
        Ok(report)
    }

    /// Drops any local copy of a record the backend has deleted, then the
    /// queued deletion itself.
    async fn finish_deletion(&self, kind: RecordKind, id: Uuid) -> Result<(), LocalStoreError> {
        match kind {
            RecordKind::Baby => self.local.delete_baby(id).await?,
            RecordKind::Entry => self.local.delete_entry(id).await?,
        };
        self.local.clear_deletion(id).await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.record_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::NetworkUnavailable(format!(
                "timed out after {}s",
                self.record_timeout.as_secs_f32()
            ))),
        }
    }
}

fn local_filter(baby_id: Uuid, query: &EntryQuery) -> EntryFilter {
    let mut filter = EntryFilter::for_baby(baby_id)
        .between(query.from, query.to)
        .newest_first()
        .with_limit(query.effective_limit());
    filter.entry_type = query.entry_type;
    filter
}
