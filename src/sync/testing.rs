//! In-memory remote store for tests, with switchable reachability.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use babytrack_core::timefmt::MonotonicClock;
use babytrack_core::{
    entries_to_csv, Baby, BabyUpdate, Caregiver, DateRange, Entry, EntryQuery, EntryUpdate,
    NewBaby, NewEntry, RemoteError, RemoteStore,
};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    babies: HashMap<Uuid, (Baby, bool)>,
    entries: HashMap<Uuid, (Entry, bool)>,
    caregivers: HashSet<(String, Uuid)>,
    failing: HashSet<Uuid>,
}

#[derive(Clone, Default)]
pub struct MemoryRemote {
    tables: Arc<Mutex<Tables>>,
    unreachable: Arc<AtomicBool>,
    hanging: Arc<AtomicBool>,
    clock: Arc<MonotonicClock>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Makes every call wait forever.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Upserts of this id answer with a server error.
    pub fn fail_record(&self, id: Uuid) {
        self.lock().failing.insert(id);
    }

    pub fn has_baby(&self, id: Uuid) -> bool {
        self.lock().babies.get(&id).map_or(false, |(_, deleted)| !deleted)
    }

    pub fn has_entry(&self, id: Uuid) -> bool {
        self.lock().entries.get(&id).map_or(false, |(_, deleted)| !deleted)
    }

    pub fn baby(&self, id: Uuid) -> Option<Baby> {
        self.lock().babies.get(&id).map(|(b, _)| b.clone())
    }

    pub fn entry(&self, id: Uuid) -> Option<Entry> {
        self.lock().entries.get(&id).map(|(e, _)| e.clone())
    }

    /// Stores a row directly, as another caregiver would.
    pub fn insert_entry(&self, entry: Entry) {
        self.lock().entries.insert(entry.id, (entry, false));
    }

    /// Removes every caregiver relationship to the baby.
    pub fn revoke_access(&self, baby_id: Uuid) {
        self.lock().caregivers.retain(|(_, id)| *id != baby_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn gate(&self) -> Result<(), RemoteError> {
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::NetworkUnavailable("connection refused".into()));
        }
        Ok(())
    }

    fn check_access(tables: &Tables, who: &Caregiver, baby_id: Uuid) -> Result<(), RemoteError> {
        match tables.babies.get(&baby_id) {
            None | Some((_, true)) => Err(RemoteError::NotFound(format!("baby {}", baby_id))),
            Some(_) if !tables.caregivers.contains(&(who.id.clone(), baby_id)) => {
                Err(RemoteError::PolicyRejected {
                    status: 403,
                    message: "no caregiver relationship".into(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    fn live_entry(tables: &Tables, who: &Caregiver, id: Uuid) -> Result<Entry, RemoteError> {
        let entry = match tables.entries.get(&id) {
            Some((entry, false)) => entry.clone(),
            _ => return Err(RemoteError::NotFound(format!("entry {}", id))),
        };
        Self::check_access(tables, who, entry.baby_id)?;
        Ok(entry)
    }
}

impl RemoteStore for MemoryRemote {
    async fn list_babies(&self, who: &Caregiver) -> Result<Vec<Baby>, RemoteError> {
        self.gate().await?;
        let tables = self.lock();
        let mut babies: Vec<Baby> = tables
            .babies
            .values()
            .filter(|(b, deleted)| {
                !deleted && tables.caregivers.contains(&(who.id.clone(), b.id))
            })
            .map(|(b, _)| b.clone())
            .collect();
        babies.sort_by_key(|b| b.created_at);
        Ok(babies)
    }

    async fn get_baby(&self, who: &Caregiver, id: Uuid) -> Result<Baby, RemoteError> {
        self.gate().await?;
        let tables = self.lock();
        Self::check_access(&tables, who, id)?;
        Ok(tables.babies[&id].0.clone())
    }

    async fn create_baby(&self, who: &Caregiver, new: &NewBaby) -> Result<Baby, RemoteError> {
        self.gate().await?;
        let baby = Baby::from_new(new.clone(), Uuid::new_v4(), self.clock.now());
        let mut tables = self.lock();
        tables.babies.insert(baby.id, (baby.clone(), false));
        tables.caregivers.insert((who.id.clone(), baby.id));
        Ok(baby)
    }

    async fn update_baby(
        &self,
        who: &Caregiver,
        id: Uuid,
        update: &BabyUpdate,
    ) -> Result<Baby, RemoteError> {
        self.gate().await?;
        let now = self.clock.now();
        let mut tables = self.lock();
        Self::check_access(&tables, who, id)?;
        let (baby, _) = tables
            .babies
            .get_mut(&id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        baby.apply(update, now);
        Ok(baby.clone())
    }

    async fn delete_baby(&self, who: &Caregiver, id: Uuid) -> Result<(), RemoteError> {
        self.gate().await?;
        let mut tables = self.lock();
        Self::check_access(&tables, who, id)?;
        if let Some(row) = tables.babies.get_mut(&id) {
            row.1 = true;
        }
        for (entry, deleted) in tables.entries.values_mut() {
            if entry.baby_id == id {
                *deleted = true;
            }
        }
        Ok(())
    }

    async fn upsert_baby(&self, who: &Caregiver, baby: &Baby) -> Result<Baby, RemoteError> {
        self.gate().await?;
        let mut tables = self.lock();
        if tables.failing.contains(&baby.id) {
            return Err(RemoteError::Server {
                status: 500,
                message: "boom".into(),
            });
        }
        if !tables.babies.contains_key(&baby.id) {
            tables.babies.insert(baby.id, (baby.clone(), false));
            tables.caregivers.insert((who.id.clone(), baby.id));
            return Ok(baby.clone());
        }
        Self::check_access(&tables, who, baby.id)?;
        let stored = &mut tables
            .babies
            .get_mut(&baby.id)
            .ok_or_else(|| RemoteError::NotFound(baby.id.to_string()))?
            .0;
        if baby.updated_at >= stored.updated_at {
            *stored = baby.clone();
        }
        Ok(stored.clone())
    }

    async fn list_entries(
        &self,
        who: &Caregiver,
        baby_id: Uuid,
        query: &EntryQuery,
    ) -> Result<Vec<Entry>, RemoteError> {
        self.gate().await?;
        let tables = self.lock();
        Self::check_access(&tables, who, baby_id)?;
        let mut entries: Vec<Entry> = tables
            .entries
            .values()
            .filter(|(e, deleted)| !deleted && e.baby_id == baby_id && query.matches(e))
            .map(|(e, _)| e.clone())
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(query.effective_limit() as usize);
        Ok(entries)
    }

    async fn get_entry(&self, who: &Caregiver, id: Uuid) -> Result<Entry, RemoteError> {
        self.gate().await?;
        let tables = self.lock();
        Self::live_entry(&tables, who, id)
    }

    async fn create_entry(&self, who: &Caregiver, new: &NewEntry) -> Result<Entry, RemoteError> {
        self.gate().await?;
        let now = self.clock.now();
        let mut tables = self.lock();
        Self::check_access(&tables, who, new.baby_id)?;
        let entry = Entry::from_new(new.clone(), Uuid::new_v4(), now, Some(who.id.clone()));
        tables.entries.insert(entry.id, (entry.clone(), false));
        Ok(entry)
    }

    async fn update_entry(
        &self,
        who: &Caregiver,
        id: Uuid,
        update: &EntryUpdate,
    ) -> Result<Entry, RemoteError> {
        self.gate().await?;
        let now = self.clock.now();
        let mut tables = self.lock();
        let mut entry = Self::live_entry(&tables, who, id)?;
        entry
            .apply(update, now)
            .map_err(|e| RemoteError::from_status(400, e.to_string()))?;
        tables.entries.insert(id, (entry.clone(), false));
        Ok(entry)
    }

    async fn delete_entry(&self, who: &Caregiver, id: Uuid) -> Result<(), RemoteError> {
        self.gate().await?;
        let mut tables = self.lock();
        Self::live_entry(&tables, who, id)?;
        if let Some(row) = tables.entries.get_mut(&id) {
            row.1 = true;
        }
        Ok(())
    }

    async fn upsert_entry(&self, who: &Caregiver, entry: &Entry) -> Result<Entry, RemoteError> {
        self.gate().await?;
        let mut tables = self.lock();
        if tables.failing.contains(&entry.id) {
            return Err(RemoteError::Server {
                status: 500,
                message: "boom".into(),
            });
        }
        Self::check_access(&tables, who, entry.baby_id)?;
        match tables.entries.get(&entry.id).cloned() {
            Some((_, true)) => Err(RemoteError::NotFound(format!("entry {}", entry.id))),
            Some((stored, false)) if stored.updated_at > entry.updated_at => Ok(stored),
            _ => {
                tables.entries.insert(entry.id, (entry.clone(), false));
                Ok(entry.clone())
            }
        }
    }

    async fn export_csv(
        &self,
        who: &Caregiver,
        baby_id: Uuid,
        range: &DateRange,
    ) -> Result<String, RemoteError> {
        self.gate().await?;
        let tables = self.lock();
        Self::check_access(&tables, who, baby_id)?;
        let entries: Vec<&Entry> = tables
            .entries
            .values()
            .filter(|(e, deleted)| !deleted && e.baby_id == baby_id)
            .map(|(e, _)| e)
            .collect();
        entries_to_csv(entries, range).map_err(|e| RemoteError::Server {
            status: 500,
            message: e.to_string(),
        })
    }
}

pub fn caregiver() -> Caregiver {
    Caregiver::new("cg-1", "test-key")
}
