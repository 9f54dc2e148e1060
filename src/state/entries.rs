//! Optimistic entry list for the selected baby.
//!
//! Every mutation applied to the slice hands back a [`RollbackToken`] holding
//! what it replaced. Rolling the token back restores exactly that, leaving
//! later unrelated mutations in place.

use babytrack_core::Entry;
use uuid::Uuid;

/// A change to the slice.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Adds or replaces the entry with the same id.
    Upsert(Entry),
    Remove(Uuid),
}

/// Undo record for one applied mutation.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "a token must be committed or rolled back"]
pub struct RollbackToken {
    id: Uuid,
    previous: Option<Entry>,
}

impl RollbackToken {
    /// Id of the entry the mutation touched.
    pub fn entry_id(&self) -> Uuid {
        self.id
    }
}

/// Entries of one baby, newest first by event time.
#[derive(Debug, Clone, Default)]
pub struct EntriesSlice {
    baby_id: Option<Uuid>,
    entries: Vec<Entry>,
    stale: bool,
}

impl EntriesSlice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baby_id(&self) -> Option<Uuid> {
        self.baby_id
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, id: Uuid) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once a change event said the contents may be out of date.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Replaces the contents with a fresh listing.
    pub fn load(&mut self, baby_id: Uuid, mut entries: Vec<Entry>) {
        sort_newest_first(&mut entries);
        self.baby_id = Some(baby_id);
        self.entries = entries;
        self.stale = false;
    }

    pub fn clear(&mut self) {
        self.baby_id = None;
        self.entries.clear();
        self.stale = false;
    }

    pub fn apply(&mut self, mutation: Mutation) -> RollbackToken {
        match mutation {
            Mutation::Upsert(entry) => {
                let id = entry.id;
                let previous = self.take(id);
                self.insert(entry);
                RollbackToken { id, previous }
            }
            Mutation::Remove(id) => RollbackToken {
                id,
                previous: self.take(id),
            },
        }
    }

    /// Undoes the mutation the token came from.
    pub fn rollback(&mut self, token: RollbackToken) {
        self.take(token.id);
        if let Some(previous) = token.previous {
            self.insert(previous);
        }
    }

    /// Confirms an optimistic mutation with the record the service returned.
    /// The committed record may carry a different id than the provisional
    /// one, which it replaces.
    pub fn commit(&mut self, token: RollbackToken, committed: Option<Entry>) {
        self.take(token.id);
        if let Some(entry) = committed {
            self.take(entry.id);
            self.insert(entry);
        }
    }

    fn take(&mut self, id: Uuid) -> Option<Entry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    fn insert(&mut self, entry: Entry) {
        let index = self
            .entries
            .iter()
            .position(|e| e.timestamp < entry.timestamp)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
    }
}

fn sort_newest_first(entries: &mut [Entry]) {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
