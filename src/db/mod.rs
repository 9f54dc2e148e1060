//! Local Store.
//!
//! SQLite-backed cache of babies and entries that keeps working without a
//! network. Every row carries a `synced` flag; rows written by a fallback or
//! while offline stay unsynced until a sync pass confirms them.

mod baby_repo;
mod entry_repo;

pub use baby_repo::BabyRepository;
pub use entry_repo::{EntryFilter, EntryOrder, EntryRepository};

use babytrack_core::{timefmt, Baby, Entry, ModelError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

const ACTIVE_BABY_KEY: &str = "active_baby_id";

#[derive(Debug)]
pub enum LocalStoreError {
    Database(sqlx::Error),
    Migrate(sqlx::migrate::MigrateError),
    Io(std::io::Error),
    Decode(String),
    NotFound(String),
}

impl fmt::Display for LocalStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalStoreError::Database(e) => write!(f, "Local storage error: {}", e),
            LocalStoreError::Migrate(e) => write!(f, "Local storage migration failed: {}", e),
            LocalStoreError::Io(e) => write!(f, "Failed to create database directory: {}", e),
            LocalStoreError::Decode(msg) => write!(f, "Corrupt local record: {}", msg),
            LocalStoreError::NotFound(what) => write!(f, "Not found in local store: {}", what),
        }
    }
}

impl std::error::Error for LocalStoreError {}

impl From<sqlx::Error> for LocalStoreError {
    fn from(e: sqlx::Error) -> Self {
        LocalStoreError::Database(e)
    }
}

impl From<sqlx::migrate::MigrateError> for LocalStoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        LocalStoreError::Migrate(e)
    }
}

impl From<ModelError> for LocalStoreError {
    fn from(e: ModelError) -> Self {
        LocalStoreError::Decode(e.to_string())
    }
}

/// Initialize the database connection pool and run migrations
pub async fn init_db(db_path: Option<PathBuf>) -> Result<SqlitePool, LocalStoreError> {
    let path = db_path.unwrap_or_else(crate::config::default_database_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(LocalStoreError::Io)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Which collection a pending deletion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Baby,
    Entry,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Baby => "baby",
            RecordKind::Entry => "entry",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = LocalStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baby" => Ok(RecordKind::Baby),
            "entry" => Ok(RecordKind::Entry),
            other => Err(LocalStoreError::Decode(format!("unknown record kind '{}'", other))),
        }
    }
}

/// A row deleted locally that still has to be tombstoned on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub id: Uuid,
    pub kind: RecordKind,
}

#[derive(sqlx::FromRow)]
struct PendingDeletionRow {
    id: String,
    kind: String,
}

/// The two record collections plus the deletion queue and settings.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: Option<PathBuf>) -> Result<Self, LocalStoreError> {
        Ok(Self::new(init_db(db_path).await?))
    }

    pub fn babies(&self) -> BabyRepository {
        BabyRepository::new(self.pool.clone())
    }

    pub fn entries(&self) -> EntryRepository {
        EntryRepository::new(self.pool.clone())
    }

    pub async fn put_baby(&self, baby: &Baby, synced: bool) -> Result<(), LocalStoreError> {
        self.babies().put(baby, synced).await
    }

    pub async fn get_baby(&self, id: Uuid) -> Result<Option<Baby>, LocalStoreError> {
        self.babies().get(id).await
    }

    pub async fn list_babies(&self) -> Result<Vec<Baby>, LocalStoreError> {
        self.babies().list().await
    }

    /// Removes the baby and its entries. Returns the synced flag of the
    /// removed baby, `None` if it was not stored.
    pub async fn delete_baby(&self, id: Uuid) -> Result<Option<bool>, LocalStoreError> {
        let removed = self.babies().delete(id).await?;
        if removed.is_some() && self.active_baby().await? == Some(id) {
            self.clear_setting(ACTIVE_BABY_KEY).await?;
        }
        Ok(removed)
    }

    pub async fn put_entry(&self, entry: &Entry, synced: bool) -> Result<(), LocalStoreError> {
        self.entries().put(entry, synced).await
    }

    pub async fn get_entry(&self, id: Uuid) -> Result<Option<Entry>, LocalStoreError> {
        self.entries().get(id).await
    }

    pub async fn query_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>, LocalStoreError> {
        self.entries().query(filter).await
    }

    pub async fn delete_entry(&self, id: Uuid) -> Result<Option<bool>, LocalStoreError> {
        self.entries().delete(id).await
    }

    pub async fn active_sleep(&self, baby_id: Uuid) -> Result<Option<Entry>, LocalStoreError> {
        self.entries().active_sleep(baby_id).await
    }

    pub async fn is_synced(&self, kind: RecordKind, id: Uuid) -> Result<Option<bool>, LocalStoreError> {
        match kind {
            RecordKind::Baby => self.babies().is_synced(id).await,
            RecordKind::Entry => self.entries().is_synced(id).await,
        }
    }

    /// Mirrors a set of canonical entries from the backend without touching
    /// rows that are still waiting to be pushed. Entries deleted locally, or
    /// whose baby was, stay deleted until the queued deletion is pushed.
    pub async fn mirror_entries(&self, entries: &[Entry]) -> Result<(), LocalStoreError> {
        let pending = self.pending_deletion_ids().await?;
        for entry in entries {
            if pending.contains(&entry.id) || pending.contains(&entry.baby_id) {
                continue;
            }
            if self.entries().is_synced(entry.id).await? != Some(false) {
                self.entries().put(entry, true).await?;
            }
        }
        Ok(())
    }

    pub async fn mirror_babies(&self, babies: &[Baby]) -> Result<(), LocalStoreError> {
        let pending = self.pending_deletion_ids().await?;
        for baby in babies {
            if pending.contains(&baby.id) {
                continue;
            }
            if self.babies().is_synced(baby.id).await? != Some(false) {
                self.babies().put(baby, true).await?;
            }
        }
        Ok(())
    }

    /// Makes the synced babies match a complete backend listing: remote rows
    /// are mirrored and synced rows the backend no longer returns are
    /// dropped. Unsynced rows are left alone.
    pub async fn reconcile_babies(&self, remote: &[Baby]) -> Result<(), LocalStoreError> {
        self.mirror_babies(remote).await?;
        for baby in self.list_babies().await? {
            let gone = !remote.iter().any(|r| r.id == baby.id);
            if gone && self.babies().is_synced(baby.id).await? == Some(true) {
                tracing::debug!("Dropping local copy of baby {} removed remotely", baby.id);
                self.delete_baby(baby.id).await?;
            }
        }
        Ok(())
    }

    /// Same as [`reconcile_babies`](Self::reconcile_babies) for the entries
    /// selected by `filter`. Pruning only happens when `complete` says the
    /// backend returned every matching row.
    pub async fn reconcile_entries(
        &self,
        filter: &EntryFilter,
        remote: &[Entry],
        complete: bool,
    ) -> Result<(), LocalStoreError> {
        self.mirror_entries(remote).await?;
        if !complete {
            return Ok(());
        }
        let mut synced = filter.clone();
        synced.synced = Some(true);
        synced.limit = None;
        for entry in self.query_entries(&synced).await? {
            if !remote.iter().any(|r| r.id == entry.id) {
                tracing::debug!("Dropping local copy of entry {} removed remotely", entry.id);
                self.delete_entry(entry.id).await?;
            }
        }
        Ok(())
    }

    pub async fn queue_deletion(&self, kind: RecordKind, id: Uuid) -> Result<(), LocalStoreError> {
        sqlx::query(
            "INSERT INTO pending_deletions (id, kind, deleted_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .bind(timefmt::encode(&timefmt::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Queued deletions, babies after entries so children go first.
    pub async fn pending_deletions(&self) -> Result<Vec<PendingDeletion>, LocalStoreError> {
        let rows: Vec<PendingDeletionRow> = sqlx::query_as(
            "SELECT id, kind FROM pending_deletions ORDER BY kind DESC, deleted_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PendingDeletion {
                    id: Uuid::parse_str(&row.id)
                        .map_err(|e| LocalStoreError::Decode(e.to_string()))?,
                    kind: row.kind.parse()?,
                })
            })
            .collect()
    }

    pub async fn pending_deletion_ids(&self) -> Result<HashSet<Uuid>, LocalStoreError> {
        Ok(self
            .pending_deletions()
            .await?
            .into_iter()
            .map(|pending| pending.id)
            .collect())
    }

    pub async fn clear_deletion(&self, id: Uuid) -> Result<(), LocalStoreError> {
        sqlx::query("DELETE FROM pending_deletions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.map(|v| v.0))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_setting(&self, key: &str) -> Result<(), LocalStoreError> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn active_baby(&self) -> Result<Option<Uuid>, LocalStoreError> {
        match self.get_setting(ACTIVE_BABY_KEY).await? {
            Some(value) => Uuid::parse_str(&value)
                .map(Some)
                .map_err(|e| LocalStoreError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn set_active_baby(&self, id: Option<Uuid>) -> Result<(), LocalStoreError> {
        match id {
            Some(id) => self.set_setting(ACTIVE_BABY_KEY, &id.to_string()).await,
            None => self.clear_setting(ACTIVE_BABY_KEY).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use babytrack_core::models::{DiaperPayload, DiaperType};
    use babytrack_core::{EntryPayload, NewBaby, NewEntry};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let pool = init_db(Some(db_path)).await.unwrap();

        // Verify tables exist
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"babies"));
        assert!(table_names.contains(&"entries"));
        assert!(table_names.contains(&"pending_deletions"));
        assert!(table_names.contains(&"settings"));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let baby = Baby::from_new(
            NewBaby::new("Persisted", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            Uuid::new_v4(),
            timefmt::now(),
        );

        {
            let store = LocalStore::open(Some(db_path.clone())).await.unwrap();
            store.put_baby(&baby, false).await.unwrap();
            store.set_active_baby(Some(baby.id)).await.unwrap();
        }

        let store = LocalStore::open(Some(db_path)).await.unwrap();
        assert_eq!(store.get_baby(baby.id).await.unwrap(), Some(baby.clone()));
        assert_eq!(store.active_baby().await.unwrap(), Some(baby.id));
    }

    #[tokio::test]
    async fn test_delete_baby_cascades_and_clears_active() {
        let temp_dir = tempdir().unwrap();
        let store = LocalStore::open(Some(temp_dir.path().join("test.db")))
            .await
            .unwrap();
        let baby = Baby::from_new(
            NewBaby::new("Cascade", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            Uuid::new_v4(),
            timefmt::now(),
        );
        let entry = Entry::from_new(
            NewEntry::new(
                baby.id,
                EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet)),
            ),
            Uuid::new_v4(),
            timefmt::now(),
            None,
        );
        store.put_baby(&baby, true).await.unwrap();
        store.put_entry(&entry, true).await.unwrap();
        store.set_active_baby(Some(baby.id)).await.unwrap();

        assert_eq!(store.delete_baby(baby.id).await.unwrap(), Some(true));
        assert!(store.get_entry(entry.id).await.unwrap().is_none());
        assert_eq!(store.active_baby().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_deletions_queue() {
        let temp_dir = tempdir().unwrap();
        let store = LocalStore::open(Some(temp_dir.path().join("test.db")))
            .await
            .unwrap();
        let baby_id = Uuid::new_v4();
        let entry_id = Uuid::new_v4();

        store.queue_deletion(RecordKind::Baby, baby_id).await.unwrap();
        store.queue_deletion(RecordKind::Entry, entry_id).await.unwrap();
        // Queuing twice is harmless.
        store.queue_deletion(RecordKind::Entry, entry_id).await.unwrap();

        let pending = store.pending_deletions().await.unwrap();
        assert_eq!(
            pending,
            vec![
                PendingDeletion {
                    id: entry_id,
                    kind: RecordKind::Entry
                },
                PendingDeletion {
                    id: baby_id,
                    kind: RecordKind::Baby
                },
            ]
        );

        store.clear_deletion(entry_id).await.unwrap();
        assert_eq!(store.pending_deletions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mirror_keeps_unsynced_local_rows() {
        let temp_dir = tempdir().unwrap();
        let store = LocalStore::open(Some(temp_dir.path().join("test.db")))
            .await
            .unwrap();
        let mut baby = Baby::from_new(
            NewBaby::new("Local edit", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            Uuid::new_v4(),
            timefmt::now(),
        );
        store.put_baby(&baby, false).await.unwrap();

        let mut remote_copy = baby.clone();
        remote_copy.name = "Remote".to_string();
        store.mirror_babies(&[remote_copy]).await.unwrap();
        assert_eq!(store.get_baby(baby.id).await.unwrap().unwrap().name, "Local edit");

        baby.name = "Synced".to_string();
        store.put_baby(&baby, true).await.unwrap();
        let mut remote_copy = baby.clone();
        remote_copy.name = "Remote".to_string();
        store.mirror_babies(&[remote_copy]).await.unwrap();
        assert_eq!(store.get_baby(baby.id).await.unwrap().unwrap().name, "Remote");
    }

    #[tokio::test]
    async fn test_mirror_does_not_restore_queued_deletions() {
        let temp_dir = tempdir().unwrap();
        let store = LocalStore::open(Some(temp_dir.path().join("test.db")))
            .await
            .unwrap();
        let baby = Baby::from_new(
            NewBaby::new("Deleted offline", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            Uuid::new_v4(),
            timefmt::now(),
        );
        let entry = Entry::from_new(
            NewEntry::new(
                baby.id,
                EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet)),
            ),
            Uuid::new_v4(),
            timefmt::now(),
            None,
        );
        store.put_baby(&baby, true).await.unwrap();
        store.put_entry(&entry, true).await.unwrap();

        store.delete_entry(entry.id).await.unwrap();
        store.queue_deletion(RecordKind::Entry, entry.id).await.unwrap();
        store
            .reconcile_entries(&EntryFilter::for_baby(baby.id), &[entry.clone()], true)
            .await
            .unwrap();
        assert!(store.get_entry(entry.id).await.unwrap().is_none());

        store.delete_baby(baby.id).await.unwrap();
        store.queue_deletion(RecordKind::Baby, baby.id).await.unwrap();
        store.clear_deletion(entry.id).await.unwrap();
        store.reconcile_babies(&[baby.clone()]).await.unwrap();
        store.mirror_entries(&[entry.clone()]).await.unwrap();
        assert!(store.get_baby(baby.id).await.unwrap().is_none());
        assert!(store.get_entry(entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_entries_prunes_only_synced_rows() {
        let temp_dir = tempdir().unwrap();
        let store = LocalStore::open(Some(temp_dir.path().join("test.db")))
            .await
            .unwrap();
        let baby_id = Uuid::new_v4();
        let make = || {
            Entry::from_new(
                NewEntry::new(
                    baby_id,
                    EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet)),
                ),
                Uuid::new_v4(),
                timefmt::now(),
                None,
            )
        };
        let kept = make();
        let removed_remotely = make();
        let local_only = make();
        store.put_entry(&kept, true).await.unwrap();
        store.put_entry(&removed_remotely, true).await.unwrap();
        store.put_entry(&local_only, false).await.unwrap();

        let filter = EntryFilter::for_baby(baby_id);
        // An incomplete listing never prunes.
        store
            .reconcile_entries(&filter, &[kept.clone()], false)
            .await
            .unwrap();
        assert!(store.get_entry(removed_remotely.id).await.unwrap().is_some());

        store
            .reconcile_entries(&filter, &[kept.clone()], true)
            .await
            .unwrap();
        assert!(store.get_entry(kept.id).await.unwrap().is_some());
        assert!(store.get_entry(removed_remotely.id).await.unwrap().is_none());
        assert!(store.get_entry(local_only.id).await.unwrap().is_some());
    }
}
