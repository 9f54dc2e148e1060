//! Backend storage.
//!
//! SQLite tables for babies, entries and caregiver relationships. Every call
//! is made on behalf of a user and checked against the relationships table:
//! a baby that is missing or tombstoned is `NotFound`, a live baby without a
//! relationship to the caller is `Forbidden`. Deletes only set `deleted_at`.

use std::path::Path;
use std::str::FromStr;

use babytrack_core::feed::ChangeKind;
use babytrack_core::timefmt::{self, MonotonicClock};
use babytrack_core::{
    Baby, BabyUpdate, DateRange, Entry, EntryPayload, EntryQuery, EntryType, EntryUpdate,
    ModelError, NewBaby, NewEntry,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

#[derive(Debug)]
pub enum ServerStorageError {
    Database(sqlx::Error),
    Migrate(sqlx::migrate::MigrateError),
    NotFound(String),
    Forbidden(String),
    Invalid(String),
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::Database(e) => write!(f, "Database error: {}", e),
            ServerStorageError::Migrate(e) => write!(f, "Migration failed: {}", e),
            ServerStorageError::NotFound(what) => write!(f, "{} not found", what),
            ServerStorageError::Forbidden(what) => {
                write!(f, "No caregiver relationship for {}", what)
            }
            ServerStorageError::Invalid(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for ServerStorageError {}

impl From<sqlx::Error> for ServerStorageError {
    fn from(e: sqlx::Error) -> Self {
        ServerStorageError::Database(e)
    }
}

impl From<sqlx::migrate::MigrateError> for ServerStorageError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        ServerStorageError::Migrate(e)
    }
}

impl From<ModelError> for ServerStorageError {
    fn from(e: ModelError) -> Self {
        ServerStorageError::Invalid(e.to_string())
    }
}

type Result<T> = std::result::Result<T, ServerStorageError>;

#[derive(sqlx::FromRow)]
struct BabyRecord {
    id: String,
    name: String,
    birth_date: String,
    preferred_units: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl BabyRecord {
    fn into_baby(self) -> Result<Baby> {
        Ok(Baby {
            id: parse_uuid(&self.id)?,
            name: self.name,
            birth_date: timefmt::decode_date(&self.birth_date)?,
            preferred_units: self.preferred_units.parse()?,
            created_at: timefmt::decode(&self.created_at)?,
            updated_at: timefmt::decode(&self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntryRecord {
    id: String,
    baby_id: String,
    #[sqlx(rename = "type")]
    entry_type: String,
    timestamp: String,
    created_at: String,
    updated_at: String,
    created_by: Option<String>,
    notes: Option<String>,
    payload_json: String,
    deleted_at: Option<String>,
}

impl EntryRecord {
    fn into_entry(self) -> Result<Entry> {
        let entry_type = EntryType::from_str(&self.entry_type)?;
        Ok(Entry {
            id: parse_uuid(&self.id)?,
            baby_id: parse_uuid(&self.baby_id)?,
            timestamp: timefmt::decode(&self.timestamp)?,
            created_at: timefmt::decode(&self.created_at)?,
            updated_at: timefmt::decode(&self.updated_at)?,
            created_by: self.created_by,
            notes: self.notes,
            payload: EntryPayload::from_json(entry_type, &self.payload_json)?,
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| ServerStorageError::Invalid(format!("{}: {}", value, e)))
}

pub struct ServerStorage {
    pool: SqlitePool,
    clock: MonotonicClock,
}

impl ServerStorage {
    /// Opens (creating if needed) the database and applies migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./server_migrations").run(&pool).await?;
        Ok(Self {
            pool,
            clock: MonotonicClock::new(),
        })
    }

    async fn baby_record(&self, id: Uuid) -> Result<Option<BabyRecord>> {
        Ok(sqlx::query_as("SELECT * FROM babies WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn entry_record(&self, id: Uuid) -> Result<Option<EntryRecord>> {
        Ok(sqlx::query_as("SELECT * FROM entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn is_caregiver(&self, user_id: &str, baby_id: Uuid) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM caregiver_relationships WHERE user_id = ? AND baby_id = ?",
        )
        .bind(user_id)
        .bind(baby_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Loads a live baby the user may access.
    async fn accessible_baby(&self, user_id: &str, id: Uuid) -> Result<Baby> {
        let record = match self.baby_record(id).await? {
            Some(record) if record.deleted_at.is_none() => record,
            _ => return Err(ServerStorageError::NotFound(format!("Baby {}", id))),
        };
        if !self.is_caregiver(user_id, id).await? {
            return Err(ServerStorageError::Forbidden(format!("baby {}", id)));
        }
        record.into_baby()
    }

    /// Loads a live entry whose baby the user may access.
    async fn accessible_entry(&self, user_id: &str, id: Uuid) -> Result<Entry> {
        let record = match self.entry_record(id).await? {
            Some(record) if record.deleted_at.is_none() => record,
            _ => return Err(ServerStorageError::NotFound(format!("Entry {}", id))),
        };
        let entry = record.into_entry()?;
        self.accessible_baby(user_id, entry.baby_id).await?;
        Ok(entry)
    }

    async fn write_baby(&self, baby: &Baby) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO babies (id, name, birth_date, preferred_units, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                birth_date = excluded.birth_date,
                preferred_units = excluded.preferred_units,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(baby.id.to_string())
        .bind(&baby.name)
        .bind(timefmt::encode_date(&baby.birth_date))
        .bind(baby.preferred_units.to_string())
        .bind(timefmt::encode(&baby.created_at))
        .bind(timefmt::encode(&baby.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_caregiver(&self, user_id: &str, baby_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO caregiver_relationships (user_id, baby_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, baby_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(baby_id.to_string())
        .bind(timefmt::encode(&timefmt::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_entry(&self, entry: &Entry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entries (id, baby_id, type, timestamp, created_at, updated_at, created_by, notes, payload_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                type = excluded.type,
                timestamp = excluded.timestamp,
                updated_at = excluded.updated_at,
                notes = excluded.notes,
                payload_json = excluded.payload_json
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.baby_id.to_string())
        .bind(entry.entry_type().as_str())
        .bind(timefmt::encode(&entry.timestamp))
        .bind(timefmt::encode(&entry.created_at))
        .bind(timefmt::encode(&entry.updated_at))
        .bind(&entry.created_by)
        .bind(&entry.notes)
        .bind(entry.payload.to_json())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========== Babies ==========

    /// Live babies the user is a caregiver of, oldest first.
    pub async fn list_babies(&self, user_id: &str) -> Result<Vec<Baby>> {
        let rows: Vec<BabyRecord> = sqlx::query_as(
            r#"
            SELECT b.* FROM babies b
            JOIN caregiver_relationships c ON c.baby_id = b.id
            WHERE c.user_id = ? AND b.deleted_at IS NULL
            ORDER BY b.created_at, b.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BabyRecord::into_baby).collect()
    }

    pub async fn get_baby(&self, user_id: &str, id: Uuid) -> Result<Baby> {
        self.accessible_baby(user_id, id).await
    }

    /// Creates the baby together with the caller's caregiver relationship.
    pub async fn create_baby(&self, user_id: &str, new: NewBaby) -> Result<Baby> {
        if new.name.trim().is_empty() {
            return Err(ServerStorageError::Invalid("name must not be empty".into()));
        }
        let baby = Baby::from_new(new, Uuid::new_v4(), self.clock.now());
        self.write_baby(&baby).await?;
        self.add_caregiver(user_id, baby.id).await?;
        tracing::info!("User {} created baby {}", user_id, baby.id);
        Ok(baby)
    }

    pub async fn update_baby(&self, user_id: &str, id: Uuid, update: &BabyUpdate) -> Result<Baby> {
        let mut baby = self.accessible_baby(user_id, id).await?;
        baby.apply(update, self.clock.now());
        self.write_baby(&baby).await?;
        Ok(baby)
    }

    /// Tombstones the baby and its entries.
    pub async fn delete_baby(&self, user_id: &str, id: Uuid) -> Result<()> {
        self.accessible_baby(user_id, id).await?;
        let at = timefmt::encode(&self.clock.now());

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE entries SET deleted_at = ? WHERE baby_id = ? AND deleted_at IS NULL")
            .bind(&at)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE babies SET deleted_at = ? WHERE id = ?")
            .bind(&at)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("User {} deleted baby {}", user_id, id);
        Ok(())
    }

    /// Writes a client's copy of a baby. A baby the backend has never seen is
    /// created along with the caller's relationship; an existing one is only
    /// overwritten when the copy is not older than the stored row. Returns
    /// the row the backend keeps.
    pub async fn upsert_baby(&self, user_id: &str, baby: &Baby) -> Result<Baby> {
        match self.baby_record(baby.id).await? {
            None => {
                self.write_baby(baby).await?;
                self.add_caregiver(user_id, baby.id).await?;
                Ok(baby.clone())
            }
            Some(record) if record.deleted_at.is_some() => {
                Err(ServerStorageError::NotFound(format!("Baby {}", baby.id)))
            }
            Some(_) => {
                let stored = self.accessible_baby(user_id, baby.id).await?;
                if baby.updated_at < stored.updated_at {
                    tracing::debug!("Kept newer copy of baby {}", baby.id);
                    return Ok(stored);
                }
                let mut incoming = baby.clone();
                incoming.created_at = stored.created_at;
                self.write_baby(&incoming).await?;
                Ok(incoming)
            }
        }
    }

    // ========== Entries ==========

    /// Live entries of the baby, newest first by event time.
    pub async fn list_entries(
        &self,
        user_id: &str,
        baby_id: Uuid,
        query: &EntryQuery,
    ) -> Result<Vec<Entry>> {
        self.accessible_baby(user_id, baby_id).await?;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM entries WHERE deleted_at IS NULL AND baby_id = ");
        qb.push_bind(baby_id.to_string());
        if let Some(entry_type) = query.entry_type {
            qb.push(" AND type = ").push_bind(entry_type.as_str());
        }
        if let Some(from) = &query.from {
            qb.push(" AND timestamp >= ").push_bind(timefmt::encode(from));
        }
        if let Some(to) = &query.to {
            qb.push(" AND timestamp < ").push_bind(timefmt::encode(to));
        }
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(query.effective_limit() as i64);

        let rows: Vec<EntryRecord> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(EntryRecord::into_entry).collect()
    }

    pub async fn get_entry(&self, user_id: &str, id: Uuid) -> Result<Entry> {
        self.accessible_entry(user_id, id).await
    }

    pub async fn create_entry(&self, user_id: &str, new: NewEntry) -> Result<Entry> {
        self.accessible_baby(user_id, new.baby_id).await?;
        let entry = Entry::from_new(new, Uuid::new_v4(), self.clock.now(), Some(user_id.to_string()));
        self.write_entry(&entry).await?;
        Ok(entry)
    }

    pub async fn update_entry(
        &self,
        user_id: &str,
        id: Uuid,
        update: &EntryUpdate,
    ) -> Result<Entry> {
        let mut entry = self.accessible_entry(user_id, id).await?;
        entry.apply(update, self.clock.now())?;
        self.write_entry(&entry).await?;
        Ok(entry)
    }

    /// Tombstones the entry and returns its last live state.
    pub async fn delete_entry(&self, user_id: &str, id: Uuid) -> Result<Entry> {
        let entry = self.accessible_entry(user_id, id).await?;
        sqlx::query("UPDATE entries SET deleted_at = ? WHERE id = ?")
            .bind(timefmt::encode(&self.clock.now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Writes a client's copy of an entry under the same newest-wins rule as
    /// [`upsert_baby`](Self::upsert_baby). Returns the kept row and, when the
    /// copy was written, whether it was an insert or an update.
    pub async fn upsert_entry(
        &self,
        user_id: &str,
        entry: &Entry,
    ) -> Result<(Entry, Option<ChangeKind>)> {
        self.accessible_baby(user_id, entry.baby_id).await?;

        match self.entry_record(entry.id).await? {
            None => {
                self.write_entry(entry).await?;
                Ok((entry.clone(), Some(ChangeKind::Inserted)))
            }
            Some(record) if record.deleted_at.is_some() => {
                Err(ServerStorageError::NotFound(format!("Entry {}", entry.id)))
            }
            Some(record) => {
                let stored = record.into_entry()?;
                if stored.baby_id != entry.baby_id {
                    return Err(ServerStorageError::Invalid(format!(
                        "entry {} belongs to another baby",
                        entry.id
                    )));
                }
                if stored.entry_type() != entry.entry_type() {
                    return Err(ModelError::EntryTypeChange {
                        from: stored.entry_type(),
                        to: entry.entry_type(),
                    }
                    .into());
                }
                if entry.updated_at < stored.updated_at {
                    tracing::debug!("Kept newer copy of entry {}", entry.id);
                    return Ok((stored, None));
                }
                let mut incoming = entry.clone();
                incoming.created_at = stored.created_at;
                incoming.created_by = stored.created_by;
                self.write_entry(&incoming).await?;
                Ok((incoming, Some(ChangeKind::Updated)))
            }
        }
    }

    /// Live entries of the baby created within the range.
    pub async fn export_entries(
        &self,
        user_id: &str,
        baby_id: Uuid,
        range: &DateRange,
    ) -> Result<Vec<Entry>> {
        self.accessible_baby(user_id, baby_id).await?;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM entries WHERE deleted_at IS NULL AND baby_id = ");
        qb.push_bind(baby_id.to_string());
        if let Some(from) = &range.from {
            qb.push(" AND created_at >= ").push_bind(timefmt::encode(from));
        }
        if let Some(to) = &range.to {
            qb.push(" AND created_at <= ").push_bind(timefmt::encode(to));
        }
        qb.push(" ORDER BY created_at DESC");

        let rows: Vec<EntryRecord> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(EntryRecord::into_entry).collect()
    }
}
