use babytrack_core::timefmt;
use babytrack_core::{Entry, EntryPayload, EntryType};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::LocalStoreError;

pub struct EntryRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct EntryRow {
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
}

fn parse_uuid(value: &str) -> Result<Uuid, LocalStoreError> {
    Uuid::parse_str(value).map_err(|e| LocalStoreError::Decode(format!("{}: {}", value, e)))
}

impl EntryRow {
    fn into_entry(self) -> Result<Entry, LocalStoreError> {
        let entry_type: EntryType = self.entry_type.parse()?;
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

/// Sort order for entry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryOrder {
    #[default]
    CreatedAsc,
    TimestampDesc,
}

/// Filter for local entry queries. Time bounds apply to the event timestamp;
/// `from` is inclusive and `to` exclusive.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub baby_id: Option<Uuid>,
    pub entry_type: Option<EntryType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Restrict to rows with this synced flag.
    pub synced: Option<bool>,
    pub order: EntryOrder,
    pub limit: Option<u32>,
}

impl EntryFilter {
    pub fn for_baby(baby_id: Uuid) -> Self {
        Self {
            baby_id: Some(baby_id),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn only_unsynced(mut self) -> Self {
        self.synced = Some(false);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.order = EntryOrder::TimestampDesc;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl EntryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or overwrites the entry with the same id.
    pub async fn put(&self, entry: &Entry, synced: bool) -> Result<(), LocalStoreError> {
        sqlx::query(
            r#"
            INSERT INTO entries (id, baby_id, type, timestamp, created_at, updated_at, created_by, notes, payload_json, synced)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                baby_id = excluded.baby_id,
                type = excluded.type,
                timestamp = excluded.timestamp,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                created_by = excluded.created_by,
                notes = excluded.notes,
                payload_json = excluded.payload_json,
                synced = excluded.synced
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
        .bind(synced)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Entry>, LocalStoreError> {
        let row: Option<EntryRow> = sqlx::query_as("SELECT * FROM entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(EntryRow::into_entry).transpose()
    }

    pub async fn query(&self, filter: &EntryFilter) -> Result<Vec<Entry>, LocalStoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM entries WHERE 1 = 1");

        if let Some(baby_id) = filter.baby_id {
            qb.push(" AND baby_id = ").push_bind(baby_id.to_string());
        }
        if let Some(entry_type) = filter.entry_type {
            qb.push(" AND type = ").push_bind(entry_type.as_str());
        }
        if let Some(from) = &filter.from {
            qb.push(" AND timestamp >= ").push_bind(timefmt::encode(from));
        }
        if let Some(to) = &filter.to {
            qb.push(" AND timestamp < ").push_bind(timefmt::encode(to));
        }
        if let Some(synced) = filter.synced {
            qb.push(" AND synced = ").push_bind(synced);
        }
        qb.push(match filter.order {
            EntryOrder::CreatedAsc => " ORDER BY created_at ASC, id ASC",
            EntryOrder::TimestampDesc => " ORDER BY timestamp DESC, id DESC",
        });
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows: Vec<EntryRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    /// Most recent sleep entry for the baby that has no end time.
    pub async fn active_sleep(&self, baby_id: Uuid) -> Result<Option<Entry>, LocalStoreError> {
        let sleeps = self
            .query(
                &EntryFilter::for_baby(baby_id)
                    .with_type(EntryType::Sleep)
                    .newest_first(),
            )
            .await?;
        Ok(sleeps.into_iter().find(Entry::is_active_sleep))
    }

    pub async fn is_synced(&self, id: Uuid) -> Result<Option<bool>, LocalStoreError> {
        let synced: Option<(bool,)> = sqlx::query_as("SELECT synced FROM entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(synced.map(|s| s.0))
    }

    /// Removes the entry. Returns the removed row's synced flag, or `None` if
    /// there was no such entry.
    pub async fn delete(&self, id: Uuid) -> Result<Option<bool>, LocalStoreError> {
        let synced = self.is_synced(id).await?;
        sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use babytrack_core::models::{
        DiaperPayload, DiaperType, FeedPayload, FeedSource, SleepPayload, SleepQuality,
        VolumeUnit,
    };
    use babytrack_core::NewEntry;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    struct TestContext {
        repo: EntryRepository,
        _temp_dir: TempDir,
    }

    async fn setup_repo() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        TestContext {
            repo: EntryRepository::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn entry(baby_id: Uuid, payload: EntryPayload, at: DateTime<Utc>) -> Entry {
        Entry::from_new(
            NewEntry::new(baby_id, payload).at(at),
            Uuid::new_v4(),
            at,
            Some("cg-1".to_string()),
        )
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::milliseconds(123)
    }

    #[tokio::test]
    async fn test_round_trip_every_payload_type() {
        let ctx = setup_repo().await;
        let baby_id = Uuid::new_v4();
        let at = base_time();

        let feed = entry(
            baby_id,
            EntryPayload::Feed(
                FeedPayload::new(FeedSource::Bottle, VolumeUnit::Ml).with_volume(120.0),
            ),
            at,
        );
        let diaper = entry(
            baby_id,
            EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet)),
            at + Duration::minutes(5),
        );
        let sleep = entry(
            baby_id,
            EntryPayload::Sleep(
                SleepPayload::started(at, true)
                    .with_quality(SleepQuality::try_from(4).unwrap())
                    .finish(at + Duration::minutes(45))
                    .unwrap(),
            ),
            at + Duration::minutes(10),
        );

        for e in [&feed, &diaper, &sleep] {
            ctx.repo.put(e, false).await.unwrap();
            assert_eq!(&ctx.repo.get(e.id).await.unwrap().unwrap(), e);
        }
    }

    #[tokio::test]
    async fn test_query_filters_and_default_order() {
        let ctx = setup_repo().await;
        let baby_id = Uuid::new_v4();
        let other_baby = Uuid::new_v4();
        let at = base_time();
        let wet = || EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet));
        let bottle =
            || EntryPayload::Feed(FeedPayload::new(FeedSource::Bottle, VolumeUnit::Oz));

        let first = entry(baby_id, wet(), at);
        let second = entry(baby_id, bottle(), at + Duration::hours(1));
        let third = entry(baby_id, wet(), at + Duration::hours(2));
        let elsewhere = entry(other_baby, wet(), at);
        // Inserted out of order on purpose.
        for e in [&third, &elsewhere, &first, &second] {
            ctx.repo.put(e, true).await.unwrap();
        }

        let all = ctx.repo.query(&EntryFilter::for_baby(baby_id)).await.unwrap();
        let ids: Vec<Uuid> = all.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);

        let diapers = ctx
            .repo
            .query(&EntryFilter::for_baby(baby_id).with_type(EntryType::Diaper))
            .await
            .unwrap();
        assert_eq!(diapers.len(), 2);

        let window = ctx
            .repo
            .query(
                &EntryFilter::for_baby(baby_id)
                    .between(Some(at + Duration::hours(1)), Some(at + Duration::hours(2))),
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, second.id);

        let unsynced = ctx
            .repo
            .query(&EntryFilter::for_baby(other_baby).only_unsynced())
            .await
            .unwrap();
        assert!(unsynced.is_empty());

        let newest = ctx
            .repo
            .query(&EntryFilter::for_baby(baby_id).newest_first().with_limit(1))
            .await
            .unwrap();
        assert_eq!(newest[0].id, third.id);
    }

    #[tokio::test]
    async fn test_active_sleep() {
        let ctx = setup_repo().await;
        let baby_id = Uuid::new_v4();
        let at = base_time();

        let finished = entry(
            baby_id,
            EntryPayload::Sleep(
                SleepPayload::started(at, true)
                    .finish(at + Duration::hours(1))
                    .unwrap(),
            ),
            at,
        );
        ctx.repo.put(&finished, true).await.unwrap();
        assert!(ctx.repo.active_sleep(baby_id).await.unwrap().is_none());

        let running = entry(
            baby_id,
            EntryPayload::Sleep(SleepPayload::started(at + Duration::hours(2), false)),
            at + Duration::hours(2),
        );
        ctx.repo.put(&running, false).await.unwrap();
        assert_eq!(
            ctx.repo.active_sleep(baby_id).await.unwrap().map(|e| e.id),
            Some(running.id)
        );
    }

    #[tokio::test]
    async fn test_delete_reports_synced_flag() {
        let ctx = setup_repo().await;
        let e = entry(
            Uuid::new_v4(),
            EntryPayload::Diaper(DiaperPayload::new(DiaperType::Dry)),
            base_time(),
        );
        ctx.repo.put(&e, false).await.unwrap();

        assert_eq!(ctx.repo.delete(e.id).await.unwrap(), Some(false));
        assert_eq!(ctx.repo.delete(e.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_decode_error() {
        let ctx = setup_repo().await;
        let e = entry(
            Uuid::new_v4(),
            EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet)),
            base_time(),
        );
        ctx.repo.put(&e, false).await.unwrap();
        sqlx::query("UPDATE entries SET payload_json = ? WHERE id = ?")
            .bind(r#"{"source":"breast","unit":"ml"}"#)
            .bind(e.id.to_string())
            .execute(&ctx.repo.pool)
            .await
            .unwrap();

        assert!(matches!(
            ctx.repo.get(e.id).await,
            Err(LocalStoreError::Decode(_))
        ));
    }
}
