use babytrack_core::timefmt;
use babytrack_core::Baby;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::LocalStoreError;

pub struct BabyRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct BabyRow {
    id: String,
    name: String,
    birth_date: String,
    preferred_units: String,
    created_at: String,
    updated_at: String,
    synced: bool,
}

impl BabyRow {
    fn into_baby(self) -> Result<Baby, LocalStoreError> {
        Ok(Baby {
            id: Uuid::parse_str(&self.id).map_err(|e| LocalStoreError::Decode(e.to_string()))?,
            name: self.name,
            birth_date: timefmt::decode_date(&self.birth_date)?,
            preferred_units: self.preferred_units.parse()?,
            created_at: timefmt::decode(&self.created_at)?,
            updated_at: timefmt::decode(&self.updated_at)?,
        })
    }
}

impl BabyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or overwrites the baby with the same id.
    pub async fn put(&self, baby: &Baby, synced: bool) -> Result<(), LocalStoreError> {
        sqlx::query(
            r#"
            INSERT INTO babies (id, name, birth_date, preferred_units, created_at, updated_at, synced)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                birth_date = excluded.birth_date,
                preferred_units = excluded.preferred_units,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                synced = excluded.synced
            "#,
        )
        .bind(baby.id.to_string())
        .bind(&baby.name)
        .bind(timefmt::encode_date(&baby.birth_date))
        .bind(baby.preferred_units.to_string())
        .bind(timefmt::encode(&baby.created_at))
        .bind(timefmt::encode(&baby.updated_at))
        .bind(synced)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Baby>, LocalStoreError> {
        let row: Option<BabyRow> = sqlx::query_as("SELECT * FROM babies WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(BabyRow::into_baby).transpose()
    }

    /// All babies, oldest first.
    pub async fn list(&self) -> Result<Vec<Baby>, LocalStoreError> {
        let rows: Vec<BabyRow> = sqlx::query_as("SELECT * FROM babies ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(BabyRow::into_baby).collect()
    }

    pub async fn is_synced(&self, id: Uuid) -> Result<Option<bool>, LocalStoreError> {
        let synced: Option<(bool,)> = sqlx::query_as("SELECT synced FROM babies WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(synced.map(|s| s.0))
    }

    /// Removes the baby and its entries. Returns the removed row's synced
    /// flag, or `None` if there was no such baby.
    pub async fn delete(&self, id: Uuid) -> Result<Option<bool>, LocalStoreError> {
        let mut tx = self.pool.begin().await?;
        let id_str = id.to_string();

        let synced: Option<(bool,)> = sqlx::query_as("SELECT synced FROM babies WHERE id = ?")
            .bind(&id_str)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM entries WHERE baby_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM babies WHERE id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(synced.map(|s| s.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use babytrack_core::{NewBaby, Units};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    struct TestContext {
        repo: BabyRepository,
        _temp_dir: TempDir,
    }

    async fn setup_repo() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        TestContext {
            repo: BabyRepository::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn baby(name: &str) -> Baby {
        Baby::from_new(
            NewBaby::new(name, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            Uuid::new_v4(),
            timefmt::now(),
        )
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let ctx = setup_repo().await;
        let original = baby("Test Baby");

        ctx.repo.put(&original, false).await.unwrap();

        let loaded = ctx.repo.get(original.id).await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.preferred_units, Units::Metric);
        assert_eq!(ctx.repo.is_synced(original.id).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let ctx = setup_repo().await;
        let mut b = baby("Before");
        ctx.repo.put(&b, false).await.unwrap();

        b.name = "After".to_string();
        ctx.repo.put(&b, true).await.unwrap();

        let list = ctx.repo.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "After");
        assert_eq!(ctx.repo.is_synced(b.id).await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let ctx = setup_repo().await;
        assert!(ctx.repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let ctx = setup_repo().await;
        let b = baby("Gone");
        ctx.repo.put(&b, true).await.unwrap();

        assert_eq!(ctx.repo.delete(b.id).await.unwrap(), Some(true));
        assert_eq!(ctx.repo.delete(b.id).await.unwrap(), None);
        assert!(ctx.repo.get(b.id).await.unwrap().is_none());
    }
}
