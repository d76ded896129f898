//! SQLite store for AniDB-derived records

use crate::Result;
use crate::database::models::{RECORD_COLUMNS, row_to_record, time_utils};
use crate::store::{AniDbRecord, RecordKind, RecordStore};
use async_trait::async_trait;
use sqlx::SqlitePool;

use super::Repository;

/// Records keyed by `(kind, key)` in `anidb_records`
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert; returns the row id
    async fn upsert(&self, record: &AniDbRecord) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO anidb_records (kind, record_key, data, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(kind, record_key) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(record.kind)
        .bind(&record.key)
        .bind(serde_json::to_string(&record.data)?)
        .bind(time_utils::to_millis(record.updated_at))
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<AniDbRecord>> {
        let query =
            format!("SELECT {RECORD_COLUMNS} FROM anidb_records WHERE kind = ? AND record_key = ?");
        let row = sqlx::query(&query)
            .bind(kind)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn save(&self, record: &AniDbRecord) -> Result<()> {
        self.upsert(record).await.map(|_| ())
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM anidb_records WHERE kind = ? AND record_key = ?")
            .bind(kind)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_all(&self, kind: RecordKind) -> Result<Vec<AniDbRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM anidb_records WHERE kind = ? ORDER BY record_key"
        );
        let rows = sqlx::query(&query).bind(kind).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl Repository<AniDbRecord> for SqliteRecordStore {
    async fn create(&self, record: &AniDbRecord) -> Result<i64> {
        self.upsert(record).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<AniDbRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM anidb_records WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn update(&self, record: &AniDbRecord) -> Result<()> {
        self.upsert(record).await.map(|_| ())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM anidb_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM anidb_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
