//! SQLite persistence
//!
//! One database file holds the command queues, the AniDB-derived records
//! and the persisted session state (ban and pause flags).

pub mod migrations;
pub mod models;
pub mod repositories;
pub mod schema;

use crate::{
    Error, Result,
    error::{InternalError, IoError, IoTarget},
};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use repositories::{
    Repository, SessionStateRepository, SqliteCommandStore, SqliteRecordStore,
};

/// Database connection manager with connection pooling
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and run migrations
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Io(IoError::from_std(e).at(IoTarget::Database, db_path)))?;
        }

        // WAL lets the CLI read while `run` writes
        let connect_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                Error::Internal(InternalError::database(format!(
                    "Failed to connect to database: {e}"
                )))
            })?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn command_store(&self) -> SqliteCommandStore {
        SqliteCommandStore::new(self.pool.clone())
    }

    pub fn record_store(&self) -> SqliteRecordStore {
        SqliteRecordStore::new(self.pool.clone())
    }

    pub fn session_state(&self) -> SessionStateRepository {
        SessionStateRepository::new(self.pool.clone())
    }

    async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Row counts for status output
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let command_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM commands")
            .fetch_one(&self.pool)
            .await?;

        let record_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM anidb_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            command_count: command_count as u64,
            record_count: record_count as u64,
        })
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Database statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DatabaseStats {
    pub command_count: u64,
    pub record_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation_and_stats() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("nested/dir/queue.db"))
            .await
            .unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.command_count, 0);
        assert_eq!(stats.record_count, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_reports_persistence_error() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("queue.db")).await.unwrap();
        db.close().await;

        let err = db.stats().await.unwrap_err();
        assert!(err.is_persistence());
    }
}
