//! Database migration system
//!
//! Migrations are applied in order inside a transaction each and recorded in
//! `schema_version`.

use crate::{Error, Result, error::InternalError};
use sqlx::SqlitePool;

use super::models::time_utils;
use super::schema::{SCHEMA_V1, SCHEMA_V2};

const MIGRATIONS: &[(i32, &str)] = &[(1, SCHEMA_V1), (2, SCHEMA_V2)];

/// Run all necessary migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_current_version(pool).await?;

    for &(version, sql) in MIGRATIONS {
        if current_version < version {
            apply_migration(pool, version, sql).await?;
            log::debug!("Applied database migration {version}");
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub async fn get_current_version(pool: &SqlitePool) -> Result<i32> {
    if !table_exists(pool, "schema_version").await? {
        return Ok(0);
    }

    let version = sqlx::query_scalar::<_, Option<i32>>("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;

    Ok(version.unwrap_or(0))
}

fn migration_error(version: i32, step: &str, e: sqlx::Error) -> Error {
    Error::Internal(InternalError::database(format!(
        "Failed to {step} migration {version}: {e}"
    )))
}

/// Apply a single migration
async fn apply_migration(pool: &SqlitePool, version: i32, sql: &str) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| migration_error(version, "start", e))?;

    sqlx::raw_sql(sql)
        .execute(&mut *tx)
        .await
        .map_err(|e| migration_error(version, "apply", e))?;

    sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(version)
        .bind(time_utils::now_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| migration_error(version, "record", e))?;

    tx.commit()
        .await
        .map_err(|e| migration_error(version, "commit", e))?;

    Ok(())
}

/// Check if a table exists
pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
    )
    .bind(table_name)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}
