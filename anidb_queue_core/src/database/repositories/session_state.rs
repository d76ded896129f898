//! Persisted ban state and operator pause flags
//!
//! Both survive restarts: a ban recorded before shutdown is restored into the
//! session guard on startup, and queues paused by the operator stay paused.

use crate::Result;
use crate::database::models::time_utils;
use crate::protocol::BanState;
use crate::queue::QueueName;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

const BAN_KEY: &str = "ban";

fn pause_key(queue: QueueName) -> String {
    format!("paused.{queue}")
}

/// Key/value access to the `session_state` table
#[derive(Clone)]
pub struct SessionStateRepository {
    pool: SqlitePool,
}

impl SessionStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM session_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        value
            .map(|value| serde_json::from_str(&value).map_err(Into::into))
            .transpose()
    }

    async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_state (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(time_utils::now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_ban(&self) -> Result<Option<BanState>> {
        self.get(BAN_KEY).await
    }

    pub async fn save_ban(&self, state: &BanState) -> Result<()> {
        self.set(BAN_KEY, state).await
    }

    pub async fn is_paused(&self, queue: QueueName) -> Result<bool> {
        Ok(self.get(&pause_key(queue)).await?.unwrap_or(false))
    }

    pub async fn set_paused(&self, queue: QueueName, paused: bool) -> Result<()> {
        self.set(&pause_key(queue), &paused).await
    }

    /// Pause flag of every queue, defaulting to unpaused
    pub async fn paused_queues(&self) -> Result<BTreeMap<QueueName, bool>> {
        let mut flags = BTreeMap::new();
        for queue in QueueName::ALL {
            flags.insert(queue, self.is_paused(queue).await?);
        }
        Ok(flags)
    }
}
