//! SQLite command store

use crate::Result;
use crate::commands::{CommandRequest, CommandStatus};
use crate::database::models::{COMMAND_COLUMNS, command_type, row_to_command, time_utils};
use crate::queue::{QueueCounts, QueueName};
use crate::store::CommandStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::Repository;

/// Command store backed by the `commands` table
#[derive(Clone)]
pub struct SqliteCommandStore {
    pool: SqlitePool,
}

impl SqliteCommandStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, filter: &str, queue: QueueName) -> Result<Vec<CommandRequest>> {
        let query = format!(
            "SELECT {COMMAND_COLUMNS} FROM commands WHERE queue = ? {filter}
             ORDER BY priority ASC, date_due ASC, id ASC"
        );
        let rows = sqlx::query(&query).bind(queue).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_command).collect()
    }

    async fn insert(&self, request: &CommandRequest, ignore_duplicates: bool) -> Result<Option<i64>> {
        let verb = if ignore_duplicates {
            "INSERT OR IGNORE"
        } else {
            "INSERT"
        };
        let query = format!(
            r#"{verb} INTO commands (
                identity, queue, command_type, payload, priority, date_due,
                status, attempt_count, last_error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        );

        let result = sqlx::query(&query)
            .bind(&request.identity)
            .bind(request.queue)
            .bind(command_type(&request.kind)?)
            .bind(serde_json::to_string(&request.kind)?)
            .bind(request.priority)
            .bind(time_utils::to_millis(request.date_due))
            .bind(request.status)
            .bind(i64::from(request.attempt_count))
            .bind(&request.last_error)
            .bind(time_utils::to_millis(request.created_at))
            .bind(time_utils::to_millis(request.updated_at))
            .execute(&self.pool)
            .await?;

        Ok((result.rows_affected() > 0).then(|| result.last_insert_rowid()))
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn insert_if_absent(&self, request: &CommandRequest) -> Result<Option<i64>> {
        let mut pending = request.clone();
        pending.status = CommandStatus::Pending;
        self.insert(&pending, true).await
    }

    async fn next_due(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<CommandRequest>> {
        let query = format!(
            "SELECT {COMMAND_COLUMNS} FROM commands
             WHERE queue = ? AND status = ? AND date_due <= ?
             ORDER BY priority ASC, date_due ASC, id ASC
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(queue)
            .bind(CommandStatus::Pending)
            .bind(time_utils::to_millis(now))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_command).transpose()
    }

    async fn next_due_at(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>> {
        let due = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MIN(date_due) FROM commands WHERE queue = ? AND status = ?",
        )
        .bind(queue)
        .bind(CommandStatus::Pending)
        .fetch_one(&self.pool)
        .await?;

        Ok(due.map(time_utils::from_millis))
    }

    async fn mark_running(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE commands SET status = ?, updated_at = ? WHERE id = ?")
            .bind(CommandStatus::Running)
            .bind(time_utils::to_millis(now))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: i64,
        date_due: DateTime<Utc>,
        attempt_count: u32,
        last_error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE commands
            SET status = ?, date_due = ?, attempt_count = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(CommandStatus::Pending)
        .bind(time_utils::to_millis(date_due))
        .bind(i64::from(attempt_count))
        .bind(last_error)
        .bind(time_utils::to_millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM commands WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE commands SET status = ?, last_error = ?, updated_at = ? WHERE id = ?")
            .bind(CommandStatus::Failed)
            .bind(reason)
            .bind(time_utils::to_millis(now))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<CommandRequest>> {
        <Self as Repository<CommandRequest>>::find_by_id(self, id).await
    }

    async fn get_all(&self, queue: QueueName) -> Result<Vec<CommandRequest>> {
        self.fetch_where("", queue).await
    }

    async fn failed(&self, queue: QueueName) -> Result<Vec<CommandRequest>> {
        self.fetch_where("AND status = 'failed'", queue).await
    }

    async fn requeue_failed(&self, queue: QueueName, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        // Failed duplicates of an active identity, and all but the newest
        // failure per identity, would collide on the active-identity index
        sqlx::query(
            r#"
            DELETE FROM commands
            WHERE queue = ? AND status = 'failed'
              AND (identity IN (SELECT identity FROM commands WHERE status IN ('pending', 'running'))
                   OR id NOT IN (SELECT MAX(id) FROM commands
                                 WHERE queue = ? AND status = 'failed' GROUP BY identity))
            "#,
        )
        .bind(queue)
        .bind(queue)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE commands
            SET status = ?, attempt_count = 0, date_due = ?, updated_at = ?
            WHERE queue = ? AND status = ?
            "#,
        )
        .bind(CommandStatus::Pending)
        .bind(time_utils::to_millis(now))
        .bind(time_utils::to_millis(now))
        .bind(queue)
        .bind(CommandStatus::Failed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM commands WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, queue: QueueName) -> Result<u64> {
        let result = sqlx::query("DELETE FROM commands WHERE queue = ? AND status != ?")
            .bind(queue)
            .bind(CommandStatus::Running)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM commands WHERE queue = ? GROUP BY status",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let status: CommandStatus = row.try_get("status")?;
            let count = row.try_get::<i64, _>("count")? as u64;
            match status {
                CommandStatus::Pending => counts.pending = count,
                CommandStatus::Running => counts.running = count,
                CommandStatus::Failed => counts.failed = count,
                CommandStatus::Completed => {}
            }
        }
        Ok(counts)
    }

    async fn reset_running(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE commands SET status = ? WHERE status = ?")
            .bind(CommandStatus::Pending)
            .bind(CommandStatus::Running)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Repository<CommandRequest> for SqliteCommandStore {
    async fn create(&self, request: &CommandRequest) -> Result<i64> {
        Ok(self.insert(request, false).await?.unwrap_or_default())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<CommandRequest>> {
        let query = format!("SELECT {COMMAND_COLUMNS} FROM commands WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_command).transpose()
    }

    async fn update(&self, request: &CommandRequest) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE commands SET
                identity = ?, queue = ?, command_type = ?, payload = ?, priority = ?,
                date_due = ?, status = ?, attempt_count = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&request.identity)
        .bind(request.queue)
        .bind(command_type(&request.kind)?)
        .bind(serde_json::to_string(&request.kind)?)
        .bind(request.priority)
        .bind(time_utils::to_millis(request.date_due))
        .bind(request.status)
        .bind(i64::from(request.attempt_count))
        .bind(&request.last_error)
        .bind(time_utils::to_millis(request.updated_at))
        .bind(request.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        CommandStore::delete(self, id).await.map(|_| ())
    }

    async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM commands")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandKind;
    use crate::database::Database;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteCommandStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("queue.db")).await.unwrap();
        (SqliteCommandStore::new(db.pool().clone()), temp_dir)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap()
    }

    fn file(ed2k: &str) -> CommandRequest {
        CommandRequest::new(
            CommandKind::GetFile {
                size: 734003200,
                ed2k: ed2k.to_string(),
            },
            now(),
        )
    }

    #[tokio::test]
    async fn test_insert_round_trips_payload() {
        let (store, _temp_dir) = create_test_store().await;
        let request = file("a0b1").with_priority(1);
        let id = store.insert_if_absent(&request).await.unwrap().unwrap();

        let stored = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.kind, request.kind);
        assert_eq!(stored.priority, 1);
        assert_eq!(stored.queue, QueueName::General);
        assert_eq!(stored.date_due, now());
        assert_eq!(stored.status, CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_dedup_against_pending_and_running_only() {
        let (store, _temp_dir) = create_test_store().await;
        let id = store.insert_if_absent(&file("a0b1")).await.unwrap().unwrap();
        assert_eq!(store.insert_if_absent(&file("a0b1")).await.unwrap(), None);

        store.mark_running(id, now()).await.unwrap();
        assert_eq!(store.insert_if_absent(&file("a0b1")).await.unwrap(), None);

        store.fail(id, "320 NO SUCH FILE", now()).await.unwrap();
        assert!(store.insert_if_absent(&file("a0b1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_next_due_ordering_and_delay() {
        let (store, _temp_dir) = create_test_store().await;
        for (ed2k, priority) in [("c", 3), ("a", 1), ("b", 2)] {
            store
                .insert_if_absent(&file(ed2k).with_priority(priority))
                .await
                .unwrap();
        }
        let later = now() + chrono::Duration::minutes(5);
        store
            .insert_if_absent(&file("urgent-later").with_priority(0).due_at(later))
            .await
            .unwrap();

        let mut order = Vec::new();
        while let Some(next) = store.next_due(QueueName::General, now()).await.unwrap() {
            order.push(next.identity.clone());
            store.complete(next.id).await.unwrap();
        }
        assert_eq!(order, ["GetFile:a", "GetFile:b", "GetFile:c"]);
        assert_eq!(
            store.next_due_at(QueueName::General).await.unwrap(),
            Some(later)
        );
    }

    #[tokio::test]
    async fn test_reschedule_fail_and_requeue() {
        let (store, _temp_dir) = create_test_store().await;
        let id = store.insert_if_absent(&file("a")).await.unwrap().unwrap();
        store.mark_running(id, now()).await.unwrap();
        store
            .reschedule(id, now() + chrono::Duration::seconds(4), 2, Some("timeout"), now())
            .await
            .unwrap();

        let row = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.attempt_count, 2);
        assert_eq!(row.last_error.as_deref(), Some("timeout"));
        assert!(store.next_due(QueueName::General, now()).await.unwrap().is_none());

        store.fail(id, "gave up", now()).await.unwrap();
        let other = store.insert_if_absent(&file("b")).await.unwrap().unwrap();
        store.fail(other, "gave up", now()).await.unwrap();
        store.insert_if_absent(&file("b")).await.unwrap().unwrap();

        assert_eq!(store.failed(QueueName::General).await.unwrap().len(), 2);
        assert_eq!(store.requeue_failed(QueueName::General, now()).await.unwrap(), 1);

        let counts = store.counts(QueueName::General).await.unwrap();
        assert_eq!(counts, QueueCounts { pending: 2, running: 0, failed: 0 });
        let row = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_reset_running_and_clear() {
        let (store, _temp_dir) = create_test_store().await;
        let running = store.insert_if_absent(&file("a")).await.unwrap().unwrap();
        store.insert_if_absent(&file("b")).await.unwrap();
        store.mark_running(running, now()).await.unwrap();

        assert_eq!(store.clear(QueueName::General).await.unwrap(), 1);
        assert_eq!(store.reset_running().await.unwrap(), 1);
        assert_eq!(Repository::<CommandRequest>::count(&store).await.unwrap(), 1);
        assert_eq!(
            store.get_by_id(running).await.unwrap().unwrap().status,
            CommandStatus::Pending
        );
    }
}
