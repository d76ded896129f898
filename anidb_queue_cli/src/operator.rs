//! One-shot queue operations against the persisted state
//!
//! These run while a `run` service may hold the same database open; the
//! service picks up new rows, pause flags and manual unbans on its next
//! control sync.

use crate::config::StorageConfig;
use anidb_queue_core::database::{Database, SessionStateRepository};
use anidb_queue_core::protocol::BanState;
use anidb_queue_core::{
    AddResult, CommandKind, CommandRequest, CommandRouter, CommandStore, QueueCounts, QueueName,
    SystemClock,
};
use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::sync::Arc;

/// Persisted view of one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    pub name: QueueName,
    pub paused: bool,
    pub counts: QueueCounts,
}

/// Ban state plus all queue reports
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub ban: BanState,
    pub queues: Vec<QueueReport>,
}

pub struct Operator {
    db: Database,
    router: CommandRouter,
    session: SessionStateRepository,
}

impl Operator {
    pub async fn open(storage: &StorageConfig) -> Result<Self> {
        let path = storage.database_path();
        let db = Database::new(&path)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        let router = CommandRouter::new(Arc::new(db.command_store()), Arc::new(SystemClock));
        let session = db.session_state();
        Ok(Self {
            db,
            router,
            session,
        })
    }

    /// Persist a command with its default priority unless one is given
    pub async fn enqueue(&self, kind: CommandKind, priority: Option<i32>) -> Result<AddResult> {
        let mut request = CommandRequest::new(kind, self.router.now());
        if let Some(priority) = priority {
            request = request.with_priority(priority);
        }
        Ok(self.router.add(request).await?)
    }

    pub async fn queue(&self, queue: QueueName) -> Result<QueueReport> {
        Ok(QueueReport {
            name: queue,
            paused: self.session.is_paused(queue).await?,
            counts: self.router.store().counts(queue).await?,
        })
    }

    pub async fn queues(&self) -> Result<Vec<QueueReport>> {
        let mut reports = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            reports.push(self.queue(queue).await?);
        }
        Ok(reports)
    }

    pub async fn report(&self) -> Result<ServiceReport> {
        Ok(ServiceReport {
            ban: self.ban_state().await?,
            queues: self.queues().await?,
        })
    }

    pub async fn set_paused(&self, queue: QueueName, paused: bool) -> Result<()> {
        self.session.set_paused(queue, paused).await?;
        info!("{queue} {}", if paused { "paused" } else { "resumed" });
        Ok(())
    }

    /// Drop pending and failed commands; running ones are left alone
    pub async fn clear(&self, queue: QueueName) -> Result<u64> {
        Ok(self.router.store().clear(queue).await?)
    }

    pub async fn failed(&self, queue: QueueName) -> Result<Vec<CommandRequest>> {
        Ok(self.router.store().failed(queue).await?)
    }

    /// Make failed commands pending again, due now
    pub async fn retry(&self, queue: QueueName) -> Result<u64> {
        Ok(self
            .router
            .store()
            .requeue_failed(queue, self.router.now())
            .await?)
    }

    pub async fn ban_state(&self) -> Result<BanState> {
        Ok(self.session.load_ban().await?.unwrap_or_default())
    }

    /// Clear the persisted ban; returns whether one was active
    pub async fn unban(&self) -> Result<bool> {
        let was_banned = self.ban_state().await?.banned;
        if was_banned {
            self.session.save_ban(&BanState::default()).await?;
            info!("Ban cleared by operator");
        }
        Ok(was_banned)
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anidb_queue_core::protocol::BanOrigin;
    use chrono::Utc;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> Operator {
        let storage = StorageConfig {
            database_path: Some(dir.path().join("queue.db")),
            images_dir: None,
        };
        Operator::open(&storage).await.unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_reports_duplicates() {
        let dir = TempDir::new().unwrap();
        let operator = open(&dir).await;
        let kind = CommandKind::GetReleaseGroup { group_id: 7091 };

        assert!(operator.enqueue(kind.clone(), None).await.unwrap().is_queued());
        assert_eq!(
            operator.enqueue(kind, Some(1)).await.unwrap(),
            AddResult::AlreadyQueued
        );
        let report = operator.queue(QueueName::General).await.unwrap();
        assert_eq!(report.counts.pending, 1);
        assert!(!report.paused);
    }

    #[tokio::test]
    async fn test_priority_override_is_persisted() {
        let dir = TempDir::new().unwrap();
        let operator = open(&dir).await;
        operator
            .enqueue(
                CommandKind::HashFile {
                    path: PathBuf::from("/media/ep01.mkv"),
                },
                Some(1),
            )
            .await
            .unwrap();

        let rows = operator
            .router
            .store()
            .get_all(QueueName::Hasher)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].priority, 1);
    }

    #[tokio::test]
    async fn test_pause_flag_round_trip() {
        let dir = TempDir::new().unwrap();
        let operator = open(&dir).await;
        operator.set_paused(QueueName::Images, true).await.unwrap();

        let reports = operator.queues().await.unwrap();
        let paused: Vec<_> = reports.iter().filter(|r| r.paused).map(|r| r.name).collect();
        assert_eq!(paused, vec![QueueName::Images]);

        operator.set_paused(QueueName::Images, false).await.unwrap();
        assert!(!operator.queue(QueueName::Images).await.unwrap().paused);
    }

    #[tokio::test]
    async fn test_unban_clears_persisted_ban() {
        let dir = TempDir::new().unwrap();
        let operator = open(&dir).await;
        assert!(!operator.unban().await.unwrap());

        operator
            .session
            .save_ban(&BanState {
                banned: true,
                origin: Some(BanOrigin::Udp),
                reason: Some("555 BANNED".to_string()),
                since: Some(Utc::now()),
            })
            .await
            .unwrap();
        assert!(operator.report().await.unwrap().ban.banned);

        assert!(operator.unban().await.unwrap());
        assert!(!operator.ban_state().await.unwrap().banned);
    }

    #[tokio::test]
    async fn test_clear_and_retry_on_empty_queue() {
        let dir = TempDir::new().unwrap();
        let operator = open(&dir).await;
        assert_eq!(operator.clear(QueueName::General).await.unwrap(), 0);
        assert_eq!(operator.retry(QueueName::General).await.unwrap(), 0);
        assert!(operator.failed(QueueName::General).await.unwrap().is_empty());
    }
}
