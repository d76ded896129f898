#![cfg(feature = "database")]

//! SQLite persistence across process restarts

mod common;

use anidb_queue_core::database::Database;
use anidb_queue_core::protocol::{BanOrigin, BanState};
use anidb_queue_core::{
    CommandKind, CommandRouter, CommandStatus, CommandStore, MonotonicClock, QueueConfig,
    QueueName, QueueRegistry,
};
use anidb_test_utils::{CommandBuilder, RecordingExecutor};
use chrono::Utc;
use common::wait_until_drained;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn registry(db: &Database, executor: Arc<RecordingExecutor>) -> QueueRegistry {
    let router = CommandRouter::new(
        Arc::new(db.command_store()),
        Arc::new(MonotonicClock::new()),
    );
    QueueRegistry::with_executor(router, executor, &QueueConfig::default(), None)
}

async fn open(dir: &TempDir) -> Database {
    Database::new(&dir.path().join("queue.db")).await.unwrap()
}

#[tokio::test]
async fn test_commands_survive_restart() {
    let dir = TempDir::new().unwrap();

    {
        let db = open(&dir).await;
        let registry = registry(&db, Arc::new(RecordingExecutor::new()));
        let now = Utc::now();
        for group_id in [1, 2, 3] {
            let request = CommandBuilder::new(CommandKind::GetReleaseGroup { group_id })
                .at(now)
                .priority(group_id as i32)
                .build();
            registry.add(request).await.unwrap();
        }

        // Simulate a crash while the first command was executing
        let store = db.command_store();
        let first = store
            .next_due(QueueName::General, Utc::now())
            .await
            .unwrap()
            .unwrap();
        store.mark_running(first.id, Utc::now()).await.unwrap();
        db.close().await;
    }

    let db = open(&dir).await;
    let store = db.command_store();
    assert_eq!(store.reset_running().await.unwrap(), 1);
    let pending = store.get_all(QueueName::General).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|c| c.status == CommandStatus::Pending));

    let executor = Arc::new(RecordingExecutor::new());
    let registry = registry(&db, executor.clone());
    registry.start_all();
    wait_until_drained(&registry).await;
    registry.stop_all().await;

    assert_eq!(
        executor.executed(),
        vec![
            "GetReleaseGroup:1".to_string(),
            "GetReleaseGroup:2".to_string(),
            "GetReleaseGroup:3".to_string(),
        ]
    );
    assert_eq!(db.stats().await.unwrap().command_count, 0);
}

#[tokio::test]
async fn test_dedup_holds_across_restart() {
    let dir = TempDir::new().unwrap();
    let kind = CommandKind::GetAnimeHttp {
        anime_id: 100,
        force_refresh: false,
    };

    {
        let db = open(&dir).await;
        let registry = registry(&db, Arc::new(RecordingExecutor::new()));
        assert!(registry.enqueue(kind.clone()).await.unwrap().is_queued());
        db.close().await;
    }

    let db = open(&dir).await;
    let registry = registry(&db, Arc::new(RecordingExecutor::new()));
    assert!(!registry.enqueue(kind).await.unwrap().is_queued());
    assert_eq!(registry.counts(QueueName::General).await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_session_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let ban = BanState {
        banned: true,
        origin: Some(BanOrigin::Udp),
        reason: Some("555 BANNED".to_string()),
        since: Some(Utc::now()),
    };

    {
        let db = open(&dir).await;
        let session = db.session_state();
        session.save_ban(&ban).await.unwrap();
        session.set_paused(QueueName::Hasher, true).await.unwrap();
        db.close().await;
    }

    let db = open(&dir).await;
    let session = db.session_state();
    assert_eq!(session.load_ban().await.unwrap(), Some(ban));
    assert!(session.is_paused(QueueName::Hasher).await.unwrap());
    assert!(!session.is_paused(QueueName::General).await.unwrap());
}

#[tokio::test]
async fn test_database_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("queue.db");
    let db = Database::new(&path).await.unwrap();

    assert!(Path::new(&path).exists());
    let stats = db.stats().await.unwrap();
    assert_eq!(stats.command_count, 0);
    assert_eq!(stats.record_count, 0);
}
