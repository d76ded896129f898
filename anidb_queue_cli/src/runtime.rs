//! The long-running queue service behind `anidb-queue run`

use crate::config::AppConfig;
use anidb_queue_core::commands::Ed2kHasher;
use anidb_queue_core::database::{Database, SessionStateRepository};
use anidb_queue_core::protocol::{
    AniDbClient, AniDbHttpClient, BanState, ClientSettings, GuardSettings, KeepAlive,
    SessionGuard, UdpTransport,
};
use anidb_queue_core::{
    CommandContext, CommandRouter, CommandStore, QueueName, QueueRegistry, SharedClock,
    SystemClock,
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// How often persisted operator changes are applied to the running queues
pub const CONTROL_SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// Mirrors operator state between the database and the live service
///
/// One-shot commands only touch the database. This picks up their rows,
/// pause flags and manual unbans, and persists ban changes the guard makes.
pub struct ControlSync {
    session: SessionStateRepository,
    persisted_ban: BanState,
}

impl ControlSync {
    pub fn new(session: SessionStateRepository, persisted_ban: BanState) -> Self {
        Self {
            session,
            persisted_ban,
        }
    }

    pub async fn sync(
        &mut self,
        registry: &QueueRegistry,
        guard: &SessionGuard,
    ) -> anidb_queue_core::Result<()> {
        for queue in QueueName::ALL {
            registry.router().wake(queue);
        }

        let flags = self.session.paused_queues().await?;
        for queue in QueueName::ALL {
            let paused = flags.get(&queue).copied().unwrap_or(false);
            if paused != registry.is_paused(queue) {
                if paused {
                    registry.pause(queue);
                } else {
                    registry.resume(queue);
                }
            }
        }

        let stored = self.session.load_ban().await?.unwrap_or_default();
        if stored != self.persisted_ban && !stored.banned && guard.is_banned() {
            guard.unban("cleared by operator");
        }

        let live = guard.ban_state();
        if live != self.persisted_ban {
            debug!("Persisting ban state: banned={}", live.banned);
            self.session.save_ban(&live).await?;
            self.persisted_ban = live;
        }
        Ok(())
    }
}

/// Run every queue until Ctrl-C, then shut down cooperatively
pub async fn run(config: AppConfig) -> Result<()> {
    config.validate()?;

    let db_path = config.storage.database_path();
    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Using database {}", db_path.display());

    let store: Arc<dyn CommandStore> = Arc::new(db.command_store());
    let reset = store.reset_running().await?;
    if reset > 0 {
        info!("Reset {reset} interrupted commands to pending");
    }

    let session = db.session_state();
    for queue in QueueName::ALL {
        if config.queues.options(queue).start_paused {
            session.set_paused(queue, true).await?;
        }
    }

    let clock: SharedClock = Arc::new(SystemClock);
    let guard = Arc::new(SessionGuard::new(
        GuardSettings::from_config(&config.anidb, &config.session),
        clock.clone(),
    ));
    let persisted_ban = session.load_ban().await?.unwrap_or_default();
    guard.restore_ban(persisted_ban.clone());

    if config.anidb.credentials().is_none() {
        warn!("No AniDB credentials configured; set anidb.username and anidb.password");
    }

    let transport = UdpTransport::connect(&config.anidb.server, config.anidb.local_port)
        .await
        .with_context(|| format!("Failed to open UDP socket to {}", config.anidb.server))?;
    let client = AniDbClient::spawn(
        transport,
        guard.clone(),
        ClientSettings::from_config(&config.anidb),
    );
    let http = AniDbHttpClient::new(&config.anidb, guard.clone())
        .context("Failed to build HTTP client")?;

    let images_dir = config.storage.images_dir();
    tokio::fs::create_dir_all(&images_dir)
        .await
        .with_context(|| format!("Failed to create {}", images_dir.display()))?;

    let router = CommandRouter::new(store, clock.clone());
    let context = CommandContext {
        client: client.clone(),
        http: Arc::new(http),
        hasher: Arc::new(Ed2kHasher),
        records: Arc::new(db.record_store()),
        images_dir,
        clock,
        router,
    };
    let registry = QueueRegistry::from_context(context, &config.queues);

    let mut control = ControlSync::new(session, persisted_ban);
    control.sync(&registry, &guard).await?;

    let cancel = CancellationToken::new();
    let keepalive = KeepAlive::spawn(client.clone(), config.session.tick_interval(), cancel);
    registry.start_all();
    info!("Queue service running; press Ctrl-C to stop");

    let mut ticker = interval(CONTROL_SYNC_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down; waiting for in-flight commands");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = control.sync(&registry, &guard).await {
                    warn!("Control sync failed: {e}");
                }
            }
        }
    }

    registry.stop_all().await;
    keepalive.shutdown().await;
    client.close().await;
    if let Err(e) = control.sync(&registry, &guard).await {
        warn!("Failed to persist final session state: {e}");
    }
    db.close().await;
    info!("Queue service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anidb_queue_core::protocol::BanOrigin;
    use anidb_queue_core::{
        CommandExecutor, CommandOutcome, CommandRequest, MonotonicClock, QueueConfig,
    };
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Noop;

    #[async_trait]
    impl CommandExecutor for Noop {
        async fn execute(&self, _: &CommandRequest) -> anidb_queue_core::Result<CommandOutcome> {
            Ok(CommandOutcome::Completed)
        }
    }

    struct Fixture {
        _dir: TempDir,
        db: Database,
        guard: SessionGuard,
        registry: QueueRegistry,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("queue.db")).await.unwrap();
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let guard = SessionGuard::new(GuardSettings::default(), clock.clone());
        let router = CommandRouter::new(Arc::new(db.command_store()), clock);
        let registry =
            QueueRegistry::with_executor(router, Arc::new(Noop), &QueueConfig::default(), None);
        Fixture {
            _dir: dir,
            db,
            guard,
            registry,
        }
    }

    #[tokio::test]
    async fn test_persisted_pause_flags_are_applied() {
        let f = fixture().await;
        let mut control = ControlSync::new(f.db.session_state(), BanState::default());

        f.db.session_state()
            .set_paused(QueueName::Hasher, true)
            .await
            .unwrap();
        control.sync(&f.registry, &f.guard).await.unwrap();
        assert!(f.registry.is_paused(QueueName::Hasher));
        assert!(!f.registry.is_paused(QueueName::General));

        f.db.session_state()
            .set_paused(QueueName::Hasher, false)
            .await
            .unwrap();
        control.sync(&f.registry, &f.guard).await.unwrap();
        assert!(!f.registry.is_paused(QueueName::Hasher));
    }

    #[tokio::test]
    async fn test_guard_ban_is_persisted() {
        let f = fixture().await;
        let mut control = ControlSync::new(f.db.session_state(), BanState::default());

        f.guard.set_banned(BanOrigin::Udp, "555 BANNED");
        control.sync(&f.registry, &f.guard).await.unwrap();

        let stored = f.db.session_state().load_ban().await.unwrap().unwrap();
        assert!(stored.banned);
        assert_eq!(stored.origin, Some(BanOrigin::Udp));
    }

    #[tokio::test]
    async fn test_operator_unban_lifts_live_ban() {
        let f = fixture().await;
        let mut control = ControlSync::new(f.db.session_state(), BanState::default());
        f.guard.set_banned(BanOrigin::Http, "banned");
        control.sync(&f.registry, &f.guard).await.unwrap();

        // What `anidb-queue unban` writes
        f.db.session_state()
            .save_ban(&BanState::default())
            .await
            .unwrap();
        control.sync(&f.registry, &f.guard).await.unwrap();

        assert!(!f.guard.is_banned());
        let stored = f.db.session_state().load_ban().await.unwrap().unwrap();
        assert!(!stored.banned);

        // A later sync with no changes leaves the guard alone
        control.sync(&f.registry, &f.guard).await.unwrap();
        assert!(!f.guard.is_banned());
    }
}
