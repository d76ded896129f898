//! Process-wide entry point for producers and operators

use crate::Result;
use crate::commands::{CommandContext, CommandExecutor, CommandKind, CommandRequest, CommandRouter};
use crate::config::QueueConfig;
use crate::protocol::SessionSignals;
use crate::queue::processor::{ProcessorSettings, QueueProcessor};
use crate::queue::{QueueCounts, QueueEvent, QueueName, QueueStatus};
use futures::future::join_all;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of adding a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// Persisted under this row id
    Queued(i64),
    /// A command with the same identity is pending or running
    AlreadyQueued,
}

impl AddResult {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Routes commands to their named queue and controls the processors
pub struct QueueRegistry {
    router: CommandRouter,
    processors: BTreeMap<QueueName, QueueProcessor>,
}

impl QueueRegistry {
    pub fn new(router: CommandRouter, processors: impl IntoIterator<Item = QueueProcessor>) -> Self {
        let processors = processors
            .into_iter()
            .map(|processor| (processor.queue(), processor))
            .collect();
        Self { router, processors }
    }

    /// One processor per named queue, all sharing `executor`
    pub fn with_executor(
        router: CommandRouter,
        executor: Arc<dyn CommandExecutor>,
        config: &QueueConfig,
        session: Option<SessionSignals>,
    ) -> Self {
        let processors: Vec<_> = QueueName::ALL
            .into_iter()
            .map(|queue| {
                QueueProcessor::new(
                    ProcessorSettings::from_config(queue, config),
                    router.clone(),
                    executor.clone(),
                    session.clone(),
                )
            })
            .collect();
        Self::new(router, processors)
    }

    /// Registry running the built-in commands; bans and back-off come from
    /// the context's client
    pub fn from_context(context: CommandContext, config: &QueueConfig) -> Self {
        let router = context.router.clone();
        let session = Some(context.client.guard().subscribe());
        let executor = Arc::new(crate::commands::DefaultExecutor::new(context));
        Self::with_executor(router, executor, config, session)
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn processor(&self, queue: QueueName) -> Option<&QueueProcessor> {
        self.processors.get(&queue)
    }

    /// Sole enqueue entry point; duplicates of an active identity are dropped
    pub async fn add(&self, request: CommandRequest) -> Result<AddResult> {
        self.router.add(request).await
    }

    pub async fn enqueue(&self, kind: CommandKind) -> Result<AddResult> {
        self.router.enqueue(kind).await
    }

    pub async fn add_all(
        &self,
        requests: impl IntoIterator<Item = CommandRequest>,
    ) -> Result<Vec<AddResult>> {
        let mut results = Vec::new();
        for request in requests {
            results.push(self.add(request).await?);
        }
        Ok(results)
    }

    pub fn start_all(&self) {
        for processor in self.processors.values() {
            processor.start();
        }
    }

    /// Let every in-flight command finish, then stop all loops
    pub async fn stop_all(&self) {
        join_all(self.processors.values().map(QueueProcessor::stop)).await;
    }

    pub fn pause(&self, queue: QueueName) {
        if let Some(processor) = self.processors.get(&queue) {
            processor.pause();
        }
    }

    pub fn resume(&self, queue: QueueName) {
        if let Some(processor) = self.processors.get(&queue) {
            processor.resume();
        }
    }

    pub fn pause_all(&self) {
        self.processors.values().for_each(QueueProcessor::pause);
    }

    pub fn resume_all(&self) {
        self.processors.values().for_each(QueueProcessor::resume);
    }

    pub fn is_paused(&self, queue: QueueName) -> bool {
        self.processors
            .get(&queue)
            .is_some_and(QueueProcessor::is_paused)
    }

    /// Drop pending and failed commands of a queue
    pub async fn clear(&self, queue: QueueName) -> Result<u64> {
        let removed = self.router.store().clear(queue).await?;
        info!("Cleared {removed} commands from {queue}");
        self.router.publish_counts(queue).await?;
        Ok(removed)
    }

    pub async fn counts(&self, queue: QueueName) -> Result<QueueCounts> {
        self.router.store().counts(queue).await
    }

    pub async fn status(&self, queue: QueueName) -> Result<QueueStatus> {
        let counts = self.counts(queue).await?;
        let processor = self.processors.get(&queue);

        Ok(QueueStatus {
            name: queue,
            paused: processor.is_some_and(QueueProcessor::is_paused),
            paused_by_ban: processor.is_some_and(QueueProcessor::is_paused_by_ban),
            running: processor.is_some_and(QueueProcessor::is_running),
            state: processor
                .map(QueueProcessor::state)
                .unwrap_or(crate::queue::QueueState::Stopped),
            counts,
        })
    }

    pub async fn statuses(&self) -> Result<Vec<QueueStatus>> {
        let mut statuses = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            statuses.push(self.status(queue).await?);
        }
        Ok(statuses)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.router.subscribe()
    }

    pub async fn failed(&self, queue: QueueName) -> Result<Vec<CommandRequest>> {
        self.router.store().failed(queue).await
    }

    /// Make failed commands eligible again
    pub async fn retry_failed(&self, queue: QueueName) -> Result<u64> {
        let requeued = self
            .router
            .store()
            .requeue_failed(queue, self.router.now())
            .await?;
        if requeued > 0 {
            info!("Requeued {requeued} failed commands on {queue}");
            self.router.wake(queue);
        }
        self.router.publish_counts(queue).await?;
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::commands::CommandOutcome;
    use crate::queue::QueueState;
    use crate::store::MemoryCommandStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandExecutor for Recorder {
        async fn execute(&self, request: &CommandRequest) -> Result<CommandOutcome> {
            self.seen.lock().unwrap().push(request.identity.clone());
            if request.identity.starts_with("VoteAnime") {
                return Ok(CommandOutcome::failed("362 INVALID VOTE VALUE"));
            }
            Ok(CommandOutcome::Completed)
        }
    }

    fn registry(executor: Arc<Recorder>) -> QueueRegistry {
        let router = CommandRouter::new(
            Arc::new(MemoryCommandStore::new()),
            Arc::new(MonotonicClock::new()),
        );
        QueueRegistry::with_executor(router, executor, &QueueConfig::default(), None)
    }

    fn anime(aid: u32) -> CommandKind {
        CommandKind::GetAnimeHttp {
            anime_id: aid,
            force_refresh: false,
        }
    }

    #[tokio::test]
    async fn test_duplicate_add_is_noop() {
        let registry = registry(Arc::new(Recorder::default()));
        let now = registry.router().now();

        let first = CommandRequest::new(anime(100), now).with_priority(1);
        let second = CommandRequest::new(anime(100), now).with_priority(2);
        let results = registry.add_all([first, second]).await.unwrap();

        assert!(results[0].is_queued());
        assert_eq!(results[1], AddResult::AlreadyQueued);
        assert_eq!(registry.counts(QueueName::General).await.unwrap().pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_routes_to_named_queues_and_reports_status() {
        let recorder = Arc::new(Recorder::default());
        let registry = registry(recorder.clone());
        registry.pause_all();
        registry.start_all();

        registry.enqueue(anime(1)).await.unwrap();
        registry
            .enqueue(CommandKind::DownloadImage {
                url: "https://cdn.anidb.net/images/main/1.jpg".to_string(),
            })
            .await
            .unwrap();

        let statuses = registry.statuses().await.unwrap();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0].name, QueueName::General);
        assert_eq!(statuses[0].counts.pending, 1);
        assert_eq!(statuses[1].counts.pending, 0);
        assert_eq!(statuses[2].counts.pending, 1);
        assert!(statuses.iter().all(|s| s.paused && s.running));

        registry.resume(QueueName::Images);
        let mut state = registry.processor(QueueName::Images).unwrap().subscribe_state();
        state.wait_for(|s| *s == QueueState::Idle).await.unwrap();
        while registry.counts(QueueName::Images).await.unwrap().backlog() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(registry.counts(QueueName::General).await.unwrap().pending, 1);

        registry.stop_all().await;
        let status = registry.status(QueueName::General).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.state, QueueState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_retry_failed() {
        let recorder = Arc::new(Recorder::default());
        let registry = registry(recorder.clone());
        let mut events = registry.subscribe();
        registry.start_all();

        registry
            .enqueue(CommandKind::VoteAnime {
                anime_id: 1,
                value: 2000,
            })
            .await
            .unwrap();
        while registry.failed(QueueName::General).await.unwrap().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            QueueEvent::CountChanged { .. } | QueueEvent::StateChanged { .. }
        ));

        registry.pause(QueueName::General);
        assert_eq!(registry.retry_failed(QueueName::General).await.unwrap(), 1);
        assert_eq!(registry.counts(QueueName::General).await.unwrap().pending, 1);
        assert_eq!(registry.clear(QueueName::General).await.unwrap(), 1);
        assert_eq!(
            registry.counts(QueueName::General).await.unwrap(),
            QueueCounts::default()
        );
        registry.stop_all().await;
    }
}
