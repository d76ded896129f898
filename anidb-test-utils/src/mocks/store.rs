//! Command store with switchable failures

use anidb_queue_core::error::InternalError;
use anidb_queue_core::store::MemoryCommandStore;
use anidb_queue_core::{CommandRequest, CommandStore, QueueCounts, QueueName, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// [`MemoryCommandStore`] whose operations can be made to fail
///
/// Failures surface as database errors, which the processors treat as
/// fatal.
#[derive(Default)]
pub struct FaultyCommandStore {
    inner: MemoryCommandStore,
    failing: AtomicBool,
    fail_completions: AtomicBool,
    failures: AtomicUsize,
}

impl FaultyCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation while set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only `complete`, leaving commands stuck in running
    pub fn set_fail_completions(&self, failing: bool) {
        self.fail_completions.store(failing, Ordering::SeqCst);
    }

    /// Number of injected failures so far
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryCommandStore {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(InternalError::database("injected store failure").into());
        }
        Ok(())
    }
}

#[async_trait]
impl CommandStore for FaultyCommandStore {
    async fn insert_if_absent(&self, request: &CommandRequest) -> Result<Option<i64>> {
        self.check()?;
        self.inner.insert_if_absent(request).await
    }

    async fn next_due(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<CommandRequest>> {
        self.check()?;
        self.inner.next_due(queue, now).await
    }

    async fn next_due_at(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>> {
        self.check()?;
        self.inner.next_due_at(queue).await
    }

    async fn mark_running(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.mark_running(id, now).await
    }

    async fn reschedule(
        &self,
        id: i64,
        date_due: DateTime<Utc>,
        attempt_count: u32,
        last_error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check()?;
        self.inner
            .reschedule(id, date_due, attempt_count, last_error, now)
            .await
    }

    async fn complete(&self, id: i64) -> Result<()> {
        self.check()?;
        if self.fail_completions.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(InternalError::database("injected completion failure").into());
        }
        self.inner.complete(id).await
    }

    async fn fail(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.fail(id, reason, now).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<CommandRequest>> {
        self.check()?;
        self.inner.get_by_id(id).await
    }

    async fn get_all(&self, queue: QueueName) -> Result<Vec<CommandRequest>> {
        self.check()?;
        self.inner.get_all(queue).await
    }

    async fn failed(&self, queue: QueueName) -> Result<Vec<CommandRequest>> {
        self.check()?;
        self.inner.failed(queue).await
    }

    async fn requeue_failed(&self, queue: QueueName, now: DateTime<Utc>) -> Result<u64> {
        self.check()?;
        self.inner.requeue_failed(queue, now).await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn clear(&self, queue: QueueName) -> Result<u64> {
        self.check()?;
        self.inner.clear(queue).await
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts> {
        self.check()?;
        self.inner.counts(queue).await
    }

    async fn reset_running(&self) -> Result<u64> {
        self.check()?;
        self.inner.reset_running().await
    }
}
