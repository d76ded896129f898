//! Storage seams used by the queues and commands
//!
//! The queues only need the operations below; [`memory`] backs tests and
//! short-lived tools, `database` provides the SQLite implementations.

pub mod memory;
pub mod records;

pub use memory::{MemoryCommandStore, MemoryRecordStore};
pub use records::{AniDbRecord, RecordKind, RecordStore};

use crate::Result;
use crate::commands::CommandRequest;
use crate::queue::{QueueCounts, QueueName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistent backlog for all named queues, partitioned by queue name
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Insert unless a pending or running command has the same identity.
    /// Returns the new row id, or `None` for a duplicate.
    async fn insert_if_absent(&self, request: &CommandRequest) -> Result<Option<i64>>;

    /// Most urgent pending command due at `now`: priority, then due date, then insertion
    async fn next_due(&self, queue: QueueName, now: DateTime<Utc>)
    -> Result<Option<CommandRequest>>;

    /// Earliest due date among pending commands
    async fn next_due_at(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>>;

    async fn mark_running(&self, id: i64, now: DateTime<Utc>) -> Result<()>;

    /// Back to pending with a new due date
    async fn reschedule(
        &self,
        id: i64,
        date_due: DateTime<Utc>,
        attempt_count: u32,
        last_error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove a finished command
    async fn complete(&self, id: i64) -> Result<()>;

    async fn fail(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<()>;

    async fn get_by_id(&self, id: i64) -> Result<Option<CommandRequest>>;

    /// Every stored command of a queue in dequeue order
    async fn get_all(&self, queue: QueueName) -> Result<Vec<CommandRequest>>;

    async fn failed(&self, queue: QueueName) -> Result<Vec<CommandRequest>>;

    /// Failed commands become pending again with a fresh attempt count
    async fn requeue_failed(&self, queue: QueueName, now: DateTime<Utc>) -> Result<u64>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Drop pending and failed commands; a running one is left to finish
    async fn clear(&self, queue: QueueName) -> Result<u64>;

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts>;

    /// Crash recovery: running rows left by a previous process become pending
    async fn reset_running(&self) -> Result<u64>;
}
