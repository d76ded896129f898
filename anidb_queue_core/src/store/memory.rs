//! In-process stores

use crate::Result;
use crate::commands::{CommandRequest, CommandStatus};
use crate::queue::{QueueCounts, QueueName};
use crate::store::records::{AniDbRecord, RecordKind, RecordStore};
use crate::store::CommandStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

fn dequeue_order(a: &CommandRequest, b: &CommandRequest) -> std::cmp::Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.date_due.cmp(&b.date_due))
        .then(a.id.cmp(&b.id))
}

#[derive(Default)]
struct Commands {
    next_id: i64,
    rows: BTreeMap<i64, CommandRequest>,
}

/// Command store kept in a map; contents are lost with the process
#[derive(Default)]
pub struct MemoryCommandStore {
    inner: Mutex<Commands>,
}

impl MemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Commands> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F>(&self, id: i64, f: F)
    where
        F: FnOnce(&mut CommandRequest),
    {
        if let Some(row) = self.lock().rows.get_mut(&id) {
            f(row);
        }
    }
}

#[async_trait]
impl CommandStore for MemoryCommandStore {
    async fn insert_if_absent(&self, request: &CommandRequest) -> Result<Option<i64>> {
        let mut commands = self.lock();
        let duplicate = commands
            .rows
            .values()
            .any(|row| row.identity == request.identity && row.status.is_active());
        if duplicate {
            return Ok(None);
        }

        commands.next_id += 1;
        let id = commands.next_id;
        let mut row = request.clone();
        row.id = id;
        row.status = CommandStatus::Pending;
        commands.rows.insert(id, row);
        Ok(Some(id))
    }

    async fn next_due(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<CommandRequest>> {
        Ok(self
            .lock()
            .rows
            .values()
            .filter(|row| {
                row.queue == queue && row.status == CommandStatus::Pending && row.date_due <= now
            })
            .min_by(|a, b| dequeue_order(a, b))
            .cloned())
    }

    async fn next_due_at(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .rows
            .values()
            .filter(|row| row.queue == queue && row.status == CommandStatus::Pending)
            .map(|row| row.date_due)
            .min())
    }

    async fn mark_running(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.update(id, |row| {
            row.status = CommandStatus::Running;
            row.updated_at = now;
        });
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
        self.update(id, |row| {
            row.status = CommandStatus::Pending;
            row.date_due = date_due;
            row.attempt_count = attempt_count;
            row.last_error = last_error.map(str::to_string);
            row.updated_at = now;
        });
        Ok(())
    }

    async fn complete(&self, id: i64) -> Result<()> {
        self.lock().rows.remove(&id);
        Ok(())
    }

    async fn fail(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.update(id, |row| {
            row.status = CommandStatus::Failed;
            row.last_error = Some(reason.to_string());
            row.updated_at = now;
        });
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<CommandRequest>> {
        Ok(self.lock().rows.get(&id).cloned())
    }

    async fn get_all(&self, queue: QueueName) -> Result<Vec<CommandRequest>> {
        let mut rows: Vec<_> = self
            .lock()
            .rows
            .values()
            .filter(|row| row.queue == queue)
            .cloned()
            .collect();
        rows.sort_by(dequeue_order);
        Ok(rows)
    }

    async fn failed(&self, queue: QueueName) -> Result<Vec<CommandRequest>> {
        Ok(self
            .get_all(queue)
            .await?
            .into_iter()
            .filter(|row| row.status == CommandStatus::Failed)
            .collect())
    }

    async fn requeue_failed(&self, queue: QueueName, now: DateTime<Utc>) -> Result<u64> {
        let mut commands = self.lock();
        let mut failed: Vec<i64> = commands
            .rows
            .values()
            .filter(|row| row.queue == queue && row.status == CommandStatus::Failed)
            .map(|row| row.id)
            .collect();
        // Newest first so the most recent failure of an identity is the one kept
        failed.sort_unstable_by(|a, b| b.cmp(a));

        let mut requeued = 0;
        for id in failed {
            let Some(identity) = commands.rows.get(&id).map(|row| row.identity.clone()) else {
                continue;
            };
            let active = commands
                .rows
                .values()
                .any(|row| row.identity == identity && row.status.is_active());
            if active {
                commands.rows.remove(&id);
                continue;
            }
            if let Some(row) = commands.rows.get_mut(&id) {
                row.status = CommandStatus::Pending;
                row.attempt_count = 0;
                row.date_due = now;
                row.updated_at = now;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.lock().rows.remove(&id).is_some())
    }

    async fn clear(&self, queue: QueueName) -> Result<u64> {
        let mut commands = self.lock();
        let before = commands.rows.len();
        commands
            .rows
            .retain(|_, row| row.queue != queue || row.status == CommandStatus::Running);
        Ok((before - commands.rows.len()) as u64)
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts> {
        let mut counts = QueueCounts::default();
        for row in self.lock().rows.values().filter(|row| row.queue == queue) {
            match row.status {
                CommandStatus::Pending => counts.pending += 1,
                CommandStatus::Running => counts.running += 1,
                CommandStatus::Failed => counts.failed += 1,
                CommandStatus::Completed => {}
            }
        }
        Ok(counts)
    }

    async fn reset_running(&self) -> Result<u64> {
        let mut reset = 0;
        for row in self.lock().rows.values_mut() {
            if row.status == CommandStatus::Running {
                row.status = CommandStatus::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

/// Record store kept in a map
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<(RecordKind, String), AniDbRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(RecordKind, String), AniDbRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<AniDbRecord>> {
        Ok(self.lock().get(&(kind, key.to_string())).cloned())
    }

    async fn save(&self, record: &AniDbRecord) -> Result<()> {
        self.lock()
            .insert((record.kind, record.key.clone()), record.clone());
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<bool> {
        Ok(self.lock().remove(&(kind, key.to_string())).is_some())
    }

    async fn get_all(&self, kind: RecordKind) -> Result<Vec<AniDbRecord>> {
        let mut records: Vec<_> = self
            .lock()
            .values()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}
