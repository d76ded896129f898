//! Execution context, follow-up routing and the executor seam

use crate::Result;
use crate::clock::SharedClock;
use crate::commands::hasher::FileHasher;
use crate::commands::kind::CommandKind;
use crate::commands::{CommandOutcome, CommandRequest, anime, file, image, mylist};
use crate::protocol::{AniDbClient, HttpApi};
use crate::queue::{AddResult, QueueEvent, QueueName};
use crate::store::{CommandStore, RecordStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Notify, broadcast};

const EVENT_CAPACITY: usize = 256;

/// Routes new commands to the store and wakes the owning queue
///
/// Shared by the registry and by running commands that enqueue follow-ups.
#[derive(Clone)]
pub struct CommandRouter {
    store: Arc<dyn CommandStore>,
    wakers: Arc<HashMap<QueueName, Arc<Notify>>>,
    events: broadcast::Sender<QueueEvent>,
    clock: SharedClock,
}

impl CommandRouter {
    pub fn new(store: Arc<dyn CommandStore>, clock: SharedClock) -> Self {
        let wakers = QueueName::ALL
            .into_iter()
            .map(|queue| (queue, Arc::new(Notify::new())))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            store,
            wakers: Arc::new(wakers),
            events,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn CommandStore> {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn waker(&self, queue: QueueName) -> Arc<Notify> {
        self.wakers
            .get(&queue)
            .cloned()
            .unwrap_or_else(|| Arc::new(Notify::new()))
    }

    /// Wake the processor of `queue` so it re-reads the store
    pub fn wake(&self, queue: QueueName) {
        if let Some(waker) = self.wakers.get(&queue) {
            waker.notify_one();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) async fn publish_counts(&self, queue: QueueName) -> Result<()> {
        let counts = self.store.counts(queue).await?;
        self.publish(QueueEvent::CountChanged { queue, counts });
        Ok(())
    }

    /// Persist `request` unless its identity is already pending or running
    pub async fn add(&self, request: CommandRequest) -> Result<AddResult> {
        let queue = request.queue;
        match self.store.insert_if_absent(&request).await? {
            Some(id) => {
                debug!("Queued {} on {queue} as #{id}", request.identity);
                self.wake(queue);
                self.publish_counts(queue).await?;
                Ok(AddResult::Queued(id))
            }
            None => {
                debug!("{} is already queued", request.identity);
                Ok(AddResult::AlreadyQueued)
            }
        }
    }

    /// Queue a kind with its default priority, due now
    pub async fn enqueue(&self, kind: CommandKind) -> Result<AddResult> {
        self.add(CommandRequest::new(kind, self.now())).await
    }
}

/// Collaborators reachable from a running command
#[derive(Clone)]
pub struct CommandContext {
    pub client: AniDbClient,
    pub http: Arc<dyn HttpApi>,
    pub hasher: Arc<dyn FileHasher>,
    pub records: Arc<dyn RecordStore>,
    pub images_dir: PathBuf,
    pub clock: SharedClock,
    pub router: CommandRouter,
}

impl CommandContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Queue a follow-up command
    pub async fn enqueue(&self, kind: CommandKind) -> Result<AddResult> {
        self.router.enqueue(kind).await
    }
}

/// Runs one command to an outcome
///
/// `Err` is reserved for failures of the local stores; expected remote
/// results are expressed through [`CommandOutcome`].
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutcome>;
}

/// Executes the built-in command kinds against a [`CommandContext`]
pub struct DefaultExecutor {
    context: CommandContext,
}

impl DefaultExecutor {
    pub fn new(context: CommandContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }
}

#[async_trait]
impl CommandExecutor for DefaultExecutor {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutcome> {
        let ctx = &self.context;
        match &request.kind {
            CommandKind::GetAnimeHttp {
                anime_id,
                force_refresh,
            } => anime::get_anime_http(ctx, *anime_id, *force_refresh).await,
            CommandKind::VoteAnime { anime_id, value } => {
                anime::vote_anime(ctx, *anime_id, *value).await
            }
            CommandKind::GetFile { size, ed2k } => file::get_file(ctx, *size, ed2k).await,
            CommandKind::HashFile { path } => file::hash_file(ctx, path).await,
            CommandKind::GetReleaseGroup { group_id } => {
                file::get_release_group(ctx, *group_id).await
            }
            CommandKind::AddFileToMyList {
                size,
                ed2k,
                watched,
            } => mylist::add_file(ctx, *size, ed2k, *watched).await,
            CommandKind::UpdateMyListFileStatus {
                size,
                ed2k,
                watched,
            } => mylist::update_file_status(ctx, *size, ed2k, *watched).await,
            CommandKind::DeleteFileFromMyList { size, ed2k } => {
                mylist::delete_file(ctx, *size, ed2k).await
            }
            CommandKind::DownloadImage { url } => image::download_image(ctx, url).await,
        }
    }
}
