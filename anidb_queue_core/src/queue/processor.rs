//! Single-lane execution loop for one named queue
//!
//! A processor runs at most one command at a time. Between commands it
//! checks, in order: cancellation, the operator pause flag, and (for queues
//! that pause on ban) the shared ban state and the server's back-off window.
//! With nothing due it waits for an enqueue, a pause, ban or back-off change,
//! or the earliest delayed due date.

use crate::Result;
use crate::clock::chrono_duration;
use crate::commands::{
    CommandContext, CommandExecutor, CommandOutcome, CommandRequest, CommandRouter,
};
use crate::config::{PanicPolicy, QueueConfig};
use crate::error::Error;
use crate::protocol::SessionSignals;
use crate::queue::{QueueEvent, QueueName, QueueState};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Per-queue loop settings
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub queue: QueueName,
    pub pauses_on_ban: bool,
    pub start_paused: bool,
    pub max_attempts: u32,
    pub panic_policy: PanicPolicy,
    retry: QueueConfig,
}

impl ProcessorSettings {
    pub fn from_config(queue: QueueName, config: &QueueConfig) -> Self {
        let options = config.options(queue);
        Self {
            queue,
            pauses_on_ban: options.pauses_on_ban,
            start_paused: options.start_paused,
            max_attempts: config.max_attempts.max(1),
            panic_policy: config.panic_policy,
            retry: config.clone(),
        }
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry.retry_delay(attempt)
    }
}

struct Shared {
    settings: ProcessorSettings,
    router: CommandRouter,
    executor: Arc<dyn CommandExecutor>,
    session: Option<SessionSignals>,
    paused: watch::Sender<bool>,
    state: watch::Sender<QueueState>,
}

impl Shared {
    fn queue(&self) -> QueueName {
        self.settings.queue
    }

    fn is_banned(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.ban.borrow().banned)
    }

    /// End of the server's back-off window, while it lasts
    fn backoff_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let session = self.session.as_ref()?;
        let until = session.pause.borrow().as_ref()?.until;
        (until > now).then_some(until)
    }

    fn set_state(&self, state: QueueState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            debug!("[{}] {state}", self.queue());
            self.router.publish(QueueEvent::StateChanged {
                queue: self.queue(),
                state,
            });
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle to one queue's loop
pub struct QueueProcessor {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl QueueProcessor {
    /// `session` comes from the session guard; `None` ignores bans and
    /// back-off entirely
    pub fn new(
        settings: ProcessorSettings,
        router: CommandRouter,
        executor: Arc<dyn CommandExecutor>,
        session: Option<SessionSignals>,
    ) -> Self {
        let (paused, _) = watch::channel(settings.start_paused);
        let (state, _) = watch::channel(QueueState::Stopped);

        Self {
            shared: Arc::new(Shared {
                settings,
                router,
                executor,
                session,
                paused,
                state,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Build a processor running the built-in commands
    pub fn with_context(
        settings: ProcessorSettings,
        context: CommandContext,
        session: Option<SessionSignals>,
    ) -> Self {
        let router = context.router.clone();
        let executor = Arc::new(crate::commands::DefaultExecutor::new(context));
        Self::new(settings, router, executor, session)
    }

    pub fn queue(&self) -> QueueName {
        self.shared.queue()
    }

    fn worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the loop; returns `false` when it is already running
    pub fn start(&self) -> bool {
        let mut worker = self.worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(self.shared.clone(), cancel.clone()));
        *worker = Some(Worker { cancel, handle });
        info!("[{}] processor started", self.queue());
        true
    }

    /// Stop after the in-flight command, if any, has finished
    pub async fn stop(&self) {
        let worker = self.worker().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                error!("[{}] processor task failed: {e}", self.queue());
            }
            info!("[{}] processor stopped", self.queue());
        }
    }

    pub fn pause(&self) {
        if !self.shared.paused.send_replace(true) {
            info!("[{}] paused", self.queue());
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.send_replace(false) {
            info!("[{}] resumed", self.queue());
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    /// Whether an active ban currently holds this queue
    pub fn is_paused_by_ban(&self) -> bool {
        self.shared.settings.pauses_on_ban && self.shared.is_banned()
    }

    pub fn is_running(&self) -> bool {
        self.worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn state(&self) -> QueueState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<QueueState> {
        self.shared.state.subscribe()
    }
}

/// Resolves when the watched value changes; never once it is ignored
async fn changed<T>(rx: &mut Option<watch::Receiver<T>>) {
    let closed = match rx.as_mut() {
        Some(rx) => rx.changed().await.is_err(),
        None => std::future::pending().await,
    };
    if closed {
        *rx = None;
    }
}

async fn sleep_until_due(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let queue = shared.queue();
    let mut paused = shared.paused.subscribe();
    let (mut ban, mut backoff) = match &shared.session {
        Some(session) if shared.settings.pauses_on_ban => {
            (Some(session.ban.clone()), Some(session.pause.clone()))
        }
        _ => (None, None),
    };
    let waker = shared.router.waker(queue);
    shared.set_state(QueueState::Idle);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if *paused.borrow_and_update() {
            shared.set_state(QueueState::Paused);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = paused.changed() => continue,
            }
        }

        let banned = ban.as_mut().is_some_and(|rx| rx.borrow_and_update().banned);
        if banned {
            shared.set_state(QueueState::WaitingOnBan);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = paused.changed() => continue,
                _ = changed(&mut ban) => continue,
            }
        }

        let window = backoff
            .as_mut()
            .and_then(|rx| rx.borrow_and_update().as_ref().map(|p| p.until));
        let now = shared.router.now();
        if let Some(until) = window.filter(|until| *until > now) {
            shared.set_state(QueueState::BackingOff { until });
            let remaining = (until - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = paused.changed() => continue,
                _ = changed(&mut ban) => continue,
                _ = changed(&mut backoff) => continue,
                _ = tokio::time::sleep(remaining) => continue,
            }
        }

        let store = shared.router.store();
        let next = match store.next_due(queue, shared.router.now()).await {
            Ok(next) => next,
            Err(e) => return fault(&shared, e),
        };
        if let Some(request) = next {
            if let Err(e) = process(&shared, request).await {
                return fault(&shared, e);
            }
            continue;
        }

        shared.set_state(QueueState::Idle);
        let delay = match store.next_due_at(queue).await {
            Ok(due) => due.map(|due| (due - shared.router.now()).to_std().unwrap_or_default()),
            Err(e) => return fault(&shared, e),
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = waker.notified() => {}
            _ = paused.changed() => {}
            _ = changed(&mut ban) => {}
            _ = changed(&mut backoff) => {}
            _ = sleep_until_due(delay) => {}
        }
    }

    shared.set_state(QueueState::Stopped);
}

fn fault(shared: &Shared, e: Error) {
    error!(
        "[{}] command store failed, stopping the queue: {e}",
        shared.queue()
    );
    shared.set_state(QueueState::Faulted {
        reason: e.to_string(),
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn process(shared: &Shared, request: CommandRequest) -> Result<()> {
    let queue = shared.queue();
    let store = shared.router.store();

    store.mark_running(request.id, shared.router.now()).await?;
    shared.set_state(QueueState::Running {
        identity: request.identity.clone(),
        description: request.description(),
    });
    shared.router.publish_counts(queue).await?;
    info!("[{queue}] {}", request.description());

    let result = AssertUnwindSafe(shared.executor.execute(&request))
        .catch_unwind()
        .await;
    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) if e.is_persistence() => return Err(e),
        Ok(Err(e @ (Error::Io(_) | Error::Protocol(_)))) => CommandOutcome::retry(e.to_string()),
        Ok(Err(e)) => CommandOutcome::failed(e.to_string()),
        Err(panic) => {
            let message = format!("panicked: {}", panic_message(panic.as_ref()));
            error!("[{queue}] {} {message}", request.identity);
            match shared.settings.panic_policy {
                PanicPolicy::Retry => CommandOutcome::retry(message),
                PanicPolicy::Fail => CommandOutcome::failed(message),
            }
        }
    };

    apply_outcome(shared, &request, outcome).await?;
    shared.router.publish_counts(queue).await
}

async fn apply_outcome(
    shared: &Shared,
    request: &CommandRequest,
    outcome: CommandOutcome,
) -> Result<()> {
    let queue = shared.queue();
    let store = shared.router.store();
    let now = shared.router.now();

    match outcome {
        CommandOutcome::Completed => {
            debug!("[{queue}] {} completed", request.identity);
            store.complete(request.id).await
        }
        CommandOutcome::Failed(reason) => {
            warn!("[{queue}] {} failed: {reason}", request.identity);
            store.fail(request.id, &reason, now).await
        }
        CommandOutcome::Retryable { after, reason } => {
            // Waiting out a ban or a server back-off is not the command's fault
            let backoff_until = shared.backoff_until(now);
            let attempts = if shared.is_banned() || backoff_until.is_some() {
                request.attempt_count
            } else {
                request.attempt_count + 1
            };

            if attempts >= shared.settings.max_attempts {
                let reason = format!("{reason} (gave up after {attempts} attempts)");
                warn!("[{queue}] {} failed: {reason}", request.identity);
                return store.fail(request.id, &reason, now).await;
            }

            let delay = after.unwrap_or_else(|| shared.settings.retry_delay(attempts.max(1)));
            let due = (now + chrono_duration(delay)).max(backoff_until.unwrap_or(now));
            debug!("[{queue}] {} will retry at {due}: {reason}", request.identity);
            store
                .reschedule(request.id, due, attempts, Some(&reason), now)
                .await
        }
    }
}
