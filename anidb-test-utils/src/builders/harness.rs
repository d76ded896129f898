//! Fully wired command context over mocks

use crate::mocks::{MockFileHasher, MockHttpApi, MockTransport};
use anidb_queue_core::commands::FileHasher;
use anidb_queue_core::protocol::{AniDbClient, ClientSettings, GuardSettings, SessionGuard};
use anidb_queue_core::security::SecureString;
use anidb_queue_core::store::{MemoryCommandStore, MemoryRecordStore};
use anidb_queue_core::{
    CommandContext, CommandRouter, CommandStore, MonotonicClock, QueueConfig, QueueRegistry,
    SharedClock,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Builder for [`TestHarness`]
pub struct TestHarnessBuilder {
    guard_settings: GuardSettings,
    request_timeout: Duration,
    store: Option<Arc<dyn CommandStore>>,
    http: Option<MockHttpApi>,
    hasher: Option<Arc<dyn FileHasher>>,
}

impl TestHarnessBuilder {
    /// Minimum spacing between UDP sends (zero by default)
    pub fn send_spacing(mut self, spacing: Duration) -> Self {
        self.guard_settings.min_send_spacing = spacing;
        self
    }

    pub fn guard_settings(mut self, settings: GuardSettings) -> Self {
        self.guard_settings = settings;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn store(mut self, store: Arc<dyn CommandStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the default mock HTTP API; it is attached to the harness guard
    pub fn http(mut self, http: MockHttpApi) -> Self {
        self.http = Some(http);
        self
    }

    pub fn hasher(mut self, hasher: Arc<dyn FileHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Spawns the client actor, so call it inside a tokio runtime
    pub fn build(self) -> TestHarness {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let guard = Arc::new(SessionGuard::new(self.guard_settings, clock.clone()));
        let transport = MockTransport::new();
        let client = AniDbClient::spawn(
            transport.clone(),
            guard.clone(),
            ClientSettings {
                credentials: Some(("tester".to_string(), SecureString::new("secret"))),
                request_timeout: self.request_timeout,
                ..ClientSettings::default()
            },
        );

        let http = Arc::new(self.http.unwrap_or_default().with_guard(guard.clone()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCommandStore::new()));
        let router = CommandRouter::new(store.clone(), clock.clone());

        TestHarness {
            transport,
            http,
            hasher: self
                .hasher
                .unwrap_or_else(|| Arc::new(MockFileHasher::new())),
            records: Arc::new(MemoryRecordStore::new()),
            store,
            guard,
            client,
            clock,
            router,
            images: TempDir::new().unwrap(),
        }
    }
}

/// Mocks plus a real client actor, guard and router
///
/// ```rust,no_run
/// # async fn example() {
/// use anidb_test_utils::TestHarness;
/// use anidb_queue_core::QueueConfig;
///
/// let harness = TestHarness::new();
/// let registry = harness.registry(&QueueConfig::default());
/// registry.start_all();
/// # }
/// ```
pub struct TestHarness {
    pub transport: MockTransport,
    pub http: Arc<MockHttpApi>,
    pub hasher: Arc<dyn FileHasher>,
    pub records: Arc<MemoryRecordStore>,
    pub store: Arc<dyn CommandStore>,
    pub guard: Arc<SessionGuard>,
    pub client: AniDbClient,
    pub clock: SharedClock,
    pub router: CommandRouter,
    pub images: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder {
            guard_settings: GuardSettings {
                min_send_spacing: Duration::ZERO,
                ..GuardSettings::default()
            },
            request_timeout: Duration::from_secs(5),
            store: None,
            http: None,
            hasher: None,
        }
    }

    pub fn context(&self) -> CommandContext {
        CommandContext {
            client: self.client.clone(),
            http: self.http.clone(),
            hasher: self.hasher.clone(),
            records: self.records.clone(),
            images_dir: self.images.path().to_path_buf(),
            clock: self.clock.clone(),
            router: self.router.clone(),
        }
    }

    /// Registry running the built-in commands against the mocks
    pub fn registry(&self, config: &QueueConfig) -> QueueRegistry {
        QueueRegistry::from_context(self.context(), config)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
