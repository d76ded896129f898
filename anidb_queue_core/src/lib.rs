//! AniDB Queue Core Library
//!
//! Persistent, prioritized command queues driving a rate-limited AniDB
//! session. The main pieces:
//!
//! - [`protocol`]: session guard, UDP client actor, keep-alive and HTTP API
//! - [`commands`]: the command catalogue and its execution context
//! - [`queue`]: per-queue processors and the registry producers talk to
//! - [`store`] and [`database`]: in-memory and SQLite persistence

pub mod clock;
pub mod commands;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod security;
pub mod store;

// Re-export main types
pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock, SystemClock};
pub use commands::{
    CommandContext, CommandExecutor, CommandKind, CommandOutcome, CommandRequest, CommandRouter,
    CommandStatus, DefaultExecutor, priority,
};
pub use config::{AniDbConfig, PanicPolicy, QueueConfig, QueueOptions, SessionConfig};
#[cfg(feature = "database")]
pub use database::{Database, DatabaseStats};
pub use error::{Error, Result};
pub use queue::{
    AddResult, QueueCounts, QueueEvent, QueueName, QueueProcessor, QueueRegistry, QueueState,
    QueueStatus,
};
pub use store::{AniDbRecord, CommandStore, RecordKind, RecordStore};
