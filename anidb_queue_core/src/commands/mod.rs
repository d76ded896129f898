//! Persistable units of work
//!
//! A [`CommandRequest`] wraps a [`CommandKind`] with the bookkeeping the
//! queues need: dedup identity, target queue, priority, due date and
//! attempt history. Execution goes through a [`CommandExecutor`], which in
//! production is the [`DefaultExecutor`] over a [`CommandContext`].

mod anime;
pub mod context;
mod file;
pub mod hasher;
mod image;
pub mod kind;
mod mylist;

pub use context::{CommandContext, CommandExecutor, CommandRouter, DefaultExecutor};
pub use hasher::{Ed2kHasher, FileHash, FileHasher};
pub use kind::CommandKind;

use crate::protocol::{ProtocolError, UdpOutcome};
use crate::queue::QueueName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Priority values; smaller runs first
pub mod priority {
    /// Explicit operator or UI requests
    pub const USER_INITIATED: i32 = 1;
    pub const ANIME_HTTP: i32 = 2;
    pub const IMAGE: i32 = 2;
    pub const FILE_INFO: i32 = 3;
    pub const HASH: i32 = 4;
    pub const RELEASE_GROUP: i32 = 5;
    pub const MYLIST: i32 = 6;
    pub const VOTE: i32 = 6;
    pub const MYLIST_DELETE: i32 = 10;
    pub const DEFAULT: i32 = 99;
}

/// Lifecycle of a persisted command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "TEXT"))]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[cfg_attr(feature = "database", sqlx(rename = "pending"))]
    Pending,
    #[cfg_attr(feature = "database", sqlx(rename = "running"))]
    Running,
    #[cfg_attr(feature = "database", sqlx(rename = "completed"))]
    Completed,
    #[cfg_attr(feature = "database", sqlx(rename = "failed"))]
    Failed,
}

impl CommandStatus {
    /// Pending and running rows take part in dedup
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A command as stored in its queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Store row id, 0 until inserted
    pub id: i64,
    pub identity: String,
    pub queue: QueueName,
    pub kind: CommandKind,
    pub priority: i32,
    pub date_due: DateTime<Utc>,
    pub status: CommandStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommandRequest {
    /// New pending request, due immediately
    pub fn new(kind: CommandKind, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            identity: kind.identity(),
            queue: kind.queue(),
            priority: kind.default_priority(),
            kind,
            date_due: now,
            status: CommandStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Delay the first run
    pub fn due_at(mut self, date_due: DateTime<Utc>) -> Self {
        self.date_due = date_due;
        self
    }

    pub fn description(&self) -> String {
        self.kind.description()
    }
}

/// Result of executing a command once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Done; the row is removed
    Completed,
    /// Run again later. `after: None` lets the processor pick the back-off.
    Retryable {
        after: Option<Duration>,
        reason: String,
    },
    /// Permanent failure; kept for inspection, never retried automatically
    Failed(String),
}

impl CommandOutcome {
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retryable {
            after: None,
            reason: reason.into(),
        }
    }

    /// Retry without back-off
    pub fn retry_now(reason: impl Into<String>) -> Self {
        Self::Retryable {
            after: Some(Duration::ZERO),
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Shared mapping for UDP results that are not the command's success path
    pub fn from_udp(outcome: UdpOutcome) -> Self {
        match outcome {
            UdpOutcome::Success(_) => Self::Completed,
            UdpOutcome::NoSuchEntity(response) => {
                Self::failed(format!("{} {}", response.code, response.message))
            }
            UdpOutcome::InvalidSession => Self::retry_now("invalid session"),
            UdpOutcome::Banned { reason } => Self::retry_now(format!("banned: {reason}")),
            UdpOutcome::Timeout => Self::retry("timed out waiting for AniDB"),
            UdpOutcome::Error(error) => Self::from_protocol_error(error),
        }
    }

    pub fn from_protocol_error(error: ProtocolError) -> Self {
        if error.is_transient() {
            Self::retry(error.to_string())
        } else {
            Self::failed(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UdpResponse;

    #[test]
    fn test_new_request_takes_kind_defaults() {
        let now = Utc::now();
        let request = CommandRequest::new(
            CommandKind::GetAnimeHttp {
                anime_id: 100,
                force_refresh: false,
            },
            now,
        );
        assert_eq!(request.identity, "GetAnimeHTTP:100");
        assert_eq!(request.queue, QueueName::General);
        assert_eq!(request.priority, priority::ANIME_HTTP);
        assert_eq!(request.status, CommandStatus::Pending);
        assert_eq!(request.date_due, now);

        let request = request.with_priority(priority::USER_INITIATED);
        assert_eq!(request.priority, 1);
    }

    #[test]
    fn test_udp_outcome_mapping() {
        let missing = UdpResponse::parse("t1 320 NO SUCH FILE").unwrap();
        assert_eq!(
            CommandOutcome::from_udp(UdpOutcome::NoSuchEntity(missing)),
            CommandOutcome::Failed("320 NO SUCH FILE".to_string())
        );
        assert_eq!(
            CommandOutcome::from_udp(UdpOutcome::InvalidSession),
            CommandOutcome::retry_now("invalid session")
        );
        assert!(matches!(
            CommandOutcome::from_udp(UdpOutcome::Timeout),
            CommandOutcome::Retryable { after: None, .. }
        ));
        assert!(matches!(
            CommandOutcome::from_udp(UdpOutcome::Error(ProtocolError::server_error(
                602,
                "SERVER BUSY"
            ))),
            CommandOutcome::Retryable { after: None, .. }
        ));
        assert!(matches!(
            CommandOutcome::from_udp(UdpOutcome::Error(ProtocolError::authentication_failed(
                "500 LOGIN FAILED"
            ))),
            CommandOutcome::Failed(_)
        ));
    }
}
