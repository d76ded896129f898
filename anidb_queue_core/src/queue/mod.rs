//! Named command queues
//!
//! Each [`QueueName`] gets one [`processor::QueueProcessor`] loop; the
//! [`registry::QueueRegistry`] routes new commands and exposes control and
//! status for all of them.

pub mod processor;
pub mod registry;

pub use processor::{ProcessorSettings, QueueProcessor};
pub use registry::{AddResult, QueueRegistry};

use crate::error::{Error, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the independent worker lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "TEXT"))]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    #[cfg_attr(feature = "database", sqlx(rename = "general"))]
    General,
    #[cfg_attr(feature = "database", sqlx(rename = "hasher"))]
    Hasher,
    #[cfg_attr(feature = "database", sqlx(rename = "images"))]
    Images,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::General, QueueName::Hasher, QueueName::Images];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Hasher => "hasher",
            Self::Images => "images",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "hasher" => Ok(Self::Hasher),
            "images" => Ok(Self::Images),
            _ => Err(ValidationError::invalid_parameter(
                "queue",
                "expected one of general, hasher, images",
            )
            .into()),
        }
    }
}

/// What a processor loop is doing right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueueState {
    /// Nothing due
    Idle,
    Running {
        identity: String,
        description: String,
    },
    /// Paused by the operator
    Paused,
    /// Blocked by an active ban
    WaitingOnBan,
    /// Holding off until the server's back-off window ends
    BackingOff { until: DateTime<Utc> },
    Stopped,
    /// The loop stopped on a persistence failure
    Faulted { reason: String },
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running { description, .. } => write!(f, "running: {description}"),
            Self::Paused => f.write_str("paused"),
            Self::WaitingOnBan => f.write_str("waiting on ban"),
            Self::BackingOff { until } => write!(f, "backing off until {until}"),
            Self::Stopped => f.write_str("stopped"),
            Self::Faulted { reason } => write!(f, "faulted: {reason}"),
        }
    }
}

/// Backlog of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub running: u64,
    pub failed: u64,
}

impl QueueCounts {
    /// Commands that still have to run
    pub fn backlog(&self) -> u64 {
        self.pending + self.running
    }
}

/// Read-only view for status consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub name: QueueName,
    pub paused: bool,
    pub paused_by_ban: bool,
    pub running: bool,
    pub state: QueueState,
    pub counts: QueueCounts,
}

/// Broadcast to UI/telemetry subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueueEvent {
    StateChanged { queue: QueueName, state: QueueState },
    CountChanged { queue: QueueName, counts: QueueCounts },
}
