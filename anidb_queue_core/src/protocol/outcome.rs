//! Typed results of remote calls

use crate::protocol::error::ProtocolError;
use crate::protocol::messages::UdpResponse;

/// Result of one UDP command exchange
#[derive(Debug)]
pub enum UdpOutcome {
    /// 2xx/3xx answer, including "already in list"
    Success(UdpResponse),
    /// The file, anime, episode, group or list entry does not exist
    NoSuchEntity(UdpResponse),
    /// The session was rejected; the next call logs in again
    InvalidSession,
    /// Traffic is blocked by a ban
    Banned { reason: String },
    /// No correlated reply within the receive timeout
    Timeout,
    /// Anything else
    Error(ProtocolError),
}

impl UdpOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn response(&self) -> Option<&UdpResponse> {
        match self {
            Self::Success(r) | Self::NoSuchEntity(r) => Some(r),
            _ => None,
        }
    }

    /// Short label for logs
    pub fn label(&self) -> String {
        match self {
            Self::Success(r) => format!("success ({})", r.response_code()),
            Self::NoSuchEntity(r) => format!("no such entity ({})", r.response_code()),
            Self::InvalidSession => "invalid session".to_string(),
            Self::Banned { reason } => format!("banned ({reason})"),
            Self::Timeout => "timeout".to_string(),
            Self::Error(e) => format!("error ({e})"),
        }
    }
}

/// Result of one HTTP API call
#[derive(Debug)]
pub enum HttpOutcome<T> {
    Success(T),
    NotFound,
    Banned { reason: String },
    Error(ProtocolError),
}

impl<T> HttpOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
