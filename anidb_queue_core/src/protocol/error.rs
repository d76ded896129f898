//! Protocol-specific error types
//!
//! These are the failures of one UDP or HTTP exchange. Expected AniDB
//! answers (no such entity, invalid session, ban) are reported as
//! [`UdpOutcome`](crate::protocol::UdpOutcome) variants instead.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Protocol-specific error types
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No correlated response within the receive timeout
    #[error("No response after {0:?}")]
    Timeout(Duration),

    /// Invalid packet format
    #[error("Invalid packet format: {message}")]
    InvalidPacket { message: String },

    /// Packet too large
    #[error("Packet size {size} exceeds maximum {max_size}")]
    PacketTooLarge { size: usize, max_size: usize },

    /// AniDB server error
    #[error("AniDB server error: {code} - {message}")]
    ServerError { code: u16, message: String },

    /// Authentication failed
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Traffic is blocked by an active ban
    #[error("Banned: {reason}")]
    Banned { reason: String },

    /// The server asked us to back off
    #[error("Backing off until {until}: {reason}")]
    BackingOff { until: DateTime<Utc>, reason: String },

    /// HTTP transport failure
    #[error("HTTP error: {message}")]
    Http { message: String },

    /// The client actor has shut down
    #[error("AniDB client is closed")]
    ClientClosed,
}

impl ProtocolError {
    /// Create an invalid packet error
    pub fn invalid_packet(message: impl Into<String>) -> Self {
        Self::InvalidPacket {
            message: message.into(),
        }
    }

    /// Create a packet too large error
    pub fn packet_too_large(size: usize, max_size: usize) -> Self {
        Self::PacketTooLarge { size, max_size }
    }

    /// Create a server error
    pub fn server_error(code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    /// Create an authentication failed error
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Create a ban error
    pub fn banned(reason: impl Into<String>) -> Self {
        Self::Banned {
            reason: reason.into(),
        }
    }

    /// Create a back-off error
    pub fn backing_off(until: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self::BackingOff {
            until,
            reason: reason.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Timeout(_)
                | Self::BackingOff { .. }
                | Self::Http { .. }
                | Self::ServerError {
                    code: 600..=604,
                    ..
                }
        )
    }

    /// Check if this error indicates a need to re-authenticate
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::ServerError {
                code: 501 | 506,
                ..
            }
        )
    }
}

/// Response code returned by AniDB server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode(pub u16);

impl ResponseCode {
    /// 2xx and 3xx answers carry a result
    pub fn is_success(&self) -> bool {
        matches!(self.0, 200..=399)
    }

    /// The requested file, anime, episode, group or list entry does not exist
    pub fn is_no_such_entity(&self) -> bool {
        matches!(self.0, 320 | 330 | 340 | 350 | 411)
    }

    pub fn is_invalid_session(&self) -> bool {
        matches!(self.0, 501 | 506)
    }

    pub fn is_banned(&self) -> bool {
        matches!(self.0, 504 | 555)
    }

    /// Server-side trouble that asks the client to delay and resubmit
    pub fn is_server_busy(&self) -> bool {
        matches!(self.0, 600..=604)
    }

    /// Get a human-readable description of the response code
    pub fn description(&self) -> &'static str {
        match self.0 {
            200 => "LOGIN ACCEPTED",
            201 => "LOGIN ACCEPTED - NEW VERSION AVAILABLE",
            203 => "LOGGED OUT",
            210 => "MYLIST ENTRY ADDED",
            211 => "MYLIST ENTRY DELETED",
            220 => "FILE",
            230 => "ANIME",
            240 => "EPISODE",
            250 => "GROUP",
            260 => "VOTED",
            261 => "VOTE FOUND",
            262 => "VOTE UPDATED",
            263 => "VOTE REVOKED",
            300 => "PONG",
            310 => "FILE ALREADY IN MYLIST",
            311 => "MYLIST ENTRY EDITED",
            320 => "NO SUCH FILE",
            330 => "NO SUCH ANIME",
            340 => "NO SUCH EPISODE",
            350 => "NO SUCH GROUP",
            403 => "NOT LOGGED IN",
            411 => "NO SUCH MYLIST ENTRY",
            500 => "LOGIN FAILED",
            501 => "LOGIN FIRST",
            502 => "ACCESS DENIED",
            503 => "CLIENT VERSION OUTDATED",
            504 => "CLIENT BANNED",
            505 => "ILLEGAL INPUT OR ACCESS DENIED",
            506 => "INVALID SESSION",
            555 => "BANNED",
            598 => "UNKNOWN COMMAND",
            600 => "INTERNAL SERVER ERROR",
            601 => "ANIDB OUT OF SERVICE",
            602 => "SERVER BUSY",
            604 => "TIMEOUT - DELAY AND RESUBMIT",
            _ => "UNKNOWN RESPONSE CODE",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let errors = vec![
            ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout")),
            ProtocolError::Timeout(Duration::from_secs(30)),
            ProtocolError::backing_off(Utc::now(), "602 SERVER BUSY"),
            ProtocolError::server_error(602, "busy"),
            ProtocolError::http("connection reset"),
        ];

        for err in errors {
            assert!(err.is_transient(), "{err:?} should be transient");
        }
    }

    #[test]
    fn test_non_transient_errors() {
        let errors = vec![
            ProtocolError::invalid_packet("bad"),
            ProtocolError::authentication_failed("wrong password"),
            ProtocolError::server_error(505, "ILLEGAL INPUT OR ACCESS DENIED"),
            ProtocolError::banned("555 BANNED"),
            ProtocolError::ClientClosed,
        ];

        for err in errors {
            assert!(!err.is_transient(), "{err:?} should not be transient");
        }
    }

    #[test]
    fn test_requires_reauth() {
        assert!(ProtocolError::server_error(501, "LOGIN FIRST").requires_reauth());
        assert!(ProtocolError::server_error(506, "INVALID SESSION").requires_reauth());
        assert!(!ProtocolError::server_error(505, "ILLEGAL INPUT").requires_reauth());
    }

    #[test]
    fn test_response_code_classes() {
        assert!(ResponseCode(200).is_success());
        assert!(ResponseCode(310).is_success());
        assert!(!ResponseCode(505).is_success());

        for code in [320, 330, 340, 350, 411] {
            assert!(ResponseCode(code).is_no_such_entity(), "{code}");
        }
        assert!(ResponseCode(501).is_invalid_session());
        assert!(ResponseCode(506).is_invalid_session());
        assert!(ResponseCode(504).is_banned());
        assert!(ResponseCode(555).is_banned());
        assert!(ResponseCode(604).is_server_busy());
        assert!(!ResponseCode(598).is_server_busy());
    }

    #[test]
    fn test_response_code_display() {
        assert_eq!(ResponseCode(200).to_string(), "200 LOGIN ACCEPTED");
        assert_eq!(ResponseCode(555).description(), "BANNED");
        assert_eq!(ResponseCode(999).description(), "UNKNOWN RESPONSE CODE");
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::other("network error");
        let proto_err: ProtocolError = io_err.into();
        assert!(matches!(proto_err, ProtocolError::Io(_)));
    }
}
