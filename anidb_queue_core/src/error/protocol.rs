//! Protocol related error types

use thiserror::Error;

/// Protocol-related errors for AniDB communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Network is offline or AniDB service unavailable
    #[error("Network is offline or AniDB service unavailable")]
    NetworkOffline,

    /// Traffic is blocked by an active ban
    #[error("AniDB traffic is blocked by a ban: {reason}")]
    Banned { reason: String },

    /// AniDB API error with response code
    #[error("AniDB API error: {code} - {message}")]
    ServerError { code: u16, message: String },

    /// Generic protocol error
    #[error("Protocol error: {message}")]
    Other { message: String },
}

impl ProtocolError {
    /// Create a ban error
    pub fn banned(reason: impl Into<String>) -> Self {
        Self::Banned {
            reason: reason.into(),
        }
    }

    /// Create a server error with code and message
    pub fn server_error(code: u16, message: &str) -> Self {
        Self::ServerError {
            code,
            message: message.to_string(),
        }
    }

    /// Create a generic protocol error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkOffline => true,
            Self::Banned { .. } => false,
            Self::ServerError { code, .. } => matches!(code, 600..=604),
            Self::Other { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_offline_error() {
        let error = ProtocolError::NetworkOffline;
        assert!(error.to_string().contains("Network is offline"));
        assert!(error.is_transient());
    }

    #[test]
    fn test_banned_error() {
        let error = ProtocolError::banned("555 BANNED");
        assert!(error.to_string().contains("ban"));
        assert!(!error.is_transient());
    }

    #[test]
    fn test_server_busy_is_transient() {
        let error = ProtocolError::server_error(602, "SERVER BUSY");
        assert!(error.to_string().contains("602"));
        assert!(error.is_transient());

        let error = ProtocolError::server_error(505, "ILLEGAL INPUT OR ACCESS DENIED");
        assert!(!error.is_transient());
    }

    #[test]
    fn test_other_error() {
        let error = ProtocolError::other("Custom protocol error");
        assert!(error.to_string().contains("Custom protocol error"));
        assert!(!error.is_transient());
    }
}
