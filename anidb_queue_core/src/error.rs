//! Error types for the AniDB queue core library
//!
//! Errors are organized into logical categories. Expected protocol results
//! (ban, invalid session, missing entity, timeout) are not errors; they are
//! reported through [`crate::protocol::UdpOutcome`] instead.

use thiserror::Error;

pub mod internal;
pub mod io;
pub mod protocol;
pub mod validation;

pub use self::io::{IoError, IoErrorKind, IoTarget};
pub use self::protocol::ProtocolError;
pub use self::validation::ValidationError;
pub use internal::InternalError;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the AniDB queue core library
///
/// Errors are categorized into four main types:
/// - I/O errors: file system and socket operations
/// - Protocol errors: AniDB protocol failures surfaced outside an outcome
/// - Validation errors: input validation and configuration errors
/// - Internal errors: persistence and library invariants
#[derive(Error, Debug)]
pub enum Error {
    /// I/O related errors
    #[error(transparent)]
    Io(#[from] IoError),

    /// Protocol related errors
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Validation related errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Internal library errors
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl Error {
    /// Check if this error came from the command store or another repository
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Internal(InternalError::Database { .. }))
    }
}

// Conversions from external error types

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io(IoError::from_std(source))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(InternalError::database(err.to_string()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(InternalError::payload(err.to_string()))
    }
}

impl From<crate::protocol::error::ProtocolError> for Error {
    fn from(err: crate::protocol::error::ProtocolError) -> Self {
        use crate::protocol::error::ProtocolError as ProtoErr;

        match err {
            ProtoErr::Io(io_err) => Self::Io(IoError::from_std(io_err)),
            ProtoErr::Timeout(_) => Self::Protocol(ProtocolError::NetworkOffline),
            ProtoErr::AuthenticationFailed { reason } => Self::Validation(
                ValidationError::invalid_configuration(&format!("Authentication failed: {reason}")),
            ),
            ProtoErr::ServerError { code, message } => {
                Self::Protocol(ProtocolError::server_error(code, &message))
            }
            ProtoErr::Banned { reason } => Self::Protocol(ProtocolError::banned(reason)),
            ProtoErr::ClientClosed => Self::Internal(InternalError::ClientClosed),
            _ => Self::Protocol(ProtocolError::other(format!("Protocol error: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;
    use std::io;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_file_not_found_error_creation() {
        let path = Path::new("/non/existent/file.mkv");
        let error = Error::Io(IoError::media_not_found(path));

        match error {
            Error::Io(io_err) => {
                assert_eq!(io_err.kind, IoErrorKind::FileNotFound);
                assert_eq!(io_err.path, Some(path.to_path_buf()));
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_database_error_is_persistence() {
        let error = Error::Internal(InternalError::database("disk I/O error"));
        assert!(error.is_persistence());
        assert!(error.to_string().contains("disk I/O error"));

        let error = Error::Internal(InternalError::payload("missing field `type`"));
        assert!(!error.is_persistence());
    }

    #[test]
    fn test_network_offline_error() {
        let error = Error::Protocol(ProtocolError::NetworkOffline);
        assert!(error.to_string().contains("Network is offline"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "Access denied");
        let error: Error = io_error.into();

        match error {
            Error::Io(ref io_err) => {
                assert_eq!(io_err.kind, IoErrorKind::PermissionDenied);
                assert!(error.source().is_some());
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: Error = crate::protocol::ProtocolError::Timeout(Duration::from_secs(30)).into();
        assert!(matches!(err, Error::Protocol(ProtocolError::NetworkOffline)));

        let err: Error = crate::protocol::ProtocolError::server_error(602, "SERVER BUSY").into();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::ServerError { code: 602, .. })
        ));

        let err: Error =
            crate::protocol::ProtocolError::authentication_failed("500 LOGIN FAILED").into();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_payload_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Internal(InternalError::Payload { .. })));
    }
}
