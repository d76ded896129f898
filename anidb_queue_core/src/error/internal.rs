//! Internal library error types

use thiserror::Error;

/// Internal library errors
#[derive(Error, Debug)]
pub enum InternalError {
    /// Command store or repository failure
    #[error("Database error: {message}")]
    Database { message: String },

    /// A persisted command payload could not be encoded or decoded
    #[error("Invalid command payload: {message}")]
    Payload { message: String },

    /// The protocol actor is gone (closed or crashed)
    #[error("AniDB client is closed")]
    ClientClosed,

    /// Internal assertion failure
    #[error("Internal assertion failed: {message}")]
    Assertion { message: String },
}

impl InternalError {
    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a payload error
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload {
            message: message.into(),
        }
    }

    /// Create an internal assertion failure error
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error() {
        let error = InternalError::database("database is locked");
        assert!(error.to_string().contains("Database error"));
        assert!(error.to_string().contains("database is locked"));
    }

    #[test]
    fn test_payload_error() {
        let error = InternalError::payload("unknown variant `Foo`");
        assert!(error.to_string().contains("Invalid command payload"));
        assert!(error.to_string().contains("Foo"));
    }

    #[test]
    fn test_client_closed_error() {
        assert_eq!(
            InternalError::ClientClosed.to_string(),
            "AniDB client is closed"
        );
    }

    #[test]
    fn test_assertion_error() {
        let error = InternalError::assertion("Invariant violated");
        assert!(error.to_string().contains("Internal assertion failed"));
        assert!(error.to_string().contains("Invariant violated"));
    }
}
