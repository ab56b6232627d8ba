//! Error types for binding, dispatch and transactions.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while resolving a bind, executing a statement or
/// driving a transaction.
///
/// `Connection` and `Statement` are produced by backends and are passed
/// through this crate unchanged, so callers can tell a broken connection
/// from a rejected statement without unwrapping a generic layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The pool could not supply a connection within the timeout.
    #[error("timed out acquiring a connection after {0:?}")]
    AcquireTimeout(Duration),

    /// No bind could be resolved for a statement.
    #[error("no bind is configured for this statement")]
    NoBind,

    /// Connection-level failure reported by the backend.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend rejected a statement.
    #[error("statement error: {message}")]
    Statement {
        /// Backend-specific error code (SQLSTATE or similar), if known.
        code: Option<String>,
        /// Error message.
        message: String,
    },

    /// Commit or rollback was attempted on a scope that is not active, or an
    /// active transaction could not be committed.
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// Statement execution exceeded its timeout.
    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// The connection was used after it was returned to its pool.
    #[error("connection has already been released")]
    ConnectionReleased,

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Pool failure other than a timeout or closure.
    #[error("pool error: {0}")]
    Pool(String),

    /// Type conversion error.
    #[error("type error: {0}")]
    Type(#[from] bindery_types::TypeError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a statement error without a backend code.
    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            code: None,
            message: message.into(),
        }
    }

    /// Create a statement error carrying a backend code.
    pub fn statement_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// Transient errors are timeouts and connection failures; a statement
    /// error will fail the same way again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AcquireTimeout(_) | Self::CommandTimeout(_) | Self::Connection(_)
        )
    }

    /// Check if the backend rejected the statement itself.
    #[must_use]
    pub fn is_statement_error(&self) -> bool {
        matches!(self, Self::Statement { .. })
    }

    /// Check if the error concerns the connection rather than the statement.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ConnectionReleased | Self::PoolClosed
        )
    }

    /// Backend error code, if this is a statement error that carries one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Statement { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Result type for bindery operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::AcquireTimeout(Duration::ZERO).is_transient());
        assert!(Error::Connection("reset by peer".into()).is_transient());
        assert!(!Error::NoBind.is_transient());

        let err = Error::statement_with_code("42P01", "relation does not exist");
        assert!(err.is_statement_error());
        assert!(!err.is_connection_error());
        assert_eq!(err.code(), Some("42P01"));
        assert_eq!(err.to_string(), "statement error: relation does not exist");
    }

    #[test]
    fn test_type_error_conversion() {
        let err: Error = bindery_types::TypeError::UnexpectedNull.into();
        assert!(matches!(err, Error::Type(_)));
    }
}
