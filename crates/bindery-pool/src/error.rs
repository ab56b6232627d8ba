//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Connection creation failed.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(String),

    /// Connection reset failed.
    #[error("connection reset failed: {0}")]
    ResetFailed(String),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl From<PoolError> for bindery::Error {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::AcquisitionTimeout(waited) => Self::AcquireTimeout(waited),
            PoolError::PoolClosed => Self::PoolClosed,
            PoolError::ConnectionCreation(message) => Self::Connection(message),
            PoolError::Configuration(message) => Self::Config(message),
            other @ PoolError::ResetFailed(_) => Self::Pool(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_into_core_error() {
        let timeout = bindery::Error::from(PoolError::AcquisitionTimeout(Duration::ZERO));
        assert!(matches!(timeout, bindery::Error::AcquireTimeout(d) if d.is_zero()));
        assert!(timeout.is_transient());

        let closed = bindery::Error::from(PoolError::PoolClosed);
        assert!(matches!(closed, bindery::Error::PoolClosed));

        let reset = bindery::Error::from(PoolError::ResetFailed("socket closed".into()));
        assert!(reset.to_string().contains("socket closed"));
    }
}
