//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Sizing, timeouts and health checks of a [`Pool`](crate::Pool).
///
/// Build one with [`PoolConfig::new`] and the setters; new fields may be
/// added in minor versions.
///
/// ```rust
/// use std::time::Duration;
/// use bindery_pool::PoolConfig;
///
/// let config = PoolConfig::new()
///     .max_connections(4)
///     .connection_timeout(Duration::from_secs(2))
///     .reset_on_return(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Connections opened eagerly by [`Pool::new`](crate::Pool::new).
    pub min_connections: u32,

    /// Upper bound on open connections, idle and checked out together.
    pub max_connections: u32,

    /// How long a checkout waits when the caller passes no timeout.
    pub connection_timeout: Duration,

    /// Idle connections unused for longer are closed instead of reused.
    pub idle_timeout: Duration,

    /// Connections older than this are closed instead of reused.
    pub max_lifetime: Duration,

    /// Skip idle connections whose
    /// [`is_valid`](bindery::Connection::is_valid) reports false.
    pub test_on_checkout: bool,

    /// Close returned connections whose `is_valid` reports false.
    pub test_on_checkin: bool,

    /// Reset every returned connection before its next checkout.
    ///
    /// When off, only connections their borrower marked with
    /// [`Leased::mark_reset_required`](bindery::Leased::mark_reset_required)
    /// are reset.
    pub reset_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10 * 60),
            max_lifetime: Duration::from_secs(30 * 60),
            test_on_checkout: true,
            test_on_checkin: false,
            reset_on_return: true,
        }
    }
}

impl PoolConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections opened eagerly.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the connection limit.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the default checkout wait.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Toggle validation at checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Toggle validation at checkin.
    #[must_use]
    pub fn test_on_checkin(mut self, enabled: bool) -> Self {
        self.test_on_checkin = enabled;
        self
    }

    /// Toggle the unconditional reset of returned connections.
    #[must_use]
    pub fn reset_on_return(mut self, enabled: bool) -> Self {
        self.reset_on_return = enabled;
        self
    }

    /// Reject configurations a pool cannot run with.
    pub fn validate(&self) -> Result<(), PoolError> {
        let problem = if self.max_connections == 0 {
            "max_connections must be at least 1"
        } else if self.min_connections > self.max_connections {
            "min_connections exceeds max_connections"
        } else if self.max_lifetime.is_zero() {
            "max_lifetime must be non-zero"
        } else {
            return Ok(());
        };
        Err(PoolError::Configuration(problem.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rejection(config: PoolConfig) -> String {
        config.validate().unwrap_err().to_string()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert!(config.reset_on_return && config.test_on_checkout && !config.test_on_checkin);
        config.validate().unwrap();
    }

    #[test]
    fn test_setters() {
        let config = PoolConfig::new()
            .min_connections(2)
            .max_connections(2)
            .connection_timeout(Duration::from_millis(250))
            .test_on_checkin(true)
            .reset_on_return(false);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.connection_timeout, Duration::from_millis(250));
        assert!(config.test_on_checkin);
        assert!(!config.reset_on_return);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejections() {
        assert!(rejection(PoolConfig::new().max_connections(0)).contains("at least 1"));
        assert!(
            rejection(PoolConfig::new().min_connections(3).max_connections(2))
                .contains("exceeds max_connections")
        );
        assert!(rejection(PoolConfig::new().max_lifetime(Duration::ZERO)).contains("max_lifetime"));
    }
}
