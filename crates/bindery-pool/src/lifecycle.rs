//! Connection lifecycle.
//!
//! The pool opens connections through a [`Connector`] and keeps a
//! [`ConnectionMetadata`] record for each one. The record decides when a
//! connection has outlived the configured limits and whether it still owes a
//! reset from its previous borrower.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bindery::Connection;

use crate::config::PoolConfig;
use crate::error::PoolError;

/// Opens new backend connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, PoolError>;
}

/// Where a pooled connection is in its checkout cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting in the idle queue.
    Idle,
    /// Checked out.
    InUse,
    /// Having its session state reset before a checkout.
    Resetting,
}

/// Why an idle connection is no longer handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Older than `max_lifetime`.
    Lifetime,
    /// Unused for longer than `idle_timeout`.
    Idle,
}

impl Expiry {
    /// Short reason, for log events.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Lifetime => "max lifetime exceeded",
            Self::Idle => "idle timeout exceeded",
        }
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Bookkeeping for one pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-assigned id, also carried by the [`Leased`](bindery::Leased).
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// Last checkout or checkin.
    pub last_used_at: Instant,
    /// Checkouts so far.
    pub checkouts: u64,
    /// Reset owed before the next checkout.
    pub needs_reset: bool,
    /// Current state.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Record for a connection opened just now.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkouts: 0,
            needs_reset: false,
            state: ConnectionState::Idle,
        }
    }

    /// Time since the connection was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last checkout or checkin.
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Whether `config` retires this connection, and why.
    ///
    /// Lifetime is checked first so an old connection is reported as such
    /// even if it also sat idle.
    pub fn expiry(&self, config: &PoolConfig) -> Option<Expiry> {
        if self.age() > config.max_lifetime {
            Some(Expiry::Lifetime)
        } else if self.idle_for() > config.idle_timeout {
            Some(Expiry::Idle)
        } else {
            None
        }
    }

    /// Hand the connection to a borrower. Any owed reset has been paid.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkouts += 1;
        self.needs_reset = false;
        self.state = ConnectionState::InUse;
    }

    /// Take the connection back into the idle queue.
    pub fn mark_checkin(&mut self, needs_reset: bool) {
        self.last_used_at = Instant::now();
        self.needs_reset = needs_reset;
        self.state = ConnectionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_pays_owed_reset() {
        let mut meta = ConnectionMetadata::new(3);
        assert_eq!(meta.state, ConnectionState::Idle);

        meta.mark_checkout();
        meta.mark_checkin(true);
        assert!(meta.needs_reset);
        assert_eq!(meta.state, ConnectionState::Idle);

        meta.mark_checkout();
        assert!(!meta.needs_reset);
        assert_eq!(meta.checkouts, 2);
        assert_eq!(meta.state, ConnectionState::InUse);
    }

    #[test]
    fn test_expiry_prefers_lifetime() {
        let meta = ConnectionMetadata::new(1);
        assert_eq!(meta.expiry(&PoolConfig::default()), None);

        std::thread::sleep(Duration::from_millis(5));
        let short = PoolConfig::new()
            .max_lifetime(Duration::from_millis(1))
            .idle_timeout(Duration::from_millis(1));
        assert_eq!(meta.expiry(&short), Some(Expiry::Lifetime));

        let idle_only = PoolConfig::new().idle_timeout(Duration::from_millis(1));
        assert_eq!(meta.expiry(&idle_only), Some(Expiry::Idle));
        assert_eq!(Expiry::Idle.to_string(), "idle timeout exceeded");
    }
}
