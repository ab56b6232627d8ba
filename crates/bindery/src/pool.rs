//! The pool boundary.
//!
//! The binding layer consumes pools through [`ConnectionPool`]. Release is
//! synchronous so a connection can be handed back from `Drop` on any exit
//! path, including cancellation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::Result;

/// A connection checked out of a pool.
pub struct Leased {
    id: u64,
    connection: Box<dyn Connection>,
    reset_required: bool,
}

impl Leased {
    /// Wrap a connection checked out under `id`.
    pub fn new(id: u64, connection: Box<dyn Connection>) -> Self {
        Self {
            id,
            connection,
            reset_required: false,
        }
    }

    /// Pool-assigned connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The connection.
    pub fn connection(&self) -> &(dyn Connection + 'static) {
        self.connection.as_ref()
    }

    /// The connection, mutably.
    pub fn connection_mut(&mut self) -> &mut (dyn Connection + 'static) {
        self.connection.as_mut()
    }

    /// Ask the pool to reset the connection before handing it out again.
    ///
    /// Set when the connection is returned with server-side state that may
    /// be dirty, such as an abandoned cursor or an interrupted statement.
    pub fn mark_reset_required(&mut self) {
        self.reset_required = true;
    }

    /// Whether the connection must be reset before reuse.
    pub fn reset_required(&self) -> bool {
        self.reset_required
    }

    /// Split into the id and the connection.
    pub fn into_parts(self) -> (u64, Box<dyn Connection>) {
        (self.id, self.connection)
    }
}

impl fmt::Debug for Leased {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leased")
            .field("id", &self.id)
            .field("reset_required", &self.reset_required)
            .finish_non_exhaustive()
    }
}

/// Status information about a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the pool utilization as a percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (f64::from(self.in_use) / f64::from(self.max)) * 100.0
    }

    /// Check if every permitted connection is in use.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.in_use >= self.max
    }
}

/// A source of pooled connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Check out a connection.
    ///
    /// Waits up to `timeout` when the pool is exhausted and not at all when
    /// it is zero. `None` leaves the wait to the pool's own default. Fails with
    /// [`Error::AcquireTimeout`](crate::Error::AcquireTimeout) when the wait
    /// expires.
    async fn acquire(&self, timeout: Option<Duration>) -> Result<Leased>;

    /// Return a connection to the pool.
    fn release(&self, connection: Leased);

    /// Current pool status.
    fn status(&self) -> PoolStatus;

    /// Close the pool. Connections still checked out are discarded on
    /// release.
    async fn close(&self) {}
}
