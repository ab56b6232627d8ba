//! Connection pool implementation.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bindery::{Connection, ConnectionPool, Leased, PoolStatus};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionMetadata, ConnectionState, Connector};

struct IdleConnection {
    connection: Box<dyn Connection>,
    meta: ConnectionMetadata,
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    // One permit per connection that may be checked out.
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
    in_use: Mutex<HashMap<u64, ConnectionMetadata>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// A bounded pool of backend connections.
///
/// Waiters are served in arrival order. Idle connections are reused most
/// recently returned first, so surplus connections age out through the idle
/// timeout. Returned connections that need a reset are reset on their next
/// checkout.
///
/// Cloning a pool is cheap; clones share the same connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool, opening `min_connections` connections up front.
    pub async fn new(
        config: PoolConfig,
        connector: impl Connector + 'static,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
            connector: Arc::new(connector),
            idle: Mutex::new(VecDeque::with_capacity(config.max_connections as usize)),
            in_use: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            config,
        });

        for _ in 0..inner.config.min_connections {
            let idle = inner.open().await?;
            inner.idle.lock().push_back(idle);
        }

        tracing::info!(
            min = inner.config.min_connections,
            max = inner.config.max_connections,
            "connection pool created"
        );
        Ok(Self { inner })
    }

    /// Get a connection from the pool.
    ///
    /// Reuses an idle connection when one passes its checks, otherwise opens
    /// a new one. Waits up to `timeout` (the configured connection timeout
    /// when `None`) for a free slot; a zero timeout does not wait.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<Leased, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let started = Instant::now();
        let wait = timeout.unwrap_or(self.inner.config.connection_timeout);
        let permit = self.inner.acquire_permit(wait).await?;

        loop {
            let candidate = self.inner.idle.lock().pop_back();
            let Some(mut idle) = candidate else {
                break;
            };
            match self.inner.prepare(&mut idle).await {
                Ok(()) => {
                    tracing::trace!(
                        connection = idle.meta.id,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "reusing pooled connection"
                    );
                    return Ok(self.inner.checkout(idle, permit));
                }
                Err(reason) => {
                    tracing::debug!(connection = idle.meta.id, reason, "discarding pooled connection");
                }
            }
        }

        let idle = self.inner.open().await?;
        tracing::debug!(
            connection = idle.meta.id,
            waited_ms = started.elapsed().as_millis() as u64,
            "opened new connection"
        );
        Ok(self.inner.checkout(idle, permit))
    }

    /// Return a connection to the pool.
    ///
    /// Connections returned after the pool closed, or failing the checkin
    /// test, are closed instead of kept.
    pub fn put(&self, leased: Leased) {
        let reset_required = leased.reset_required();
        let (id, connection) = leased.into_parts();
        let Some(mut meta) = self.inner.in_use.lock().remove(&id) else {
            tracing::warn!(connection = id, "returned connection does not belong to this pool");
            return;
        };

        if self.is_closed() {
            tracing::debug!(connection = id, "pool closed, dropping returned connection");
        } else if self.inner.config.test_on_checkin && !connection.is_valid() {
            tracing::debug!(connection = id, "returned connection failed validation");
        } else {
            meta.mark_checkin(reset_required || self.inner.config.reset_on_return);
            tracing::trace!(connection = id, needs_reset = meta.needs_reset, "connection returned");
            self.inner.idle.lock().push_back(IdleConnection { connection, meta });
        }
        self.inner.semaphore.add_permits(1);
    }

    /// Close idle connections that exceeded their idle timeout or lifetime.
    ///
    /// Returns how many were closed.
    pub fn prune(&self) -> usize {
        let config = &self.inner.config;
        let mut idle = self.inner.idle.lock();
        let before = idle.len();
        idle.retain(|c| c.meta.expiry(config).is_none());
        let pruned = before - idle.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned expired idle connections");
        }
        pruned
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let available = self.inner.idle.lock().len() as u32;
        let in_use = self.inner.in_use.lock().len() as u32;
        PoolStatus {
            available,
            in_use,
            total: available + in_use,
            max: self.inner.config.max_connections,
        }
    }

    /// Close the pool.
    ///
    /// Idle connections are dropped, waiters fail with
    /// [`PoolError::PoolClosed`], and connections still checked out are
    /// dropped when returned.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();
        let dropped = self.inner.idle.lock().drain(..).count();
        tracing::info!(dropped, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl PoolInner {
    async fn acquire_permit(&self, wait: Duration) -> Result<OwnedSemaphorePermit, PoolError> {
        let semaphore = Arc::clone(&self.semaphore);
        if wait.is_zero() {
            return semaphore.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => PoolError::AcquisitionTimeout(wait),
                TryAcquireError::Closed => PoolError::PoolClosed,
            });
        }
        match tokio::time::timeout(wait, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PoolError::PoolClosed),
            Err(_) => {
                tracing::debug!(waited_ms = wait.as_millis() as u64, "connection acquisition timed out");
                Err(PoolError::AcquisitionTimeout(wait))
            }
        }
    }

    async fn open(&self) -> Result<IdleConnection, PoolError> {
        let connection = self.connector.connect().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(IdleConnection {
            connection,
            meta: ConnectionMetadata::new(id),
        })
    }

    async fn prepare(&self, idle: &mut IdleConnection) -> Result<(), &'static str> {
        if let Some(expiry) = idle.meta.expiry(&self.config) {
            return Err(expiry.reason());
        }
        if self.config.test_on_checkout && !idle.connection.is_valid() {
            return Err("validation failed");
        }
        if idle.meta.needs_reset {
            idle.meta.state = ConnectionState::Resetting;
            if let Err(e) = idle.connection.reset().await {
                tracing::warn!(connection = idle.meta.id, error = %e, "connection reset failed");
                return Err("reset failed");
            }
        }
        Ok(())
    }

    fn checkout(&self, mut idle: IdleConnection, permit: OwnedSemaphorePermit) -> Leased {
        // Returned by `put`.
        permit.forget();
        idle.meta.mark_checkout();
        let id = idle.meta.id;
        self.in_use.lock().insert(id, idle.meta);
        Leased::new(id, idle.connection)
    }
}

#[async_trait]
impl ConnectionPool for Pool {
    async fn acquire(&self, timeout: Option<Duration>) -> bindery::Result<Leased> {
        Ok(self.get(timeout).await?)
    }

    fn release(&self, connection: Leased) {
        self.put(connection);
    }

    fn status(&self) -> PoolStatus {
        Pool::status(self)
    }

    async fn close(&self) {
        Pool::close(self).await;
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bindery::{CompiledStatement, CursorId, ExecuteResult, Row, TransactionOptions};
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        valid: Arc<AtomicBool>,
        resets: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for Probe {
        async fn fetch_all(&mut self, _: &CompiledStatement) -> bindery::Result<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn execute(&mut self, _: &CompiledStatement) -> bindery::Result<ExecuteResult> {
            Ok(ExecuteResult::from_status("SELECT 0"))
        }
        async fn begin(&mut self, _: &TransactionOptions) -> bindery::Result<()> {
            Ok(())
        }
        async fn commit(&mut self) -> bindery::Result<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> bindery::Result<()> {
            Ok(())
        }
        async fn open_cursor(&mut self, _: &CompiledStatement) -> bindery::Result<CursorId> {
            Ok(CursorId(1))
        }
        async fn fetch_cursor(&mut self, _: CursorId, _: usize) -> bindery::Result<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn close_cursor(&mut self, _: CursorId) -> bindery::Result<()> {
            Ok(())
        }
        fn is_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }
        async fn reset(&mut self) -> bindery::Result<()> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct ProbeConnector {
        opened: Arc<AtomicUsize>,
        valid: Arc<AtomicBool>,
        resets: Arc<AtomicUsize>,
    }

    impl ProbeConnector {
        fn new() -> Self {
            let connector = Self::default();
            connector.valid.store(true, Ordering::SeqCst);
            connector
        }
    }

    #[async_trait]
    impl Connector for ProbeConnector {
        async fn connect(&self) -> Result<Box<dyn Connection>, PoolError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Probe {
                valid: Arc::clone(&self.valid),
                resets: Arc::clone(&self.resets),
            }))
        }
    }

    #[tokio::test]
    async fn test_min_connections_opened_up_front() {
        let connector = ProbeConnector::new();
        let config = PoolConfig::new().min_connections(2).max_connections(4);
        let pool = Pool::new(config, connector.clone()).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        let status = pool.status();
        assert_eq!(status.available, 2);
        assert_eq!(status.in_use, 0);
        assert_eq!(status.max, 4);
    }

    #[tokio::test]
    async fn test_idle_connection_reused() {
        let connector = ProbeConnector::new();
        let pool = Pool::new(PoolConfig::new().reset_on_return(false), connector.clone())
            .await
            .unwrap();

        let first = pool.get(None).await.unwrap();
        let id = first.id();
        pool.put(first);
        let second = pool.get(None).await.unwrap();
        assert_eq!(second.id(), id);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(connector.resets.load(Ordering::SeqCst), 0);
        pool.put(second);
    }

    #[tokio::test]
    async fn test_reset_before_reuse() {
        let connector = ProbeConnector::new();
        let pool = Pool::new(PoolConfig::new().reset_on_return(false), connector.clone())
            .await
            .unwrap();

        let mut leased = pool.get(None).await.unwrap();
        leased.mark_reset_required();
        pool.put(leased);
        assert_eq!(connector.resets.load(Ordering::SeqCst), 0);

        let leased = pool.get(None).await.unwrap();
        assert_eq!(connector.resets.load(Ordering::SeqCst), 1);
        pool.put(leased);
    }

    #[tokio::test]
    async fn test_zero_timeout_on_exhausted_pool() {
        let pool = Pool::new(PoolConfig::new().max_connections(1), ProbeConnector::new())
            .await
            .unwrap();
        let held = pool.get(None).await.unwrap();

        let result = pool.get(Some(Duration::ZERO)).await;
        assert!(matches!(result, Err(PoolError::AcquisitionTimeout(d)) if d.is_zero()));
        assert!(pool.status().is_at_capacity());

        pool.put(held);
        assert!(pool.get(Some(Duration::ZERO)).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_connection_discarded_on_checkout() {
        let connector = ProbeConnector::new();
        let pool = Pool::new(PoolConfig::new().min_connections(1), connector.clone())
            .await
            .unwrap();

        connector.valid.store(false, Ordering::SeqCst);
        let leased = pool.get(None).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        pool.put(leased);
    }

    #[tokio::test]
    async fn test_close_rejects_and_drops() {
        let pool = Pool::new(PoolConfig::new(), ProbeConnector::new()).await.unwrap();
        let held = pool.get(None).await.unwrap();

        pool.close().await;
        assert!(pool.is_closed());
        assert!(matches!(pool.get(None).await, Err(PoolError::PoolClosed)));

        pool.put(held);
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let pool = Pool::new(
            PoolConfig::new().min_connections(2).idle_timeout(Duration::from_millis(1)),
            ProbeConnector::new(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(pool.prune(), 2);
        assert_eq!(pool.status().available, 0);
    }
}
