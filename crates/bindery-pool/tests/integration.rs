//! Connection pool integration tests.
//!
//! These run against an in-process connector and need no database:
//!
//! ```bash
//! cargo test -p bindery-pool --test integration
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bindery::{
    CompiledStatement, Connection, ConnectionPool, CursorId, ExecuteResult, Row,
    TransactionOptions,
};
use bindery_pool::{Connector, Pool, PoolConfig, PoolError};

struct Idle;

#[async_trait]
impl Connection for Idle {
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
        Ok(CursorId(0))
    }
    async fn fetch_cursor(&mut self, _: CursorId, _: usize) -> bindery::Result<Vec<Row>> {
        Ok(Vec::new())
    }
    async fn close_cursor(&mut self, _: CursorId) -> bindery::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Counting {
    opened: Arc<AtomicU32>,
    refuse: Arc<AtomicBool>,
}

#[async_trait]
impl Connector for Counting {
    async fn connect(&self) -> Result<Box<dyn Connection>, PoolError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PoolError::ConnectionCreation("refused".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Idle))
    }
}

fn config(max: u32) -> PoolConfig {
    PoolConfig::new()
        .max_connections(max)
        .connection_timeout(Duration::from_secs(5))
}

// =============================================================================
// Bounds
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_stay_within_max() {
    let connector = Counting::default();
    let pool = Pool::new(config(3), connector.clone()).await.unwrap();
    let peak = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let pool = pool.clone();
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            let leased = pool.get(None).await.unwrap();
            peak.fetch_max(pool.status().in_use, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            pool.put(leased);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(connector.opened.load(Ordering::SeqCst) <= 3);
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.total, status.available);
}

#[tokio::test]
async fn test_waiter_is_served_after_return() {
    let pool = Pool::new(config(1), Counting::default()).await.unwrap();
    let held = pool.get(None).await.unwrap();
    let held_id = held.id();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.get(Some(Duration::from_secs(1))).await.map(|c| c.id()) }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!waiter.is_finished());

    pool.put(held);
    assert_eq!(waiter.await.unwrap().unwrap(), held_id);
}

#[tokio::test]
async fn test_failed_connect_frees_slot() {
    let connector = Counting::default();
    let pool = Pool::new(config(1), connector.clone()).await.unwrap();

    connector.refuse.store(true, Ordering::SeqCst);
    let err = pool.get(None).await.unwrap_err();
    assert!(matches!(err, PoolError::ConnectionCreation(_)));

    connector.refuse.store(false, Ordering::SeqCst);
    let leased = pool.get(Some(Duration::ZERO)).await.unwrap();
    pool.put(leased);
}

// =============================================================================
// Closing
// =============================================================================

#[tokio::test]
async fn test_close_fails_waiters_and_drops_returns() {
    let pool = Pool::new(config(1), Counting::default()).await.unwrap();
    let held = pool.get(None).await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.get(None).await.map(|c| c.id()) }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.close().await;
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    assert!(matches!(pool.get(None).await, Err(PoolError::PoolClosed)));

    pool.put(held);
    assert_eq!(pool.status().total, 0);
}

// =============================================================================
// Through the pool boundary
// =============================================================================

#[tokio::test]
async fn test_errors_map_to_binding_errors() {
    let pool: Arc<dyn ConnectionPool> =
        Arc::new(Pool::new(config(1), Counting::default()).await.unwrap());

    let held = pool.acquire(None).await.unwrap();
    let err = pool.acquire(Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(err, bindery::Error::AcquireTimeout(d) if d.is_zero()));

    pool.release(held);
    pool.close().await;
    assert!(matches!(
        pool.acquire(None).await,
        Err(bindery::Error::PoolClosed)
    ));
}
