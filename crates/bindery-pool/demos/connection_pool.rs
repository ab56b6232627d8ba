//! Connection pool with an engine on top.
//!
//! Runs against an in-process connection that answers every query with the
//! id of the connection it ran on, which makes pool reuse visible.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=debug cargo run -p bindery-pool --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bindery::{
    BaseDialect, CompiledStatement, Connection, CursorId, Engine, ExecuteResult, PoolStatus, Row,
    SqlValue, TransactionOptions,
};
use bindery_pool::{Connector, Pool, PoolConfig, PoolError};
use tokio::time::Instant;

struct EchoConnection {
    id: u64,
}

#[async_trait]
impl Connection for EchoConnection {
    async fn fetch_all(&mut self, _statement: &CompiledStatement) -> bindery::Result<Vec<Row>> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = i64::try_from(self.id).unwrap_or_default();
        Ok(vec![Row::from_values(["connection"], vec![SqlValue::BigInt(id)])])
    }

    async fn execute(&mut self, _statement: &CompiledStatement) -> bindery::Result<ExecuteResult> {
        Ok(ExecuteResult::from_status("UPDATE 1"))
    }

    async fn begin(&mut self, options: &TransactionOptions) -> bindery::Result<()> {
        println!("  [conn {}] {}", self.id, options.begin_sql());
        Ok(())
    }

    async fn commit(&mut self) -> bindery::Result<()> {
        println!("  [conn {}] COMMIT", self.id);
        Ok(())
    }

    async fn rollback(&mut self) -> bindery::Result<()> {
        println!("  [conn {}] ROLLBACK", self.id);
        Ok(())
    }

    async fn open_cursor(&mut self, _statement: &CompiledStatement) -> bindery::Result<CursorId> {
        Ok(CursorId(self.id))
    }

    async fn fetch_cursor(&mut self, _cursor: CursorId, _count: usize) -> bindery::Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn close_cursor(&mut self, _cursor: CursorId) -> bindery::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct EchoConnector {
    next: AtomicU64,
}

#[async_trait]
impl Connector for EchoConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, PoolError> {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Box::new(EchoConnection { id }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Connection Pool Example ===\n");

    let pool_config = PoolConfig::new()
        .min_connections(2)
        .max_connections(4)
        .connection_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300));

    println!("Pool configuration:");
    println!("  Min connections: {}", pool_config.min_connections);
    println!("  Max connections: {}", pool_config.max_connections);
    println!("  Idle timeout: {:?}", pool_config.idle_timeout);
    println!();

    let pool = Pool::new(pool_config, EchoConnector::default()).await?;
    let engine = Engine::new(Arc::new(pool), Arc::new(BaseDialect::default()));
    print_pool_status(&engine.pool_status());

    // Example 1: one statement, one checkout
    println!("\n1. Basic usage:");
    let whoami = engine.statement("SELECT connection_id()");
    let id: Option<i64> = engine.executor(&whoami).scalar_as(()).await?;
    println!("  Ran on connection {}", id.unwrap_or_default());

    // Example 2: more tasks than connections
    println!("\n2. Concurrent usage (10 tasks, 4 connections):");
    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..10 {
        let engine = engine.clone();
        let whoami = whoami.clone();
        handles.push(tokio::spawn(async move {
            let id: Option<i64> = engine.executor(&whoami).scalar_as(()).await?;
            Ok::<_, bindery::Error>((task, id.unwrap_or_default()))
        }));
    }
    for handle in handles {
        let (task, id) = handle.await??;
        println!("  Task {task} ran on connection {id}");
    }
    println!("  Elapsed: {:?}", start.elapsed());
    print_pool_status(&engine.pool_status());

    // Example 3: statements inside a transaction share its connection
    println!("\n3. Transaction:");
    let update = engine.statement("UPDATE accounts SET balance = balance - 1");
    engine
        .transaction()
        .run(|| async {
            let before: Option<i64> = engine.executor(&whoami).scalar_as(()).await?;
            engine.status(&update, ()).await?;
            let after: Option<i64> = engine.executor(&whoami).scalar_as(()).await?;
            println!("  Statements ran on {before:?} and {after:?}");
            Ok::<_, bindery::Error>(())
        })
        .await?;

    engine.close().await;
    println!("\nPool closed.");
    Ok(())
}

fn print_pool_status(status: &PoolStatus) {
    println!(
        "Pool status: {} idle, {} in use, {}/{} total ({:.0}% utilized)",
        status.available,
        status.in_use,
        status.total,
        status.max,
        status.utilization()
    );
}
