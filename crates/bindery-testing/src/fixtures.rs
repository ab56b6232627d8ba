//! Ready-made engines over a mock backend.

use std::sync::Arc;
use std::time::Duration;

use bindery::{Engine, EngineConfig};
use bindery_pool::{Pool, PoolConfig, PoolError};

use crate::dialect::RecordingDialect;
use crate::mock::MockBackend;

/// An engine wired to a [`MockBackend`] through a real [`Pool`].
#[derive(Debug, Clone)]
pub struct TestEngine {
    /// The engine under test.
    pub engine: Engine,
    /// The pool behind the engine.
    pub pool: Pool,
    /// The backend that records operations.
    pub backend: MockBackend,
    /// The dialect that records dispatches.
    pub dialect: Arc<RecordingDialect>,
}

impl TestEngine {
    /// An engine over a pool of at most `max_connections`.
    pub async fn new(backend: MockBackend, max_connections: u32) -> Result<Self, PoolError> {
        Self::with_config(
            backend,
            PoolConfig::new()
                .max_connections(max_connections)
                .connection_timeout(Duration::from_secs(5)),
            EngineConfig::default(),
        )
        .await
    }

    /// An engine with explicit pool and engine configuration.
    pub async fn with_config(
        backend: MockBackend,
        pool_config: PoolConfig,
        engine_config: EngineConfig,
    ) -> Result<Self, PoolError> {
        let pool = Pool::new(pool_config, backend.connector()).await?;
        let dialect = RecordingDialect::shared();
        let engine = Engine::with_config(
            Arc::new(pool.clone()),
            Arc::clone(&dialect) as Arc<dyn bindery::Dialect>,
            engine_config,
        );
        Ok(Self {
            engine,
            pool,
            backend,
            dialect,
        })
    }
}
