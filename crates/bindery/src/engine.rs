//! Engines: a pool, a dialect and a task-local store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bindery_types::{Row, SqlValue};
use tracing::Instrument;

use crate::acquire::{AcquireOptions, AcquiredConnection, ConnectionCell, ConnectionRef, ConnectionStore};
use crate::bind::LocalHandle;
use crate::connection::ExecuteResult;
use crate::cursor::CursorFactory;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::instrumentation::{SanitizationConfig, span_names};
use crate::params::Params;
use crate::pool::{ConnectionPool, PoolStatus};
use crate::statement::{ExecutionOptions, Statement};
use crate::transaction::{Transaction, TransactionOptions};

/// Engine configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct EngineConfig {
    /// Acquisition timeout used when an operation does not set one.
    pub acquire_timeout: Option<Duration>,

    /// Options every statement run through the engine starts from.
    pub execution_options: ExecutionOptions,

    /// Whether the task-local store starts enabled.
    pub task_local: bool,

    /// How statements are rendered in log events.
    pub sanitization: SanitizationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: None,
            execution_options: ExecutionOptions::default(),
            task_local: true,
            sanitization: SanitizationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set the default execution options.
    #[must_use]
    pub fn execution_options(mut self, options: ExecutionOptions) -> Self {
        self.execution_options = options;
        self
    }

    /// Enable or disable the task-local store.
    #[must_use]
    pub fn task_local(mut self, enabled: bool) -> Self {
        self.task_local = enabled;
        self
    }

    /// Set how statements are rendered in log events.
    #[must_use]
    pub fn sanitization(mut self, sanitization: SanitizationConfig) -> Self {
        self.sanitization = sanitization;
        self
    }
}

struct EngineInner {
    pool: Arc<dyn ConnectionPool>,
    dialect: Arc<dyn Dialect>,
    store: Arc<ConnectionStore>,
    config: EngineConfig,
}

/// A pool paired with the dialect that runs statements on its connections.
///
/// Cloning an engine is cheap; clones share the pool and the task-local
/// store. Each engine has its own store, so a connection reused inside one
/// engine is never handed out by another.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new(pool: Arc<dyn ConnectionPool>, dialect: Arc<dyn Dialect>) -> Self {
        Self::with_config(pool, dialect, EngineConfig::default())
    }

    /// Create an engine with `config`.
    pub fn with_config(
        pool: Arc<dyn ConnectionPool>,
        dialect: Arc<dyn Dialect>,
        config: EngineConfig,
    ) -> Self {
        let store = if config.task_local {
            ConnectionStore::new()
        } else {
            ConnectionStore::disabled()
        };
        tracing::info!(dialect = dialect.name(), "engine created");
        Self {
            inner: Arc::new(EngineInner {
                pool,
                dialect,
                store: Arc::new(store),
                config,
            }),
        }
    }

    /// Dialect of the engine.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.inner.dialect
    }

    /// Pool of the engine.
    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.inner.pool
    }

    /// Task-local store, for explicit enable, disable and reset.
    pub fn store(&self) -> &ConnectionStore {
        &self.inner.store
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Default execution options.
    pub fn execution_options(&self) -> &ExecutionOptions {
        &self.inner.config.execution_options
    }

    /// Acquire a connection.
    ///
    /// With `reuse`, the connection already registered for the current task
    /// is returned as borrowed. Otherwise a connection is checked out (or,
    /// with `lazy`, promised) and, when `reusable` and the task has none
    /// yet, registered for the task until it is released.
    pub async fn acquire(&self, options: AcquireOptions) -> Result<AcquiredConnection> {
        if options.reuse {
            if let Some(cell) = self.current_cell() {
                tracing::debug!(connection = cell.id(), "reusing task-local connection");
                return Ok(AcquiredConnection::borrowed(cell));
            }
        }

        let inner = &self.inner;
        let timeout = options.timeout.or(inner.config.acquire_timeout);
        let cell = if options.lazy {
            ConnectionCell::pending(Arc::clone(&inner.dialect), Arc::clone(&inner.pool), timeout)
        } else {
            let leased = inner
                .pool
                .acquire(timeout)
                .instrument(tracing::debug_span!(
                    span_names::ACQUIRE,
                    timeout_ms = ?timeout.map(|t| t.as_millis())
                ))
                .await?;
            ConnectionCell::ready(leased, Arc::clone(&inner.dialect))
        };
        let cell = Arc::new(cell);

        let registration = if options.reusable {
            inner
                .store
                .register(Arc::clone(&cell))
                .map(|key| (Arc::clone(&inner.store), key))
        } else {
            None
        };
        tracing::debug!(
            connection = cell.id(),
            lazy = options.lazy,
            registered = registration.is_some(),
            "connection acquired"
        );
        Ok(AcquiredConnection::owned(cell, Arc::clone(&inner.pool), registration))
    }

    pub(crate) fn current_cell(&self) -> Option<Arc<ConnectionCell>> {
        self.inner.store.get().filter(|cell| !cell.is_released())
    }

    /// The connection registered for the current task, if any.
    pub fn current_connection(&self) -> Option<ConnectionRef> {
        self.current_cell().map(ConnectionRef::from_cell)
    }

    /// Handle that binds statements to the current task's connection.
    pub fn local(&self) -> LocalHandle {
        LocalHandle::new(self.clone())
    }

    /// A statement bound to this engine.
    pub fn statement(&self, sql: impl Into<Arc<str>>) -> Statement {
        Statement::new(sql).with_bind(self)
    }

    /// An executor for `statement` on this engine.
    pub fn executor(&self, statement: &Statement) -> QueryExecutor {
        QueryExecutor::new(statement.clone()).bind(self)
    }

    /// A transaction on this engine with default options.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self, TransactionOptions::default())
    }

    /// Fetch every row.
    pub async fn all(&self, statement: &Statement, params: impl Into<Params>) -> Result<Vec<Row>> {
        self.executor(statement).all(params).await
    }

    /// Fetch the first row.
    pub async fn first(&self, statement: &Statement, params: impl Into<Params>) -> Result<Option<Row>> {
        self.executor(statement).first(params).await
    }

    /// Fetch the first column of the first row.
    pub async fn scalar(
        &self,
        statement: &Statement,
        params: impl Into<Params>,
    ) -> Result<Option<SqlValue>> {
        self.executor(statement).scalar(params).await
    }

    /// Execute and report the status.
    pub async fn status(
        &self,
        statement: &Statement,
        params: impl Into<Params>,
    ) -> Result<ExecuteResult> {
        self.executor(statement).status(params).await
    }

    /// Lazily iterate over the rows of `statement`.
    pub fn iterate(&self, statement: &Statement, params: impl Into<Params>) -> CursorFactory {
        self.executor(statement).iterate(params)
    }

    /// Status of the pool.
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// Close the pool.
    pub async fn close(&self) {
        let cleared = self.inner.store.clear();
        self.inner.pool.close().await;
        tracing::info!(cleared, "engine closed");
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("dialect", &self.inner.dialect.name())
            .field("pool", &self.inner.pool.status())
            .field("task_local", &self.inner.store.is_enabled())
            .finish()
    }
}
