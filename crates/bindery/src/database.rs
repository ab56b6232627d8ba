//! Application-wide database handle.
//!
//! A [`Database`] carries a default dialect and a default bind that can be
//! swapped at runtime, so application code can build statements before the
//! engine exists and bind them later.

use std::fmt;
use std::sync::Arc;

use bindery_types::{Row, SqlValue};
use parking_lot::RwLock;

use crate::acquire::{AcquireOptions, AcquiredConnection};
use crate::bind::Bind;
use crate::connection::ExecuteResult;
use crate::cursor::CursorFactory;
use crate::dialect::{BaseDialect, CompiledStatement, Dialect};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::executor::QueryExecutor;
use crate::params::Params;
use crate::statement::Statement;
use crate::transaction::{Transaction, TransactionOptions};

struct DatabaseInner {
    dialect: Arc<dyn Dialect>,
    bind: RwLock<Option<Bind>>,
}

/// Default bind and dialect shared by an application.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Create an unbound database using `dialect` for compilation.
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                dialect,
                bind: RwLock::new(None),
            }),
        }
    }

    /// Create a database bound to `engine`, using the engine's dialect.
    pub fn with_bind(engine: &Engine) -> Self {
        let db = Self::new(Arc::clone(engine.dialect()));
        db.set_bind(engine);
        db
    }

    /// Dialect used by [`compile`](Database::compile).
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.inner.dialect
    }

    /// Replace the default bind.
    pub fn set_bind(&self, bind: impl Into<Bind>) {
        let bind = bind.into();
        tracing::debug!(bind = ?bind, "database bind set");
        *self.inner.bind.write() = Some(bind);
    }

    /// Remove the default bind, returning it.
    pub fn clear_bind(&self) -> Option<Bind> {
        self.inner.bind.write().take()
    }

    /// Whether a default bind is configured.
    pub fn is_bound(&self) -> bool {
        self.inner.bind.read().is_some()
    }

    /// The bind statements run on right now.
    ///
    /// When the configured engine has a connection registered for the
    /// current task, that connection is returned so statements join the
    /// task's transaction.
    pub fn bind(&self) -> Option<Bind> {
        let configured = self.inner.bind.read().clone()?;
        let current = configured.engine().and_then(Engine::current_connection);
        Some(current.map(Bind::Connection).unwrap_or(configured))
    }

    fn require_bind(&self) -> Result<Bind> {
        self.bind().ok_or(Error::NoBind)
    }

    /// An executor for `statement`.
    ///
    /// The database's bind takes precedence over the statement's own. An
    /// executor with neither fails with [`Error::NoBind`] when run.
    pub fn executor(&self, statement: &Statement) -> QueryExecutor {
        let executor = QueryExecutor::new(statement.clone());
        match self.bind() {
            Some(bind) => executor.bind(bind),
            None => executor,
        }
    }

    /// Fetch every row.
    pub async fn all(&self, statement: &Statement, params: impl Into<Params>) -> Result<Vec<Row>> {
        self.executor(statement).all(params).await
    }

    /// Fetch the first row.
    pub async fn first(
        &self,
        statement: &Statement,
        params: impl Into<Params>,
    ) -> Result<Option<Row>> {
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

    /// Acquire a connection from the default bind.
    pub async fn acquire(&self, options: AcquireOptions) -> Result<AcquiredConnection> {
        self.require_bind()?.acquire(options).await
    }

    /// A transaction on the default bind.
    pub fn transaction(&self) -> Result<Transaction> {
        Ok(Transaction::new(self.require_bind()?, TransactionOptions::default()))
    }

    /// Compile `statement` with the database's dialect.
    pub fn compile(&self, statement: &Statement, params: impl Into<Params>) -> Result<CompiledStatement> {
        self.inner.dialect.compile(statement, &params.into())
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(Arc::new(BaseDialect::default()))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.inner.dialect.name())
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_unbound_database() {
        let db = Database::default();
        assert!(!db.is_bound());
        assert!(db.bind().is_none());
        assert!(matches!(db.transaction(), Err(Error::NoBind)));
    }

    #[test]
    fn test_compile_with_default_dialect() {
        let db = Database::default();
        let statement = Statement::new("SELECT * FROM users WHERE id = :id");
        let compiled = db
            .compile(&statement, Params::new().named("id", 7))
            .unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM users WHERE id = $1");
        assert_eq!(compiled.params, vec![SqlValue::Int(7)]);

        let compiled = db.compile(&Statement::new("SELECT $1"), params![1]).unwrap();
        assert_eq!(compiled.params.len(), 1);
    }

    #[tokio::test]
    async fn test_unbound_executor_fails() {
        let db = Database::default();
        let result = db.all(&Statement::new("SELECT 1"), ()).await;
        assert!(matches!(result, Err(Error::NoBind)));
    }
}
