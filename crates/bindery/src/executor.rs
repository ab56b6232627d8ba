//! Per-statement query facade.
//!
//! Every operation follows the same path: resolve the bind, acquire a
//! connection with reuse enabled, dispatch to the connection's dialect and
//! release the connection, whatever the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bindery_types::{FromSql, Row, SqlValue};
use futures_util::future::BoxFuture;
use tracing::Instrument;

use crate::acquire::{AcquireOptions, AcquiredConnection};
use crate::bind::Bind;
use crate::connection::{Connection, ExecuteResult};
use crate::cursor::CursorFactory;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::from_row::FromRow;
use crate::instrumentation::{self, span_names};
use crate::params::Params;
use crate::statement::{ExecutionOptions, RowModel, Statement};

type DispatchFn<T> = for<'a> fn(
    &'a dyn Dialect,
    &'a mut dyn Connection,
    &'a Statement,
    &'a Params,
) -> BoxFuture<'a, Result<T>>;

/// Build an executor for a statement.
pub fn executor_for(statement: &Statement) -> QueryExecutor {
    QueryExecutor::new(statement.clone())
}

/// Executes one statement in one of five modes.
///
/// Builder calls return a new executor over a new statement view; the
/// statement the executor was created from is never modified.
///
/// # Example
///
/// ```rust,ignore
/// let users = executor_for(&statement)
///     .model(&user_model)
///     .timeout(Duration::from_secs(5))
///     .all(params![42])
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    statement: Statement,
    bind: Option<Bind>,
}

impl QueryExecutor {
    /// Create an executor for `statement`.
    pub fn new(statement: Statement) -> Self {
        Self {
            statement,
            bind: None,
        }
    }

    /// Statement view this executor runs.
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    fn with_options(self, options: ExecutionOptions) -> Self {
        Self {
            statement: self.statement.execution_options(&options),
            bind: self.bind,
        }
    }

    /// Load rows through `model`. Only a weak reference is kept.
    #[must_use]
    pub fn model<M: RowModel + 'static>(self, model: &Arc<M>) -> Self {
        self.with_options(ExecutionOptions::new().with_model(model))
    }

    /// Toggle loading rows through the model.
    #[must_use]
    pub fn return_model(self, return_model: bool) -> Self {
        self.with_options(ExecutionOptions::new().with_return_model(return_model))
    }

    /// Bound the execution wait.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.with_options(ExecutionOptions::new().with_timeout(timeout))
    }

    /// Run on `bind` instead of the statement's own bind.
    #[must_use]
    pub fn bind(mut self, bind: impl Into<Bind>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    fn resolve_bind(&self) -> Result<Bind> {
        self.bind
            .as_ref()
            .or_else(|| self.statement.bind())
            .cloned()
            .ok_or(Error::NoBind)
    }

    /// Fetch every row. An empty result is an empty vector.
    pub async fn all(&self, params: impl Into<Params>) -> Result<Vec<Row>> {
        self.dispatch(params.into(), "all", |dialect, connection, statement, params| {
            dialect.do_all(connection, statement, params)
        })
        .await
    }

    /// Fetch the first row, or `None` when there are no rows.
    pub async fn first(&self, params: impl Into<Params>) -> Result<Option<Row>> {
        self.dispatch(params.into(), "first", |dialect, connection, statement, params| {
            dialect.do_first(connection, statement, params)
        })
        .await
    }

    /// Fetch the first column of the first row, or `None` when there are
    /// no rows.
    pub async fn scalar(&self, params: impl Into<Params>) -> Result<Option<SqlValue>> {
        self.dispatch(params.into(), "scalar", |dialect, connection, statement, params| {
            dialect.do_scalar(connection, statement, params)
        })
        .await
    }

    /// Execute and report the backend status.
    pub async fn status(&self, params: impl Into<Params>) -> Result<ExecuteResult> {
        self.dispatch(params.into(), "status", |dialect, connection, statement, params| {
            dialect.do_status(connection, statement, params)
        })
        .await
    }

    /// Fetch every row mapped to `T`.
    pub async fn all_as<T: FromRow>(&self, params: impl Into<Params>) -> Result<Vec<T>> {
        self.all(params).await?.iter().map(T::from_row).collect()
    }

    /// Fetch the first row mapped to `T`.
    pub async fn first_as<T: FromRow>(&self, params: impl Into<Params>) -> Result<Option<T>> {
        self.first(params).await?.as_ref().map(T::from_row).transpose()
    }

    /// Fetch the scalar converted to `T`.
    pub async fn scalar_as<T: FromSql>(&self, params: impl Into<Params>) -> Result<Option<T>> {
        match self.scalar(params).await? {
            Some(value) => Ok(T::from_sql_nullable(&value)?),
            None => Ok(None),
        }
    }

    /// Lazily iterate over the rows. Nothing runs until a cursor is read.
    pub fn iterate(&self, params: impl Into<Params>) -> CursorFactory {
        CursorFactory::new(self.statement.clone(), self.bind.clone(), params.into())
    }

    async fn dispatch<T>(
        &self,
        params: Params,
        operation: &'static str,
        call: DispatchFn<T>,
    ) -> Result<T> {
        let bind = self.resolve_bind()?;
        let statement = self.statement.with_defaults(&bind.execution_options());
        if tracing::enabled!(tracing::Level::DEBUG) {
            let sanitization = bind
                .engine()
                .map(|engine| engine.config().sanitization.clone())
                .unwrap_or_default();
            tracing::debug!(
                operation,
                db.operation = instrumentation::extract_operation(statement.sql()),
                db.statement = %sanitization.sanitize(statement.sql()),
                "dispatching statement"
            );
        }

        let span = tracing::debug_span!(
            span_names::QUERY,
            operation,
            db.system = bind.dialect().name()
        );
        async {
            let connection = bind.acquire(AcquireOptions::new().reuse(true)).await?;
            let started = Instant::now();
            let result = run_on(&connection, &statement, &params, call).await;
            tracing::debug!(
                connection = connection.id(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "statement finished"
            );
            connection.release();
            result
        }
        .instrument(span)
        .await
    }
}

async fn run_on<T>(
    connection: &AcquiredConnection,
    statement: &Statement,
    params: &Params,
    call: DispatchFn<T>,
) -> Result<T> {
    let dialect = Arc::clone(connection.dialect());
    let mut guard = connection.lock().await?;
    let pending = call(dialect.as_ref(), &mut *guard, statement, params);
    match statement.options().timeout() {
        Some(limit) => match tokio::time::timeout(limit, pending).await {
            Ok(result) => result,
            Err(_) => {
                connection.mark_reset_required();
                tracing::warn!(
                    connection = connection.id(),
                    timeout_ms = limit.as_millis() as u64,
                    "statement timed out"
                );
                Err(Error::CommandTimeout(limit))
            }
        },
        None => pending.await,
    }
}

impl From<Statement> for QueryExecutor {
    fn from(statement: Statement) -> Self {
        Self::new(statement)
    }
}

