//! Scripted in-memory backend.
//!
//! A [`MockBackend`] holds canned responses keyed by compiled SQL text and
//! records every operation its connections perform, so tests can assert on
//! exactly which `BEGIN`, `COMMIT`, `ROLLBACK` and cursor calls reached the
//! backend and on which connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bindery::{
    CompiledStatement, Connection, CursorId, Error, ExecuteResult, Result, Row, SqlValue,
    TransactionOptions,
};
use bindery_pool::{Connector, PoolError};
use parking_lot::{Mutex, RwLock};

/// A canned backend response.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row values.
        rows: Vec<Vec<SqlValue>>,
    },

    /// Report a command status such as `UPDATE 3`.
    Status(String),

    /// Fail with a statement error.
    Error {
        /// Backend error code.
        code: Option<String>,
        /// Error message.
        message: String,
    },

    /// Fail with a connection error.
    ConnectionLost(String),

    /// Wait, then answer with the inner response.
    Delayed(Duration, Box<MockResponse>),

    /// Compute the response from the SQL text.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", &rows.len())
                .finish(),
            Self::Status(status) => f.debug_tuple("Status").field(status).finish(),
            Self::Error { code, message } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish(),
            Self::ConnectionLost(message) => f.debug_tuple("ConnectionLost").field(message).finish(),
            Self::Delayed(delay, inner) => f.debug_tuple("Delayed").field(delay).field(inner).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl MockResponse {
    /// Rows under the given column names.
    pub fn rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<SqlValue>>,
    ) -> Self {
        Self::Rows {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// A single row with a single column.
    pub fn scalar(value: impl Into<SqlValue>) -> Self {
        Self::rows(["value"], vec![vec![value.into()]])
    }

    /// `count` rows numbered from 1 in a column named `n`.
    pub fn sequence(count: i64) -> Self {
        Self::rows(["n"], (1..=count).map(|n| vec![SqlValue::BigInt(n)]).collect())
    }

    /// No rows.
    pub fn empty() -> Self {
        Self::rows(Vec::<String>::new(), Vec::new())
    }

    /// A command status.
    pub fn status(status: impl Into<String>) -> Self {
        Self::Status(status.into())
    }

    /// A statement error.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Answer with `self` after `delay`.
    #[must_use]
    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }

    fn into_rows(self) -> Result<Vec<Row>> {
        match self {
            Self::Rows { columns, rows } => {
                let columns: Arc<[String]> = Arc::from(columns);
                Ok(rows
                    .into_iter()
                    .map(|values| Row::new(Arc::clone(&columns), values))
                    .collect())
            }
            Self::Status(_) => Ok(Vec::new()),
            other => Err(other.into_error()),
        }
    }

    fn into_status(self) -> Result<ExecuteResult> {
        match self {
            Self::Status(status) => Ok(ExecuteResult::from_status(&status)),
            Self::Rows { rows, .. } => Ok(ExecuteResult::new(
                rows.len() as u64,
                format!("SELECT {}", rows.len()),
            )),
            other => Err(other.into_error()),
        }
    }

    fn into_error(self) -> Error {
        match self {
            Self::Error {
                code: Some(code),
                message,
            } => Error::statement_with_code(code, message),
            Self::Error { code: None, message } => Error::statement(message),
            Self::ConnectionLost(message) => Error::Connection(message),
            other => Error::statement(format!("unexpected mock response {other:?}")),
        }
    }
}

/// An operation recorded by a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Connection opened by the connector.
    Connect {
        /// Connection id.
        connection: u64,
    },
    /// Rows fetched.
    Fetch {
        /// Connection id.
        connection: u64,
        /// Compiled SQL.
        sql: String,
    },
    /// Statement executed for its status.
    Execute {
        /// Connection id.
        connection: u64,
        /// Compiled SQL.
        sql: String,
    },
    /// Transaction begun.
    Begin {
        /// Connection id.
        connection: u64,
        /// The `BEGIN` statement for the requested options.
        sql: String,
    },
    /// Transaction committed.
    Commit {
        /// Connection id.
        connection: u64,
    },
    /// Transaction rolled back.
    Rollback {
        /// Connection id.
        connection: u64,
    },
    /// Cursor opened.
    OpenCursor {
        /// Connection id.
        connection: u64,
        /// Cursor id.
        cursor: u64,
        /// Compiled SQL.
        sql: String,
    },
    /// Rows fetched from a cursor.
    FetchCursor {
        /// Connection id.
        connection: u64,
        /// Cursor id.
        cursor: u64,
        /// Rows requested.
        count: usize,
    },
    /// Cursor closed.
    CloseCursor {
        /// Connection id.
        connection: u64,
        /// Cursor id.
        cursor: u64,
    },
    /// Session state reset by the pool.
    Reset {
        /// Connection id.
        connection: u64,
    },
}

impl Op {
    /// Connection the operation ran on.
    pub fn connection(&self) -> u64 {
        match self {
            Self::Connect { connection }
            | Self::Fetch { connection, .. }
            | Self::Execute { connection, .. }
            | Self::Begin { connection, .. }
            | Self::Commit { connection }
            | Self::Rollback { connection }
            | Self::OpenCursor { connection, .. }
            | Self::FetchCursor { connection, .. }
            | Self::CloseCursor { connection, .. }
            | Self::Reset { connection } => *connection,
        }
    }
}

struct BackendInner {
    responses: RwLock<HashMap<String, MockResponse>>,
    default_response: RwLock<MockResponse>,
    ops: Mutex<Vec<Op>>,
    next_connection: AtomicU64,
    next_cursor: AtomicU64,
    open_cursors: Mutex<HashSet<u64>>,
    invalid: Mutex<HashSet<u64>>,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    fail_connect: AtomicBool,
}

/// Shared script and operation log for mock connections.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<BackendInner>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a backend that answers every statement with no rows.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BackendInner {
                responses: RwLock::new(HashMap::new()),
                default_response: RwLock::new(MockResponse::empty()),
                ops: Mutex::new(Vec::new()),
                next_connection: AtomicU64::new(1),
                next_cursor: AtomicU64::new(1),
                open_cursors: Mutex::new(HashSet::new()),
                invalid: Mutex::new(HashSet::new()),
                fail_begin: AtomicBool::new(false),
                fail_commit: AtomicBool::new(false),
                fail_rollback: AtomicBool::new(false),
                fail_connect: AtomicBool::new(false),
            }),
        }
    }

    /// Answer `sql` with `response`.
    #[must_use]
    pub fn with_response(self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.respond(sql, response);
        self
    }

    /// Answer statements without a scripted response with `response`.
    #[must_use]
    pub fn with_default_response(self, response: MockResponse) -> Self {
        *self.inner.default_response.write() = response;
        self
    }

    /// Script a response after construction.
    pub fn respond(&self, sql: impl Into<String>, response: MockResponse) {
        self.inner.responses.write().insert(sql.into(), response);
    }

    /// Make `BEGIN` fail on every connection.
    pub fn fail_begin(&self, fail: bool) {
        self.inner.fail_begin.store(fail, Ordering::SeqCst);
    }

    /// Make `COMMIT` fail on every connection.
    pub fn fail_commit(&self, fail: bool) {
        self.inner.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Make `ROLLBACK` fail on every connection.
    pub fn fail_rollback(&self, fail: bool) {
        self.inner.fail_rollback.store(fail, Ordering::SeqCst);
    }

    /// Make the connector fail.
    pub fn fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make `is_valid` report false for `connection`.
    pub fn invalidate(&self, connection: u64) {
        self.inner.invalid.lock().insert(connection);
    }

    /// Open a connection directly, outside any pool.
    pub fn connect(&self) -> MockConnection {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        self.record(Op::Connect { connection: id });
        MockConnection {
            id,
            backend: self.clone(),
            cursors: HashMap::new(),
        }
    }

    /// A connector for a pool over this backend.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            backend: self.clone(),
        }
    }

    /// Every operation recorded so far.
    pub fn ops(&self) -> Vec<Op> {
        self.inner.ops.lock().clone()
    }

    /// Forget recorded operations.
    pub fn clear_ops(&self) {
        self.inner.ops.lock().clear();
    }

    /// Number of recorded operations matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Op) -> bool) -> usize {
        self.inner.ops.lock().iter().filter(|op| predicate(op)).count()
    }

    /// Number of connections opened.
    pub fn connections_opened(&self) -> usize {
        self.count(|op| matches!(op, Op::Connect { .. }))
    }

    /// Number of `BEGIN`s.
    pub fn begins(&self) -> usize {
        self.count(|op| matches!(op, Op::Begin { .. }))
    }

    /// Number of `COMMIT`s.
    pub fn commits(&self) -> usize {
        self.count(|op| matches!(op, Op::Commit { .. }))
    }

    /// Number of `ROLLBACK`s.
    pub fn rollbacks(&self) -> usize {
        self.count(|op| matches!(op, Op::Rollback { .. }))
    }

    /// Number of resets.
    pub fn resets(&self) -> usize {
        self.count(|op| matches!(op, Op::Reset { .. }))
    }

    /// Cursors opened and not yet closed or reset away.
    pub fn open_cursors(&self) -> usize {
        self.inner.open_cursors.lock().len()
    }

    /// Compiled SQL of every fetch and execute, in order.
    pub fn statements(&self) -> Vec<String> {
        self.inner
            .ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                Op::Fetch { sql, .. } | Op::Execute { sql, .. } | Op::OpenCursor { sql, .. } => {
                    Some(sql.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Connection each fetch or execute of `sql` ran on, in order.
    pub fn connections_for(&self, sql: &str) -> Vec<u64> {
        self.inner
            .ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                Op::Fetch { connection, sql: s } | Op::Execute { connection, sql: s } if s == sql => {
                    Some(*connection)
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: Op) {
        tracing::trace!(?op, "mock operation");
        self.inner.ops.lock().push(op);
    }

    async fn response_for(&self, sql: &str) -> MockResponse {
        let scripted = self.inner.responses.read().get(sql).cloned();
        let mut response = scripted.unwrap_or_else(|| self.inner.default_response.read().clone());
        loop {
            response = match response {
                MockResponse::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    *inner
                }
                MockResponse::Custom(respond) => respond(sql),
                other => return other,
            };
        }
    }
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("responses", &self.inner.responses.read().len())
            .field("ops", &self.inner.ops.lock().len())
            .finish()
    }
}

/// An in-memory connection driven by a [`MockBackend`].
pub struct MockConnection {
    id: u64,
    backend: MockBackend,
    cursors: HashMap<u64, VecDeque<Row>>,
}

impl MockConnection {
    /// Connection id, as recorded in [`Op`]s.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.id)
            .field("cursors", &self.cursors.len())
            .finish()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn fetch_all(&mut self, statement: &CompiledStatement) -> Result<Vec<Row>> {
        self.backend.record(Op::Fetch {
            connection: self.id,
            sql: statement.sql.clone(),
        });
        self.backend.response_for(&statement.sql).await.into_rows()
    }

    async fn execute(&mut self, statement: &CompiledStatement) -> Result<ExecuteResult> {
        self.backend.record(Op::Execute {
            connection: self.id,
            sql: statement.sql.clone(),
        });
        self.backend.response_for(&statement.sql).await.into_status()
    }

    async fn begin(&mut self, options: &TransactionOptions) -> Result<()> {
        if self.backend.inner.fail_begin.load(Ordering::SeqCst) {
            return Err(Error::Connection("BEGIN rejected by mock backend".into()));
        }
        self.backend.record(Op::Begin {
            connection: self.id,
            sql: options.begin_sql(),
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.backend.inner.fail_commit.load(Ordering::SeqCst) {
            return Err(Error::Connection("COMMIT rejected by mock backend".into()));
        }
        self.backend.record(Op::Commit { connection: self.id });
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.backend.inner.fail_rollback.load(Ordering::SeqCst) {
            return Err(Error::Connection("ROLLBACK rejected by mock backend".into()));
        }
        self.backend.record(Op::Rollback { connection: self.id });
        Ok(())
    }

    async fn open_cursor(&mut self, statement: &CompiledStatement) -> Result<CursorId> {
        let cursor = self.backend.inner.next_cursor.fetch_add(1, Ordering::Relaxed);
        self.backend.record(Op::OpenCursor {
            connection: self.id,
            cursor,
            sql: statement.sql.clone(),
        });
        let rows = self.backend.response_for(&statement.sql).await.into_rows()?;
        self.cursors.insert(cursor, rows.into());
        self.backend.inner.open_cursors.lock().insert(cursor);
        Ok(CursorId(cursor))
    }

    async fn fetch_cursor(&mut self, cursor: CursorId, count: usize) -> Result<Vec<Row>> {
        self.backend.record(Op::FetchCursor {
            connection: self.id,
            cursor: cursor.0,
            count,
        });
        let rows = self
            .cursors
            .get_mut(&cursor.0)
            .ok_or_else(|| Error::statement(format!("cursor {} does not exist", cursor.0)))?;
        let take = count.min(rows.len());
        Ok(rows.drain(..take).collect())
    }

    async fn close_cursor(&mut self, cursor: CursorId) -> Result<()> {
        self.backend.record(Op::CloseCursor {
            connection: self.id,
            cursor: cursor.0,
        });
        self.cursors.remove(&cursor.0);
        self.backend.inner.open_cursors.lock().remove(&cursor.0);
        Ok(())
    }

    fn is_valid(&self) -> bool {
        !self.backend.inner.invalid.lock().contains(&self.id)
    }

    async fn reset(&mut self) -> Result<()> {
        self.backend.record(Op::Reset { connection: self.id });
        let mut open = self.backend.inner.open_cursors.lock();
        for cursor in self.cursors.drain() {
            open.remove(&cursor.0);
        }
        Ok(())
    }
}

/// Opens [`MockConnection`]s for a [`bindery_pool::Pool`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    backend: MockBackend,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> std::result::Result<Box<dyn Connection>, PoolError> {
        if self.backend.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(PoolError::ConnectionCreation("mock backend refused connection".into()));
        }
        Ok(Box::new(self.backend.connect()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_rows_and_status() {
        let backend = MockBackend::new()
            .with_response("SELECT n", MockResponse::sequence(3))
            .with_response("UPDATE t", MockResponse::status("UPDATE 3"));
        let mut connection = backend.connect();

        let rows = connection
            .fetch_all(&CompiledStatement::new("SELECT n", Vec::new()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].get::<i64>(0).unwrap(), 3);

        let status = connection
            .execute(&CompiledStatement::new("UPDATE t", Vec::new()))
            .await
            .unwrap();
        assert_eq!(status.rows_affected, 3);
        assert_eq!(backend.statements(), vec!["SELECT n", "UPDATE t"]);
    }

    #[tokio::test]
    async fn test_cursor_drains_and_reset_clears() {
        let backend = MockBackend::new().with_default_response(MockResponse::sequence(5));
        let mut connection = backend.connect();
        let cursor = connection
            .open_cursor(&CompiledStatement::new("SELECT n", Vec::new()))
            .await
            .unwrap();

        assert_eq!(connection.fetch_cursor(cursor, 2).await.unwrap().len(), 2);
        assert_eq!(connection.forward_cursor(cursor, 10).await.unwrap(), 3);
        assert_eq!(backend.open_cursors(), 1);

        connection.reset().await.unwrap();
        assert_eq!(backend.open_cursors(), 0);
        assert_eq!(backend.resets(), 1);
    }

    #[tokio::test]
    async fn test_error_responses() {
        let backend = MockBackend::new()
            .with_response("BAD", MockResponse::error("42601", "syntax error"))
            .with_response("LOST", MockResponse::ConnectionLost("reset by peer".into()));
        let mut connection = backend.connect();

        let err = connection
            .fetch_all(&CompiledStatement::new("BAD", Vec::new()))
            .await
            .unwrap_err();
        assert!(err.is_statement_error());
        assert_eq!(err.code(), Some("42601"));

        let err = connection
            .execute(&CompiledStatement::new("LOST", Vec::new()))
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }
}
