//! Lazy server-side cursors.
//!
//! [`CursorFactory`] captures a statement, its parameters and how to resolve
//! a bind; nothing runs until a [`LazyCursor`] produced by it is read. A
//! cursor holds its connection from the first fetch until it is exhausted,
//! closed or dropped, and is never offered for task-local reuse.
//!
//! Dropping a cursor that still has a server-side cursor open marks the
//! connection for reset. An owned connection then goes straight back to its
//! pool, which resets it before reuse; a borrowed one also gets a
//! best-effort `close_cursor` spawned on the runtime.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use bindery_types::Row;
use futures_core::Stream;
use tracing::Instrument;

use crate::acquire::{AcquireOptions, AcquiredConnection};
use crate::bind::Bind;
use crate::connection::CursorId;
use crate::error::{Error, Result};
use crate::instrumentation::span_names;
use crate::params::Params;
use crate::statement::{ExecutionOptions, Statement};

/// Rows fetched per round trip when no prefetch is configured.
pub const DEFAULT_PREFETCH: usize = 50;

/// Produces cursors over one statement.
///
/// The factory can be read any number of times; every call to
/// [`cursor`](CursorFactory::cursor) runs the statement afresh.
#[derive(Clone, Debug)]
pub struct CursorFactory {
    statement: Statement,
    bind: Option<Bind>,
    params: Params,
}

impl CursorFactory {
    pub(crate) fn new(statement: Statement, bind: Option<Bind>, params: Params) -> Self {
        Self {
            statement,
            bind,
            params,
        }
    }

    /// Statement the cursors run.
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Fetch `prefetch` rows per round trip.
    #[must_use]
    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.statement = self
            .statement
            .execution_options(&ExecutionOptions::new().with_prefetch(prefetch));
        self
    }

    /// A new cursor. The statement runs on its first read.
    pub fn cursor(&self) -> LazyCursor {
        LazyCursor {
            statement: self.statement.clone(),
            bind: self.bind.clone(),
            params: self.params.clone(),
            state: CursorState::Pending,
            buffer: VecDeque::new(),
        }
    }

    /// A new cursor as a stream of rows.
    pub fn stream(&self) -> impl Stream<Item = Result<Row>> + Send + 'static {
        self.cursor().into_stream()
    }
}

struct OpenCursor {
    connection: Option<AcquiredConnection>,
    cursor: CursorId,
    server_open: bool,
    exhausted: bool,
}

impl OpenCursor {
    fn connection(&self) -> Result<&AcquiredConnection> {
        self.connection.as_ref().ok_or(Error::ConnectionReleased)
    }

    async fn fetch(&self, count: usize, timeout: Option<Duration>) -> Result<Vec<Row>> {
        let connection = self.connection()?;
        let mut guard = connection.lock().await?;
        let pending = guard.fetch_cursor(self.cursor, count);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| Error::CommandTimeout(limit))?,
            None => pending.await,
        }
    }

    async fn forward(&self, count: usize) -> Result<u64> {
        let connection = self.connection()?;
        let mut guard = connection.lock().await?;
        guard.forward_cursor(self.cursor, count).await
    }

    async fn close(mut self) -> Result<()> {
        let result = match &self.connection {
            Some(connection) => {
                let mut guard = connection.lock().await?;
                guard.close_cursor(self.cursor).await
            }
            None => Ok(()),
        };
        if result.is_ok() {
            self.server_open = false;
        }
        if let Some(connection) = self.connection.take() {
            if self.server_open {
                connection.mark_reset_required();
            }
            tracing::debug!(connection = connection.id(), cursor = self.cursor.0, "cursor closed");
            connection.release();
        }
        result
    }
}

impl Drop for OpenCursor {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if self.server_open {
            connection.mark_reset_required();
            tracing::debug!(
                connection = connection.id(),
                cursor = self.cursor.0,
                owned = connection.is_owned(),
                "cursor abandoned"
            );
            if !connection.is_owned() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let target = connection.connection_ref();
                    let cursor = self.cursor;
                    handle.spawn(async move {
                        if let Ok(mut guard) = target.cell().lock().await {
                            if let Err(e) = guard.close_cursor(cursor).await {
                                tracing::debug!(error = %e, "closing abandoned cursor failed");
                            }
                        }
                    });
                }
            }
        }
        connection.release();
    }
}

enum CursorState {
    Pending,
    Open(OpenCursor),
    Closed,
}

/// A single-use cursor over the rows of a statement.
pub struct LazyCursor {
    statement: Statement,
    bind: Option<Bind>,
    params: Params,
    state: CursorState,
    buffer: VecDeque<Row>,
}

impl LazyCursor {
    /// Whether the cursor has finished, either exhausted or closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, CursorState::Closed)
    }

    /// Whether the statement has been run.
    pub fn is_started(&self) -> bool {
        !matches!(self.state, CursorState::Pending)
    }

    /// Next row, or `None` at the end.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.buffer.pop_front() {
            return Ok(Some(row));
        }
        let prefetch = self.statement.options().prefetch().unwrap_or(DEFAULT_PREFETCH);
        let rows = self.fetch_from_server(prefetch).await?;
        self.buffer.extend(rows);
        Ok(self.buffer.pop_front())
    }

    /// Up to `n` rows. Fewer than `n` means the cursor is at the end.
    pub async fn fetch(&mut self, n: usize) -> Result<Vec<Row>> {
        let buffered = n.min(self.buffer.len());
        let mut rows: Vec<Row> = self.buffer.drain(..buffered).collect();
        if rows.len() < n {
            let more = self.fetch_from_server(n - rows.len()).await?;
            rows.extend(more);
        }
        Ok(rows)
    }

    /// Skip up to `n` rows, returning how many were skipped.
    pub async fn forward(&mut self, n: usize) -> Result<u64> {
        let buffered = n.min(self.buffer.len());
        self.buffer.drain(..buffered);
        let remaining = n - buffered;
        let mut skipped = buffered as u64;
        if remaining == 0 {
            return Ok(skipped);
        }
        if matches!(self.state, CursorState::Pending) {
            self.open().await?;
        }
        let moved = match &mut self.state {
            CursorState::Open(open) => {
                let moved = open.forward(remaining).await;
                if let Ok(count) = &moved {
                    open.exhausted = *count < remaining as u64;
                }
                moved
            }
            _ => return Ok(skipped),
        };
        match moved {
            Ok(count) => {
                skipped += count;
                self.finish_if_exhausted().await;
                Ok(skipped)
            }
            Err(e) => {
                self.state = CursorState::Closed;
                Err(e)
            }
        }
    }

    /// Close the server-side cursor and release the connection.
    ///
    /// Closing an unstarted or finished cursor is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        match std::mem::replace(&mut self.state, CursorState::Closed) {
            CursorState::Open(open) => open.close().await,
            CursorState::Pending | CursorState::Closed => Ok(()),
        }
    }

    /// Turn the cursor into a stream of rows.
    ///
    /// Dropping the stream early releases the connection like dropping the
    /// cursor does.
    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> + Send + 'static {
        futures_util::stream::try_unfold(self, |mut cursor| async move {
            Ok::<_, Error>(cursor.next().await?.map(|row| (row, cursor)))
        })
    }

    async fn open(&mut self) -> Result<()> {
        let bind = self
            .bind
            .clone()
            .or_else(|| self.statement.bind().cloned())
            .ok_or(Error::NoBind)?;
        self.statement = self.statement.with_defaults(&bind.execution_options());
        let connection = bind
            .acquire(AcquireOptions::new().reuse(true).reusable(false))
            .await?;

        let opened = async {
            let compiled = connection.dialect().compile(&self.statement, &self.params)?;
            let mut guard = connection.lock().await?;
            guard.open_cursor(&compiled).await
        }
        .instrument(tracing::debug_span!(span_names::CURSOR, connection = connection.id()))
        .await;

        match opened {
            Ok(cursor) => {
                tracing::debug!(connection = connection.id(), cursor = cursor.0, "cursor opened");
                self.state = CursorState::Open(OpenCursor {
                    connection: Some(connection),
                    cursor,
                    server_open: true,
                    exhausted: false,
                });
                Ok(())
            }
            Err(e) => {
                connection.release();
                self.state = CursorState::Closed;
                Err(e)
            }
        }
    }

    async fn fetch_from_server(&mut self, count: usize) -> Result<Vec<Row>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if matches!(self.state, CursorState::Pending) {
            self.open().await?;
        }
        let timeout = self.statement.options().timeout();
        let fetched = match &mut self.state {
            CursorState::Open(open) => {
                let result = open.fetch(count, timeout).await;
                if let Ok(rows) = &result {
                    open.exhausted = rows.len() < count;
                }
                result.and_then(|rows| {
                    let connection = open.connection()?;
                    connection.dialect().process_rows(rows, self.statement.options())
                })
            }
            CursorState::Pending | CursorState::Closed => return Ok(Vec::new()),
        };
        match fetched {
            Ok(rows) => {
                self.finish_if_exhausted().await;
                Ok(rows)
            }
            Err(e) => {
                self.state = CursorState::Closed;
                Err(e)
            }
        }
    }

    async fn finish_if_exhausted(&mut self) {
        if !matches!(&self.state, CursorState::Open(open) if open.exhausted) {
            return;
        }
        if let CursorState::Open(open) = std::mem::replace(&mut self.state, CursorState::Closed) {
            if let Err(e) = open.close().await {
                tracing::warn!(error = %e, "closing exhausted cursor failed");
            }
        }
    }
}

impl fmt::Debug for LazyCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            CursorState::Pending => "pending",
            CursorState::Open(_) => "open",
            CursorState::Closed => "closed",
        };
        f.debug_struct("LazyCursor")
            .field("sql", &self.statement.sql())
            .field("state", &state)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
