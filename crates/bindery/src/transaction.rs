//! Nested transactions.
//!
//! A [`Transaction`] is one scope of a possibly nested transaction. The
//! outermost scope on a connection issues the real `BEGIN`, `COMMIT` and
//! `ROLLBACK`; scopes opened while a transaction is already active on the
//! task's connection only move the shared depth counter.
//!
//! ```text
//! NotStarted -> Active (start)
//! Active -> Committed (commit)
//! Active -> RolledBack (rollback, failed commit, rollback-only commit)
//! ```
//!
//! An inner scope that rolls back cannot undo only its own work. It marks
//! the whole transaction rollback-only instead, and the outermost commit
//! then rolls back and reports [`Error::TransactionState`].
//!
//! # Example
//!
//! ```rust,ignore
//! engine
//!     .transaction()
//!     .isolation(IsolationLevel::Serializable)
//!     .run(|| async {
//!         engine.status(&debit, params![100, from]).await?;
//!         engine.status(&credit, params![100, to]).await?;
//!         Ok::<_, bindery::Error>(())
//!     })
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::acquire::{AcquireOptions, AcquiredConnection, ConnectionRef};
use crate::bind::Bind;
use crate::error::{Error, Result};
use crate::instrumentation::span_names;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed: a statement sees only data committed before it began.
    #[default]
    ReadCommitted,

    /// Repeatable read: every statement sees the snapshot taken at the
    /// transaction's first statement.
    RepeatableRead,

    /// Serializable: transactions behave as if run one after another.
    Serializable,
}

impl IsolationLevel {
    /// The isolation clause of a `BEGIN` statement.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "ISOLATION LEVEL SERIALIZABLE",
        }
    }

    /// The isolation level name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Options of a transaction scope.
///
/// Only the outermost scope's options take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct TransactionOptions {
    /// Isolation level.
    pub isolation: IsolationLevel,
    /// Whether the transaction is read-only.
    pub readonly: bool,
    /// Whether a serializable read-only transaction may wait for a safe
    /// snapshot.
    pub deferrable: bool,
    /// Acquisition timeout for the outermost scope's connection.
    pub timeout: Option<Duration>,
    /// Join the transaction already active on the task's connection.
    pub reuse: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::default(),
            readonly: false,
            deferrable: false,
            timeout: None,
            reuse: true,
        }
    }
}

impl TransactionOptions {
    /// Create the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the read-only flag.
    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Set the deferrable flag.
    #[must_use]
    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set whether an active transaction on the task is joined.
    #[must_use]
    pub fn reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    /// The `BEGIN` statement for these options.
    ///
    /// `BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE`; backends
    /// with another syntax build their own from the fields.
    #[must_use]
    pub fn begin_sql(&self) -> String {
        let mut sql = format!("BEGIN {}", self.isolation.as_sql());
        if self.readonly {
            sql.push_str(" READ ONLY");
        }
        if self.deferrable {
            sql.push_str(" DEFERRABLE");
        }
        sql
    }
}

/// State of a transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Not started yet.
    NotStarted,
    /// Started and not finished.
    Active,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

struct Scope {
    connection: AcquiredConnection,
    depth: usize,
}

/// One scope of a possibly nested transaction.
pub struct Transaction {
    bind: Bind,
    options: TransactionOptions,
    state: TransactionState,
    scope: Option<Scope>,
}

impl Transaction {
    /// Create a transaction scope on `bind`.
    pub fn new(bind: impl Into<Bind>, options: TransactionOptions) -> Self {
        Self {
            bind: bind.into(),
            options,
            state: TransactionState::NotStarted,
            scope: None,
        }
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.options.isolation = isolation;
        self
    }

    /// Set the read-only flag.
    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.options.readonly = readonly;
        self
    }

    /// Set the deferrable flag.
    #[must_use]
    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.options.deferrable = deferrable;
        self
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Set whether an active transaction on the task is joined.
    #[must_use]
    pub fn reuse(mut self, reuse: bool) -> Self {
        self.options.reuse = reuse;
        self
    }

    /// Options of this scope.
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Nesting depth of this scope while active; 1 is the outermost.
    pub fn depth(&self) -> Option<usize> {
        self.scope.as_ref().map(|scope| scope.depth)
    }

    /// Whether this scope issued the real `BEGIN`.
    pub fn is_outermost(&self) -> bool {
        self.depth() == Some(1)
    }

    /// The connection the transaction runs on, while active.
    pub fn connection(&self) -> Option<ConnectionRef> {
        self.scope.as_ref().map(|scope| scope.connection.connection_ref())
    }

    /// The transaction's connection as a bind, while active.
    pub fn as_bind(&self) -> Option<Bind> {
        self.connection().map(Bind::Connection)
    }

    /// Enter the scope.
    ///
    /// Joins the transaction active on the task's connection when `reuse` is
    /// set, otherwise acquires a connection and issues `BEGIN`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != TransactionState::NotStarted {
            return Err(Error::TransactionState(format!(
                "cannot start a transaction that is {}",
                self.state
            )));
        }

        if self.options.reuse {
            let active = self
                .bind
                .current_cell()
                .filter(|cell| cell.transaction_depth() > 0);
            if let Some(cell) = active {
                let depth = cell.enter_nested();
                tracing::debug!(
                    connection = cell.id(),
                    depth,
                    isolation = self.options.isolation.name(),
                    readonly = self.options.readonly,
                    deferrable = self.options.deferrable,
                    "joined active transaction, options of the nested scope are ignored"
                );
                self.scope = Some(Scope {
                    connection: AcquiredConnection::borrowed(cell),
                    depth,
                });
                self.state = TransactionState::Active;
                return Ok(());
            }
        }

        let acquire = AcquireOptions::new()
            .timeout(self.options.timeout)
            .reuse(self.options.reuse);
        let connection = self.bind.acquire(acquire).await?;
        let begun = async {
            let mut guard = connection.lock().await?;
            guard.begin(&self.options).await
        }
        .instrument(tracing::debug_span!(
            span_names::BEGIN_TRANSACTION,
            connection = connection.id(),
            isolation = self.options.isolation.name()
        ))
        .await;
        if let Err(e) = begun {
            tracing::debug!(connection = connection.id(), error = %e, "BEGIN failed");
            connection.release();
            return Err(e);
        }

        connection.cell().begin_transaction_depth();
        tracing::debug!(
            connection = connection.id(),
            isolation = self.options.isolation.name(),
            readonly = self.options.readonly,
            deferrable = self.options.deferrable,
            registered = connection.is_registered(),
            "transaction started"
        );
        self.scope = Some(Scope {
            connection,
            depth: 1,
        });
        self.state = TransactionState::Active;
        Ok(())
    }

    fn take_active_scope(&mut self, action: &str) -> Result<Scope> {
        match (self.state, self.scope.take()) {
            (TransactionState::Active, Some(scope)) => Ok(scope),
            (state, scope) => {
                self.scope = scope;
                Err(Error::TransactionState(format!(
                    "cannot {action} a transaction that is {state}"
                )))
            }
        }
    }

    /// Leave the scope, committing when it is the outermost.
    ///
    /// If an inner scope rolled back, the outermost commit rolls back
    /// instead and fails with [`Error::TransactionState`].
    pub async fn commit(&mut self) -> Result<()> {
        let scope = self.take_active_scope("commit")?;
        let cell = Arc::clone(scope.connection.cell());

        if scope.depth > 1 {
            cell.exit_nested(false);
            self.state = TransactionState::Committed;
            tracing::debug!(connection = cell.id(), depth = scope.depth, "nested scope committed");
            return Ok(());
        }

        let (open_nested, rollback_only) = cell.end_transaction_depth();
        if open_nested > 0 {
            tracing::warn!(connection = cell.id(), open_nested, "committing with nested scopes still open");
        }

        let result = if rollback_only {
            tracing::warn!(connection = cell.id(), "transaction is rollback-only, rolling back");
            match finish(&scope.connection, false).await {
                Ok(()) => Err(Error::TransactionState(
                    "transaction rolled back: a nested scope requested rollback".to_string(),
                )),
                Err(e) => Err(e),
            }
        } else {
            finish(&scope.connection, true).await
        };
        self.state = if rollback_only || result.is_err() {
            TransactionState::RolledBack
        } else {
            TransactionState::Committed
        };
        if let Err(e) = &result {
            if !matches!(e, Error::TransactionState(_)) {
                scope.connection.mark_reset_required();
            }
        }
        tracing::debug!(connection = cell.id(), state = %self.state, "transaction finished");
        scope.connection.release();
        result
    }

    /// Leave the scope, rolling back.
    ///
    /// The outermost scope rolls back on the connection; a nested scope
    /// marks the shared transaction rollback-only.
    pub async fn rollback(&mut self) -> Result<()> {
        let scope = self.take_active_scope("roll back")?;
        let cell = Arc::clone(scope.connection.cell());
        self.state = TransactionState::RolledBack;

        if scope.depth > 1 {
            cell.exit_nested(true);
            tracing::debug!(connection = cell.id(), depth = scope.depth, "nested scope rolled back");
            return Ok(());
        }

        cell.end_transaction_depth();
        let result = finish(&scope.connection, false).await;
        if result.is_err() {
            scope.connection.mark_reset_required();
        }
        tracing::debug!(connection = cell.id(), ok = result.is_ok(), "transaction rolled back");
        scope.connection.release();
        result
    }

    /// Run `body` inside this scope.
    ///
    /// Commits when `body` succeeds and rolls back when it fails. A failed
    /// rollback is reported in place of the body's error, which is logged.
    pub async fn run<F, Fut, T, E>(mut self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error> + fmt::Display,
    {
        self.start().await?;
        match body().await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => match self.rollback().await {
                Ok(()) => Err(e),
                Err(rollback_error) => {
                    tracing::warn!(error = %e, "rollback after failed transaction body also failed");
                    Err(rollback_error.into())
                }
            },
        }
    }
}

async fn finish(connection: &AcquiredConnection, commit: bool) -> Result<()> {
    let span = if commit {
        tracing::debug_span!(span_names::COMMIT, connection = connection.id())
    } else {
        tracing::debug_span!(span_names::ROLLBACK, connection = connection.id())
    };
    async {
        let mut guard = connection.lock().await?;
        if commit {
            guard.commit().await
        } else {
            guard.rollback().await
        }
    }
    .instrument(span)
    .await
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(scope) = self.scope.take() else {
            return;
        };
        let cell = Arc::clone(scope.connection.cell());

        if scope.depth > 1 {
            tracing::warn!(connection = cell.id(), depth = scope.depth, "nested scope dropped while active");
            cell.exit_nested(true);
            return;
        }

        cell.end_transaction_depth();
        // Whoever locks the connection next, this scope's cleanup or a
        // caller holding it explicitly, rolls back first.
        cell.schedule_rollback();
        let mut connection = scope.connection;
        connection.unregister();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(connection = cell.id(), "transaction dropped while active, rolling back");
                handle.spawn(async move {
                    if let Err(e) = connection.lock().await {
                        tracing::warn!(error = %e, "connection of dropped transaction unavailable");
                    }
                    connection.release();
                });
            }
            Err(_) => {
                tracing::warn!(
                    connection = cell.id(),
                    "transaction dropped outside a runtime, returning connection for reset"
                );
                connection.mark_reset_required();
                connection.release();
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("depth", &self.depth())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_sql() {
        assert_eq!(
            TransactionOptions::new().begin_sql(),
            "BEGIN ISOLATION LEVEL READ COMMITTED"
        );
        assert_eq!(
            TransactionOptions::new()
                .isolation(IsolationLevel::Serializable)
                .readonly(true)
                .deferrable(true)
                .begin_sql(),
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE"
        );
    }

    #[test]
    fn test_isolation_names() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::RepeatableRead.to_string(), "REPEATABLE READ");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransactionState::RolledBack.to_string(), "rolled back");
    }
}
