//! The connection boundary.
//!
//! Backends implement [`Connection`] for their native connection type. The
//! binding layer never inspects a connection beyond this trait: it hands
//! compiled statements to it, drives transactions through it and opens
//! server-side cursors on it.

use async_trait::async_trait;
use bindery_types::Row;

use crate::dialect::CompiledStatement;
use crate::error::Result;
use crate::transaction::TransactionOptions;

/// Identifier of a server-side cursor, scoped to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(pub u64);

/// Result of a statement that does not return rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Number of rows affected by the statement.
    pub rows_affected: u64,
    /// Status string reported by the backend, e.g. `UPDATE 3`.
    pub status: String,
}

impl ExecuteResult {
    /// Create a new execute result.
    pub fn new(rows_affected: u64, status: impl Into<String>) -> Self {
        Self {
            rows_affected,
            status: status.into(),
        }
    }

    /// Parse a command status string.
    ///
    /// The row count is the trailing number of the tag, so `UPDATE 3`,
    /// `DELETE 3` and `INSERT 0 3` all report three rows. Tags without a
    /// count report zero.
    pub fn from_status(status: &str) -> Self {
        let rows_affected = status
            .split_whitespace()
            .next_back()
            .and_then(|last| last.parse().ok())
            .unwrap_or(0);
        Self::new(rows_affected, status.trim())
    }

    /// Command keyword of the status string.
    #[must_use]
    pub fn command(&self) -> &str {
        self.status.split_whitespace().next().unwrap_or("")
    }
}

/// A database connection as seen by the binding layer.
///
/// Fetch methods receive statements already compiled by a
/// [`Dialect`](crate::Dialect). Implementations report failures as
/// [`Error::Connection`](crate::Error::Connection) or
/// [`Error::Statement`](crate::Error::Statement); those errors reach the
/// caller unchanged.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement and return every row.
    async fn fetch_all(&mut self, statement: &CompiledStatement) -> Result<Vec<Row>>;

    /// Execute a statement and return the first row.
    ///
    /// Backends that can stop after one row should override this.
    async fn fetch_first(&mut self, statement: &CompiledStatement) -> Result<Option<Row>> {
        Ok(self.fetch_all(statement).await?.into_iter().next())
    }

    /// Execute a statement that does not return rows.
    async fn execute(&mut self, statement: &CompiledStatement) -> Result<ExecuteResult>;

    /// Begin a transaction.
    async fn begin(&mut self, options: &TransactionOptions) -> Result<()>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Open a server-side cursor over a statement.
    async fn open_cursor(&mut self, statement: &CompiledStatement) -> Result<CursorId>;

    /// Fetch up to `count` rows from a cursor. Fewer rows than requested
    /// means the cursor is exhausted.
    async fn fetch_cursor(&mut self, cursor: CursorId, count: usize) -> Result<Vec<Row>>;

    /// Skip up to `count` rows of a cursor, returning how many were skipped.
    async fn forward_cursor(&mut self, cursor: CursorId, count: usize) -> Result<u64> {
        let rows = self.fetch_cursor(cursor, count).await?;
        Ok(rows.len() as u64)
    }

    /// Close a cursor.
    async fn close_cursor(&mut self, cursor: CursorId) -> Result<()>;

    /// Quick local check that the connection is still usable.
    fn is_valid(&self) -> bool {
        true
    }

    /// Reset session state before the connection is reused.
    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        let update = ExecuteResult::from_status("UPDATE 3");
        assert_eq!(update.rows_affected, 3);
        assert_eq!(update.command(), "UPDATE");

        assert_eq!(ExecuteResult::from_status("INSERT 0 5").rows_affected, 5);
        assert_eq!(ExecuteResult::from_status("CREATE TABLE").rows_affected, 0);
        assert_eq!(ExecuteResult::from_status("").command(), "");
    }
}
