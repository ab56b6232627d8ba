//! A dialect that records how it was called.

use std::sync::Arc;

use async_trait::async_trait;
use bindery::{
    BaseDialect, CompiledStatement, Connection, Dialect, ExecuteResult, ExecutionOptions,
    ParamStyle, Params, Result, Row, SqlValue, Statement,
};
use parking_lot::Mutex;

/// One dispatch seen by a [`RecordingDialect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectCall {
    /// `all`, `first`, `scalar` or `status`.
    pub method: &'static str,
    /// Statement text before compilation.
    pub sql: String,
    /// Whether a live model was attached.
    pub has_model: bool,
    /// Whether rows were to be loaded through the model.
    pub return_model: bool,
}

/// Wraps [`BaseDialect`] and records every `do_*` dispatch.
#[derive(Debug, Default)]
pub struct RecordingDialect {
    base: BaseDialect,
    calls: Mutex<Vec<DialectCall>>,
}

impl RecordingDialect {
    /// Create a recording dialect with numeric markers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recording dialect with the given marker style.
    pub fn with_style(style: ParamStyle) -> Self {
        Self {
            base: BaseDialect::new("recording", style),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Shared handle, ready to pass to an engine.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<DialectCall> {
        self.calls.lock().clone()
    }

    /// Methods of the calls recorded so far, in order.
    pub fn methods(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|call| call.method).collect()
    }

    fn record(&self, method: &'static str, statement: &Statement) {
        let options = statement.options();
        self.calls.lock().push(DialectCall {
            method,
            sql: statement.sql().to_string(),
            has_model: options.has_model(),
            return_model: options.return_model(),
        });
    }
}

#[async_trait]
impl Dialect for RecordingDialect {
    fn name(&self) -> &str {
        "recording"
    }

    fn compile(&self, statement: &Statement, params: &Params) -> Result<CompiledStatement> {
        self.base.compile(statement, params)
    }

    fn process_rows(&self, rows: Vec<Row>, options: &ExecutionOptions) -> Result<Vec<Row>> {
        self.base.process_rows(rows, options)
    }

    async fn do_all(
        &self,
        connection: &mut dyn Connection,
        statement: &Statement,
        params: &Params,
    ) -> Result<Vec<Row>> {
        self.record("all", statement);
        self.base.do_all(connection, statement, params).await
    }

    async fn do_first(
        &self,
        connection: &mut dyn Connection,
        statement: &Statement,
        params: &Params,
    ) -> Result<Option<Row>> {
        self.record("first", statement);
        self.base.do_first(connection, statement, params).await
    }

    async fn do_scalar(
        &self,
        connection: &mut dyn Connection,
        statement: &Statement,
        params: &Params,
    ) -> Result<Option<SqlValue>> {
        self.record("scalar", statement);
        self.base.do_scalar(connection, statement, params).await
    }

    async fn do_status(
        &self,
        connection: &mut dyn Connection,
        statement: &Statement,
        params: &Params,
    ) -> Result<ExecuteResult> {
        self.record("status", statement);
        self.base.do_status(connection, statement, params).await
    }
}
