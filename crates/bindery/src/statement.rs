//! Statements and the execution options attached to them.
//!
//! A [`Statement`] is an immutable view: attaching options or a bind returns
//! a new statement and never changes one that was already handed out.
//! Options layer: a value set on a later view overrides the same key from an
//! earlier one, and keys left unset fall through.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bindery_types::Row;

use crate::bind::Bind;
use crate::error::Result;

/// Target that rows are loaded through when a statement carries a model.
///
/// Statements hold models weakly, so a model that has been dropped simply
/// stops applying.
pub trait RowModel: Send + Sync {
    /// Model name, recorded on every row loaded through it.
    fn name(&self) -> &str;

    /// Load a row through this model.
    fn load(&self, row: Row) -> Result<Row> {
        Ok(row.with_model(self.name()))
    }
}

/// Options attached to a statement before dispatch.
#[derive(Clone, Default)]
pub struct ExecutionOptions {
    model: Option<Weak<dyn RowModel>>,
    return_model: Option<bool>,
    timeout: Option<Duration>,
    prefetch: Option<usize>,
}

impl ExecutionOptions {
    /// Create an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind rows to `model`. Only a weak reference is kept.
    #[must_use]
    pub fn with_model<M: RowModel + 'static>(mut self, model: &Arc<M>) -> Self {
        let model: Weak<M> = Arc::downgrade(model);
        self.model = Some(model);
        self
    }

    /// Whether rows should be loaded through the model.
    #[must_use]
    pub fn with_return_model(mut self, return_model: bool) -> Self {
        self.return_model = Some(return_model);
        self
    }

    /// Bound the execution wait.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Rows fetched per round trip by cursors.
    #[must_use]
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = Some(prefetch.max(1));
        self
    }

    /// The bound model, if one was set and is still alive.
    pub fn model(&self) -> Option<Arc<dyn RowModel>> {
        self.model.as_ref().and_then(Weak::upgrade)
    }

    /// Whether a model was set, alive or not.
    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Whether rows are loaded through the model. Defaults to `true`.
    pub fn return_model(&self) -> bool {
        self.return_model.unwrap_or(true)
    }

    /// Execution timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Cursor prefetch size, if set.
    pub fn prefetch(&self) -> Option<usize> {
        self.prefetch
    }

    /// Layer `over` on top of `self`. Keys set in `over` win.
    #[must_use]
    pub fn layered(&self, over: &ExecutionOptions) -> ExecutionOptions {
        ExecutionOptions {
            model: over.model.clone().or_else(|| self.model.clone()),
            return_model: over.return_model.or(self.return_model),
            timeout: over.timeout.or(self.timeout),
            prefetch: over.prefetch.or(self.prefetch),
        }
    }
}

impl fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("model", &self.model().map(|m| m.name().to_string()))
            .field("return_model", &self.return_model)
            .field("timeout", &self.timeout)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}

/// A compiled statement together with its options and optional bind.
///
/// The SQL text is shared, so deriving new views is cheap.
#[derive(Clone)]
pub struct Statement {
    sql: Arc<str>,
    options: ExecutionOptions,
    bind: Option<Bind>,
}

impl Statement {
    /// Create a statement from SQL text.
    pub fn new(sql: impl Into<Arc<str>>) -> Self {
        Self {
            sql: sql.into(),
            options: ExecutionOptions::default(),
            bind: None,
        }
    }

    /// SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Options attached to this view.
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Bind attached to this view.
    pub fn bind(&self) -> Option<&Bind> {
        self.bind.as_ref()
    }

    /// New view of this statement with `options` layered over the current
    /// ones.
    #[must_use]
    pub fn execution_options(&self, options: &ExecutionOptions) -> Statement {
        Statement {
            sql: Arc::clone(&self.sql),
            options: self.options.layered(options),
            bind: self.bind.clone(),
        }
    }

    /// New view with `defaults` underneath the current options.
    pub(crate) fn with_defaults(&self, defaults: &ExecutionOptions) -> Statement {
        Statement {
            sql: Arc::clone(&self.sql),
            options: defaults.layered(&self.options),
            bind: self.bind.clone(),
        }
    }

    /// New view of this statement resolved against `bind`.
    #[must_use]
    pub fn with_bind(&self, bind: impl Into<Bind>) -> Statement {
        Statement {
            sql: Arc::clone(&self.sql),
            options: self.options.clone(),
            bind: Some(bind.into()),
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("options", &self.options)
            .field("bound", &self.bind.is_some())
            .finish()
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}
