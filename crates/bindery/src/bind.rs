//! Bind targets.
//!
//! A [`Bind`] names where a statement runs. Resolving one only clones
//! handles; nothing is checked out until [`Bind::acquire`] is called.

use std::fmt;
use std::sync::Arc;

use crate::acquire::{AcquireOptions, AcquiredConnection, ConnectionCell, ConnectionRef};
use crate::dialect::Dialect;
use crate::engine::Engine;
use crate::error::Result;
use crate::statement::ExecutionOptions;

/// Where a statement is executed.
#[derive(Clone)]
pub enum Bind {
    /// Check a connection out of an engine's pool.
    Pool(Engine),
    /// Run on one specific connection, which the caller keeps owning.
    Connection(ConnectionRef),
    /// Run on the current task's connection, checking one out and
    /// registering it when the task has none.
    Local(LocalHandle),
}

impl Bind {
    /// Acquire a connection for this bind.
    ///
    /// A `Connection` bind is returned as borrowed and never released by the
    /// caller. A `Local` bind always reuses the task's connection when one
    /// is registered.
    pub async fn acquire(&self, options: AcquireOptions) -> Result<AcquiredConnection> {
        match self {
            Self::Pool(engine) => engine.acquire(options).await,
            Self::Connection(connection) => {
                Ok(AcquiredConnection::borrowed(Arc::clone(connection.cell())))
            }
            Self::Local(handle) => handle.engine.acquire(options.reuse(true)).await,
        }
    }

    /// Dialect statements on this bind are compiled with.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        match self {
            Self::Pool(engine) => engine.dialect(),
            Self::Connection(connection) => connection.dialect(),
            Self::Local(handle) => handle.engine.dialect(),
        }
    }

    /// Default execution options contributed by the bind.
    pub fn execution_options(&self) -> ExecutionOptions {
        match self {
            Self::Pool(engine) => engine.execution_options().clone(),
            Self::Connection(_) => ExecutionOptions::default(),
            Self::Local(handle) => handle.engine.execution_options().clone(),
        }
    }

    /// The engine behind the bind, if any.
    pub fn engine(&self) -> Option<&Engine> {
        match self {
            Self::Pool(engine) => Some(engine),
            Self::Connection(_) => None,
            Self::Local(handle) => Some(&handle.engine),
        }
    }

    /// The connection a reuse-enabled acquisition would return right now.
    pub(crate) fn current_cell(&self) -> Option<Arc<ConnectionCell>> {
        match self {
            Self::Connection(connection) => Some(Arc::clone(connection.cell())),
            Self::Pool(engine) => engine.current_cell(),
            Self::Local(handle) => handle.engine.current_cell(),
        }
    }
}

impl From<Engine> for Bind {
    fn from(engine: Engine) -> Self {
        Self::Pool(engine)
    }
}

impl From<&Engine> for Bind {
    fn from(engine: &Engine) -> Self {
        Self::Pool(engine.clone())
    }
}

impl From<ConnectionRef> for Bind {
    fn from(connection: ConnectionRef) -> Self {
        Self::Connection(connection)
    }
}

impl From<LocalHandle> for Bind {
    fn from(handle: LocalHandle) -> Self {
        Self::Local(handle)
    }
}

impl fmt::Debug for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(engine) => f.debug_tuple("Pool").field(engine).finish(),
            Self::Connection(connection) => f.debug_tuple("Connection").field(connection).finish(),
            Self::Local(handle) => f.debug_tuple("Local").field(handle).finish(),
        }
    }
}

/// Handle to an engine's task-local connection.
#[derive(Clone, Debug)]
pub struct LocalHandle {
    engine: Engine,
}

impl LocalHandle {
    pub(crate) fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Engine the handle draws connections from.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The connection currently bound to this task, if any.
    pub fn current(&self) -> Option<ConnectionRef> {
        self.engine.current_connection()
    }
}
