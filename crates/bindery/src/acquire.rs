//! Scoped connection acquisition.
//!
//! [`AcquiredConnection`] is the only way the rest of the crate touches a
//! connection. It is either *owned* (checked out of a pool by this scope,
//! which must give it back) or *borrowed* (found in the task-local store or
//! supplied by the caller, and given back by someone else). An owned
//! connection is released exactly once: by [`AcquiredConnection::release`]
//! on normal paths, or by `Drop` when the scope unwinds or its future is
//! cancelled.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::bind::Bind;
use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::local::{TaskKey, TaskLocalStore};
use crate::pool::{ConnectionPool, Leased};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Store of reusable connections, one per logical task.
pub type ConnectionStore = TaskLocalStore<Arc<ConnectionCell>>;

/// Options for acquiring a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct AcquireOptions {
    /// Maximum time to wait for the pool. Falls back to the engine default.
    pub timeout: Option<Duration>,
    /// Return the connection already bound to the current task, if any.
    pub reuse: bool,
    /// Defer the pool checkout until the connection is first used.
    pub lazy: bool,
    /// Offer a newly checked-out connection to later reuse-enabled
    /// acquisitions in the same task.
    pub reusable: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            reuse: false,
            lazy: false,
            reusable: true,
        }
    }
}

impl AcquireOptions {
    /// Create the default options: wait for the default timeout, always
    /// check out a fresh connection and offer it for reuse.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Set whether the task's current connection is reused.
    #[must_use]
    pub fn reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    /// Set whether the checkout is deferred until first use.
    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Set whether a new connection is registered for reuse.
    #[must_use]
    pub fn reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }
}

struct Origin {
    pool: Arc<dyn ConnectionPool>,
    timeout: Option<Duration>,
}

#[derive(Debug, Default)]
struct TxDepth {
    depth: usize,
    rollback_only: bool,
}

/// Shared state behind one connection instance.
///
/// Every handle to the same connection ([`AcquiredConnection`],
/// [`ConnectionRef`], the task-local store entry) points at one cell. The
/// async mutex serializes statements issued on the connection, and the
/// transaction depth lives here so nested scopes agree on it.
pub struct ConnectionCell {
    id: u64,
    dialect: Arc<dyn Dialect>,
    origin: Option<Origin>,
    slot: Mutex<Option<Leased>>,
    released: AtomicBool,
    reset_required: AtomicBool,
    rollback_pending: AtomicBool,
    // Pool owed the connection once the current lock holder lets go.
    return_to: parking_lot::Mutex<Option<Arc<dyn ConnectionPool>>>,
    tx: parking_lot::Mutex<TxDepth>,
}

impl ConnectionCell {
    fn with_slot(dialect: Arc<dyn Dialect>, origin: Option<Origin>, leased: Option<Leased>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            dialect,
            origin,
            slot: Mutex::new(leased),
            released: AtomicBool::new(false),
            reset_required: AtomicBool::new(false),
            rollback_pending: AtomicBool::new(false),
            return_to: parking_lot::Mutex::new(None),
            tx: parking_lot::Mutex::new(TxDepth::default()),
        }
    }

    pub(crate) fn ready(leased: Leased, dialect: Arc<dyn Dialect>) -> Self {
        Self::with_slot(dialect, None, Some(leased))
    }

    pub(crate) fn pending(
        dialect: Arc<dyn Dialect>,
        pool: Arc<dyn ConnectionPool>,
        timeout: Option<Duration>,
    ) -> Self {
        Self::with_slot(dialect, Some(Origin { pool, timeout }), None)
    }

    /// Identity of this connection instance within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Dialect that executes statements on this connection.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// Whether the owner has given the connection back.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn mark_reset_required(&self) {
        self.reset_required.store(true, Ordering::Release);
    }

    /// Have the next lock holder roll back before running anything else.
    pub(crate) fn schedule_rollback(&self) {
        self.rollback_pending.store(true, Ordering::Release);
    }

    /// Lock the connection, checking it out first if acquisition was lazy.
    ///
    /// A rollback scheduled by a dropped transaction runs here, before the
    /// caller gets the connection.
    pub(crate) async fn lock(&self) -> Result<ConnectionGuard<'_>> {
        let mut slot = self.slot.lock().await;
        if self.is_released() {
            self.hand_back(&mut slot);
            return Err(Error::ConnectionReleased);
        }
        if slot.is_none() {
            let Some(origin) = &self.origin else {
                return Err(Error::ConnectionReleased);
            };
            let leased = origin.pool.acquire(origin.timeout).await?;
            tracing::debug!(
                connection = self.id,
                pooled = leased.id(),
                "lazy connection checked out on first use"
            );
            *slot = Some(leased);
        }
        let Some(leased) = slot.as_mut() else {
            return Err(Error::ConnectionReleased);
        };
        if self.rollback_pending.swap(false, Ordering::AcqRel) {
            if let Err(e) = leased.connection_mut().rollback().await {
                self.mark_reset_required();
                tracing::warn!(connection = self.id, error = %e, "rollback of dropped transaction failed");
            } else {
                tracing::debug!(connection = self.id, "dropped transaction rolled back");
            }
        }
        Ok(ConnectionGuard {
            cell: self,
            slot: Some(slot),
        })
    }

    /// Pool id of the underlying connection, checking it out if lazy.
    pub(crate) async fn pooled_id(&self) -> Result<u64> {
        Ok(self.lock().await?.pooled_id())
    }

    /// Return the connection to the pool recorded at release, unless
    /// someone holds the lock; the holder then does it on unlock.
    fn return_if_released(&self) {
        if self.return_to.lock().is_none() {
            return;
        }
        if let Ok(mut slot) = self.slot.try_lock() {
            self.hand_back(&mut slot);
        }
    }

    fn hand_back(&self, slot: &mut Option<Leased>) {
        let Some(pool) = self.return_to.lock().take() else {
            return;
        };
        if let Some(leased) = slot.take() {
            self.give_back(&pool, leased);
        }
    }

    fn give_back(&self, pool: &Arc<dyn ConnectionPool>, mut leased: Leased) {
        if self.reset_required.load(Ordering::Acquire) {
            leased.mark_reset_required();
        }
        tracing::debug!(
            connection = self.id,
            pooled = leased.id(),
            reset = leased.reset_required(),
            "connection released"
        );
        pool.release(leased);
    }

    pub(crate) fn transaction_depth(&self) -> usize {
        self.tx.lock().depth
    }

    pub(crate) fn begin_transaction_depth(&self) {
        *self.tx.lock() = TxDepth {
            depth: 1,
            rollback_only: false,
        };
    }

    pub(crate) fn enter_nested(&self) -> usize {
        let mut tx = self.tx.lock();
        tx.depth += 1;
        tx.depth
    }

    pub(crate) fn exit_nested(&self, rollback: bool) {
        let mut tx = self.tx.lock();
        tx.depth = tx.depth.saturating_sub(1);
        if rollback {
            tx.rollback_only = true;
        }
    }

    /// Clear the transaction depth, returning the number of nested scopes
    /// still open and whether an inner scope asked for rollback.
    pub(crate) fn end_transaction_depth(&self) -> (usize, bool) {
        let tx = std::mem::take(&mut *self.tx.lock());
        (tx.depth.saturating_sub(1), tx.rollback_only)
    }
}

/// Exclusive access to a connection for the duration of one operation.
///
/// If the owner releases the connection while the guard is held, dropping
/// the guard returns it to the pool.
pub struct ConnectionGuard<'a> {
    cell: &'a ConnectionCell,
    // Always `Some(Some(_))` until the guard is dropped.
    slot: Option<MutexGuard<'a, Option<Leased>>>,
}

impl ConnectionGuard<'_> {
    fn leased(&self) -> Option<&Leased> {
        self.slot.as_deref().and_then(Option::as_ref)
    }

    /// Pool id of the locked connection.
    pub fn pooled_id(&self) -> u64 {
        self.leased().map_or(0, Leased::id)
    }
}

impl Deref for ConnectionGuard<'_> {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        match self.leased() {
            Some(leased) => leased.connection(),
            None => unreachable!("guards are only built over a checked-out connection"),
        }
    }
}

impl DerefMut for ConnectionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.slot.as_deref_mut().and_then(Option::as_mut) {
            Some(leased) => leased.connection_mut(),
            None => unreachable!("guards are only built over a checked-out connection"),
        }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        // Unlock first so a release racing with this drop cannot miss it.
        drop(self.slot.take());
        self.cell.return_if_released();
    }
}

impl fmt::Debug for ConnectionGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("connection", &self.cell.id())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ConnectionCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCell")
            .field("id", &self.id)
            .field("dialect", &self.dialect.name())
            .field("lazy", &self.origin.is_some())
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// A cloneable handle to a live connection, usable as a [`Bind`].
///
/// Holding a `ConnectionRef` does not keep the connection checked out: once
/// its owner releases it, operations fail with
/// [`Error::ConnectionReleased`].
#[derive(Clone)]
pub struct ConnectionRef {
    cell: Arc<ConnectionCell>,
}

impl ConnectionRef {
    /// Wrap a connection that is not managed by any pool.
    ///
    /// The connection is closed when the last handle is dropped.
    pub fn new(connection: Box<dyn Connection>, dialect: Arc<dyn Dialect>) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let cell = ConnectionCell::ready(Leased::new(id, connection), dialect);
        Self {
            cell: Arc::new(cell),
        }
    }

    pub(crate) fn from_cell(cell: Arc<ConnectionCell>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &Arc<ConnectionCell> {
        &self.cell
    }

    /// Identity of the connection instance.
    pub fn id(&self) -> u64 {
        self.cell.id()
    }

    /// Dialect of the connection.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        self.cell.dialect()
    }

    /// Whether both handles refer to the same connection instance.
    pub fn ptr_eq(&self, other: &ConnectionRef) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Whether the owner has given the connection back.
    pub fn is_released(&self) -> bool {
        self.cell.is_released()
    }

    /// Whether a transaction is active on the connection.
    pub fn in_transaction(&self) -> bool {
        self.cell.transaction_depth() > 0
    }

    /// Pool id of the underlying connection.
    pub async fn pooled_id(&self) -> Result<u64> {
        self.cell.pooled_id().await
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionRef").field(&self.cell.id()).finish()
    }
}

struct Registration {
    store: Arc<ConnectionStore>,
    key: TaskKey,
}

enum Ownership {
    Owned {
        pool: Arc<dyn ConnectionPool>,
        registration: Option<Registration>,
    },
    Borrowed,
    Released,
}

/// A connection held by one scope.
pub struct AcquiredConnection {
    cell: Arc<ConnectionCell>,
    ownership: Ownership,
}

impl AcquiredConnection {
    pub(crate) fn owned(
        cell: Arc<ConnectionCell>,
        pool: Arc<dyn ConnectionPool>,
        store: Option<(Arc<ConnectionStore>, TaskKey)>,
    ) -> Self {
        Self {
            cell,
            ownership: Ownership::Owned {
                pool,
                registration: store.map(|(store, key)| Registration { store, key }),
            },
        }
    }

    pub(crate) fn borrowed(cell: Arc<ConnectionCell>) -> Self {
        Self {
            cell,
            ownership: Ownership::Borrowed,
        }
    }

    pub(crate) fn cell(&self) -> &Arc<ConnectionCell> {
        &self.cell
    }

    /// Identity of the connection instance.
    pub fn id(&self) -> u64 {
        self.cell.id()
    }

    /// Dialect of the connection.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        self.cell.dialect()
    }

    /// Whether this scope checked the connection out and must release it.
    pub fn is_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Owned { .. })
    }

    /// Whether the connection is registered as the task's current one.
    pub fn is_registered(&self) -> bool {
        matches!(
            self.ownership,
            Ownership::Owned {
                registration: Some(_),
                ..
            }
        )
    }

    /// Lock the connection for one operation.
    ///
    /// A lazily acquired connection is checked out here on first use.
    pub async fn lock(&self) -> Result<ConnectionGuard<'_>> {
        self.cell.lock().await
    }

    /// Pool id of the underlying connection.
    pub async fn pooled_id(&self) -> Result<u64> {
        self.cell.pooled_id().await
    }

    /// A handle to this connection.
    pub fn connection_ref(&self) -> ConnectionRef {
        ConnectionRef::from_cell(Arc::clone(&self.cell))
    }

    /// This connection as a bind, so statements can run on it explicitly.
    pub fn as_bind(&self) -> Bind {
        Bind::Connection(self.connection_ref())
    }

    /// Have the pool reset the connection before reusing it.
    pub fn mark_reset_required(&self) {
        self.cell.mark_reset_required();
    }

    /// Give the connection back. A no-op for borrowed connections.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Stop offering the connection to reuse-enabled acquisitions of the
    /// task. It stays checked out until released.
    pub(crate) fn unregister(&mut self) {
        if let Ownership::Owned { registration, .. } = &mut self.ownership {
            if let Some(registration) = registration.take() {
                registration
                    .store
                    .remove_if(registration.key, |cell| Arc::ptr_eq(cell, &self.cell));
            }
        }
    }

    fn release_inner(&mut self) {
        self.unregister();
        let Ownership::Owned { pool, .. } =
            std::mem::replace(&mut self.ownership, Ownership::Released)
        else {
            return;
        };

        // Record the pool before looking at the slot so that a lock holder
        // finishing concurrently finds it and hands the connection back.
        self.cell.released.store(true, Ordering::Release);
        *self.cell.return_to.lock() = Some(pool);
        self.cell.return_if_released();
        if self.cell.return_to.lock().is_some() {
            tracing::debug!(
                connection = self.cell.id(),
                "connection busy at release, returning it when the operation finishes"
            );
        }
    }
}

impl Drop for AcquiredConnection {
    fn drop(&mut self) {
        if self.is_owned() {
            tracing::debug!(connection = self.cell.id(), "releasing connection on drop");
        }
        self.release_inner();
    }
}

impl fmt::Debug for AcquiredConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ownership = match self.ownership {
            Ownership::Owned { .. } => "owned",
            Ownership::Borrowed => "borrowed",
            Ownership::Released => "released",
        };
        f.debug_struct("AcquiredConnection")
            .field("id", &self.cell.id())
            .field("ownership", &ownership)
            .finish()
    }
}
