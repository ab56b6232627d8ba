//! # bindery
//!
//! Connection binding and query dispatch on top of a connection pool.
//!
//! bindery sits between application code issuing statements and a pool of
//! backend connections. It decides which connection a statement runs on,
//! makes sure every checked-out connection goes back, and dispatches the
//! statement through a [`Dialect`].
//!
//! ## Features
//!
//! - Task-local connection reuse, so statements inside one task share a
//!   connection and join its transaction
//! - Five query modes: `all`, `first`, `scalar`, `status` and lazy `iterate`
//! - Server-side cursors that release their connection when exhausted,
//!   closed or dropped
//! - Nested transactions where only the outermost scope talks to the backend
//! - Lazy acquisition that defers checkout until first use
//!
//! ## Example
//!
//! ```rust,ignore
//! use bindery::{Engine, params};
//!
//! let engine = Engine::new(pool, dialect);
//! let users = engine.statement("SELECT * FROM users WHERE org = :org");
//!
//! let rows = engine.all(&users, bindery::Params::new().named("org", "acme")).await?;
//!
//! engine
//!     .transaction()
//!     .run(|| async {
//!         engine.status(&archive, params![42]).await?;
//!         engine.status(&purge, params![42]).await?;
//!         Ok::<_, bindery::Error>(())
//!     })
//!     .await?;
//!
//! let mut cursor = engine.iterate(&users, ()).prefetch(100).cursor();
//! while let Some(row) = cursor.next().await? {
//!     // ...
//! }
//! ```
//!
//! ## Binds
//!
//! | Bind | Acquire | Release |
//! |------|---------|---------|
//! | [`Bind::Pool`] | task connection if any, else checkout | returns owned checkouts |
//! | [`Bind::Connection`] | the given connection | never |
//! | [`Bind::Local`] | task connection if any, else checkout and register | returns owned checkouts |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod acquire;
pub mod bind;
pub mod connection;
pub mod cursor;
pub mod database;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod executor;
pub mod from_row;
pub mod instrumentation;
pub mod local;
pub mod params;
pub mod pool;
pub mod statement;
pub mod transaction;

pub use acquire::{
    AcquireOptions, AcquiredConnection, ConnectionCell, ConnectionGuard, ConnectionRef,
    ConnectionStore,
};
pub use bind::{Bind, LocalHandle};
pub use connection::{Connection, CursorId, ExecuteResult};
pub use cursor::{CursorFactory, DEFAULT_PREFETCH, LazyCursor};
pub use database::Database;
pub use dialect::{BaseDialect, CompiledStatement, Dialect, ParamStyle};
pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use executor::{QueryExecutor, executor_for};
pub use from_row::FromRow;
pub use instrumentation::SanitizationConfig;
pub use local::{TaskKey, TaskLocalStore};
pub use params::{NamedParam, Params};
pub use pool::{ConnectionPool, Leased, PoolStatus};
pub use statement::{ExecutionOptions, RowModel, Statement};
pub use transaction::{IsolationLevel, Transaction, TransactionOptions, TransactionState};

pub use bindery_types::{FromSql, Row, SqlValue, TypeError};
