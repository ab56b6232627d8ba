//! # bindery-pool
//!
//! Bounded async connection pool implementing [`bindery::ConnectionPool`].
//!
//! ## Features
//!
//! - Fair waiting: callers are served in arrival order
//! - Idle reuse, most recently returned first
//! - Validation on checkout and, optionally, on checkin
//! - Idle timeout and maximum lifetime
//! - Reset before reuse for connections that were marked or when
//!   `reset_on_return` is set
//!
//! ## Example
//!
//! ```rust,ignore
//! use bindery::{BaseDialect, Engine};
//! use bindery_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .min_connections(2)
//!     .max_connections(20)
//!     .idle_timeout(Duration::from_secs(300));
//!
//! let pool = Pool::new(config, connector).await?;
//! let engine = Engine::new(Arc::new(pool), Arc::new(BaseDialect::default()));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use lifecycle::{ConnectionMetadata, ConnectionState, Connector, Expiry};
pub use pool::Pool;
