//! # bindery-testing
//!
//! Test infrastructure for bindery.
//!
//! Everything runs in memory: a [`MockBackend`] scripts responses by
//! compiled SQL and records each operation its connections perform, a
//! [`MockConnector`] feeds those connections to a real
//! [`bindery_pool::Pool`], and a [`RecordingDialect`] records dispatches.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bindery_testing::{MockBackend, MockResponse, TestEngine};
//!
//! #[tokio::test]
//! async fn test_update() {
//!     let backend = MockBackend::new()
//!         .with_response("UPDATE users SET active = $1", MockResponse::status("UPDATE 3"));
//!     let t = TestEngine::new(backend, 2).await.unwrap();
//!
//!     let update = t.engine.statement("UPDATE users SET active = $1");
//!     let status = t.engine.status(&update, bindery::params![true]).await.unwrap();
//!     assert_eq!(status.rows_affected, 3);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod dialect;
pub mod fixtures;
pub mod mock;

pub use dialect::{DialectCall, RecordingDialect};
pub use fixtures::TestEngine;
pub use mock::{MockBackend, MockConnection, MockConnector, MockResponse, Op};
