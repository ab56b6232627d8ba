//! # bindery-types
//!
//! Value and row vocabulary shared by the bindery crates.
//!
//! Every boundary in the binding layer (dialects, connections, pools and the
//! executor facade) speaks in terms of [`SqlValue`] and [`Row`]. Keeping them
//! in a small crate lets backend implementations depend on the vocabulary
//! without pulling in the executor.
//!
//! ## Features
//!
//! - `chrono` (default): Enable date/time values via chrono
//! - `uuid` (default): Enable UUID values
//! - `decimal` (default): Enable decimal values via rust_decimal
//! - `json`: Enable JSON values via serde_json
//!
//! ## Type Mappings
//!
//! | SQL Type | Rust Type |
//! |----------|-----------|
//! | `BOOLEAN` | `bool` |
//! | `SMALLINT` | `i16` |
//! | `INTEGER` | `i32` |
//! | `BIGINT` | `i64` |
//! | `REAL` | `f32` |
//! | `DOUBLE PRECISION` | `f64` |
//! | `NUMERIC` | `rust_decimal::Decimal` |
//! | `TEXT`/`VARCHAR` | `String` |
//! | `BYTEA`/`VARBINARY` | `Vec<u8>` |
//! | `DATE` | `chrono::NaiveDate` |
//! | `TIME` | `chrono::NaiveTime` |
//! | `TIMESTAMP` | `chrono::NaiveDateTime` |
//! | `UUID` | `uuid::Uuid` |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod from_sql;
pub mod row;
pub mod value;

pub use error::TypeError;
pub use from_sql::FromSql;
pub use row::Row;
pub use value::SqlValue;
