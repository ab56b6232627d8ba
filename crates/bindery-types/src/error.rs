//! Type conversion error types.

use thiserror::Error;

/// Errors that can occur while reading values out of rows.
#[derive(Debug, Error)]
pub enum TypeError {
    /// Value is null when non-null was expected.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Type mismatch during conversion.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        actual: String,
    },

    /// Value is out of range for target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// Column index is past the end of the row.
    #[error("column index {index} out of bounds (row has {len} columns)")]
    ColumnIndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Number of columns in the row.
        len: usize,
    },

    /// No column with the requested name.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Invalid UUID value.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    /// Invalid decimal value.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),
}
