//! Row representation for query results.
//!
//! Column names are shared between all rows of a result set through an
//! `Arc<[String]>`, so materializing a large result only allocates the
//! per-row value vectors.

use std::sync::Arc;

use crate::error::TypeError;
use crate::from_sql::FromSql;
use crate::value::SqlValue;

/// A single result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
    model: Option<Arc<str>>,
}

impl Row {
    /// Create a row from shared column names and its values.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self {
            columns,
            values,
            model: None,
        }
    }

    /// Create a row from owned column names.
    pub fn from_values<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        values: Vec<SqlValue>,
    ) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        Self::new(Arc::from(columns), values)
    }

    /// Column names of this row.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Shared handle to the column names.
    #[must_use]
    pub fn shared_columns(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    /// Raw values of this row.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume the row and return its values.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Name of the model this row was loaded through, if any.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Tag the row with the model it was loaded through.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<Arc<str>>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Raw value at `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Raw value of the column named `name` (ASCII case-insensitive).
    #[must_use]
    pub fn value_by_name(&self, name: &str) -> Option<&SqlValue> {
        self.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Index of the column named `name` (ASCII case-insensitive).
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Get the value at `index` converted to `T`.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        let value = self
            .values
            .get(index)
            .ok_or(TypeError::ColumnIndexOutOfBounds {
                index,
                len: self.values.len(),
            })?;
        T::from_sql(value)
    }

    /// Get the value of the column named `name` converted to `T`.
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T, TypeError> {
        let index = self
            .index_of(name)
            .ok_or_else(|| TypeError::ColumnNotFound(name.to_string()))?;
        self.get(index)
    }

    /// First column value, if the row has any columns.
    #[must_use]
    pub fn into_first_value(self) -> Option<SqlValue> {
        self.values.into_iter().next()
    }
}
