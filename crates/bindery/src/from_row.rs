//! Mapping rows onto Rust types.
//!
//! Used by [`QueryExecutor::all_as`](crate::QueryExecutor::all_as) and
//! [`QueryExecutor::first_as`](crate::QueryExecutor::first_as). Tuples of up
//! to four [`FromSql`] values map positionally.

use bindery_types::{FromSql, Row};

use crate::error::Error;

/// Trait for types that can be constructed from a result row.
///
/// # Example
///
/// ```rust,ignore
/// use bindery::{Error, FromRow, Row};
///
/// struct User {
///     id: i32,
///     name: String,
/// }
///
/// impl FromRow for User {
///     fn from_row(row: &Row) -> Result<Self, Error> {
///         Ok(Self {
///             id: row.get_by_name("id")?,
///             name: row.get_by_name("name")?,
///         })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    /// Construct an instance of this type from a row.
    ///
    /// # Errors
    ///
    /// Returns an error if a required column is missing or a value cannot
    /// be converted to the expected Rust type.
    fn from_row(row: &Row) -> Result<Self, Error>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self, Error> {
        Ok(row.clone())
    }
}

macro_rules! tuple_from_row {
    ($($idx:tt => $ty:ident),+) => {
        impl<$($ty: FromSql),+> FromRow for ($($ty,)+) {
            fn from_row(row: &Row) -> Result<Self, Error> {
                Ok(($(row.get::<$ty>($idx)?,)+))
            }
        }
    };
}

tuple_from_row!(0 => A);
tuple_from_row!(0 => A, 1 => B);
tuple_from_row!(0 => A, 1 => B, 2 => C);
tuple_from_row!(0 => A, 1 => B, 2 => C, 3 => D);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bindery_types::SqlValue;

    struct TestUser {
        id: i32,
        name: String,
    }

    impl FromRow for TestUser {
        fn from_row(row: &Row) -> Result<Self, Error> {
            Ok(Self {
                id: row.get_by_name("id")?,
                name: row.get_by_name("name")?,
            })
        }
    }

    fn user_row() -> Row {
        Row::from_values(
            ["id", "name"],
            vec![SqlValue::Int(1), SqlValue::from("Alice")],
        )
    }

    #[test]
    fn test_manual_impl() {
        let user = TestUser::from_row(&user_row()).unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(user.name, "Alice");
    }

    #[test]
    fn test_tuple_impl() {
        let (id, name): (i64, String) = FromRow::from_row(&user_row()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(name, "Alice");
    }

    #[test]
    fn test_missing_column_is_type_error() {
        let row = Row::from_values(["id"], vec![SqlValue::Int(1)]);
        assert!(matches!(TestUser::from_row(&row), Err(Error::Type(_))));
    }
}
