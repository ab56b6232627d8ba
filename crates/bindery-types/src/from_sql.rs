//! Trait for converting from SQL values to Rust types.

use crate::error::TypeError;
use crate::value::SqlValue;

/// Trait for types that can be converted from SQL values.
///
/// Implemented for common Rust types so values can be extracted from rows
/// and scalar results with [`Row::get`](crate::Row::get).
pub trait FromSql: Sized {
    /// Convert from a SQL value to this type.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert from an optional SQL value.
    ///
    /// Returns `None` if the value is NULL.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn mismatch(expected: &'static str, value: &SqlValue) -> TypeError {
    match value {
        SqlValue::Null => TypeError::UnexpectedNull,
        _ => TypeError::TypeMismatch {
            expected,
            actual: value.type_name().to_string(),
        },
    }
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            SqlValue::SmallInt(v) => Ok(*v != 0),
            SqlValue::Int(v) => Ok(*v != 0),
            _ => Err(mismatch("bool", value)),
        }
    }
}

impl FromSql for i16 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::SmallInt(v) => Ok(*v),
            SqlValue::Int(v) => {
                i16::try_from(*v).map_err(|_| TypeError::OutOfRange { target_type: "i16" })
            }
            _ => Err(mismatch("i16", value)),
        }
    }
}

impl FromSql for i32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Int(v) => Ok(*v),
            SqlValue::SmallInt(v) => Ok(i32::from(*v)),
            SqlValue::BigInt(v) => {
                i32::try_from(*v).map_err(|_| TypeError::OutOfRange { target_type: "i32" })
            }
            _ => Err(mismatch("i32", value)),
        }
    }
}

impl FromSql for i64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value.as_i64().ok_or_else(|| mismatch("i64", value))
    }
}

impl FromSql for u64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        let v = value.as_i64().ok_or_else(|| mismatch("u64", value))?;
        u64::try_from(v).map_err(|_| TypeError::OutOfRange { target_type: "u64" })
    }
}

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            _ => Err(mismatch("f32", value)),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Text(v) => Ok(v.clone()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bytes(v) => Ok(v.to_vec()),
            _ => Err(mismatch("Vec<u8>", value)),
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

#[cfg(feature = "uuid")]
impl FromSql for uuid::Uuid {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Uuid(v) => Ok(*v),
            SqlValue::Text(s) => s
                .parse()
                .map_err(|e| TypeError::InvalidUuid(format!("{e}"))),
            _ => Err(mismatch("Uuid", value)),
        }
    }
}

#[cfg(feature = "decimal")]
impl FromSql for rust_decimal::Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Decimal(v) => Ok(*v),
            SqlValue::Int(v) => Ok(rust_decimal::Decimal::from(*v)),
            SqlValue::BigInt(v) => Ok(rust_decimal::Decimal::from(*v)),
            SqlValue::Text(s) => s
                .parse()
                .map_err(|e| TypeError::InvalidDecimal(format!("{e}"))),
            _ => Err(mismatch("Decimal", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveDate {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Date(v) => Ok(*v),
            SqlValue::Timestamp(v) => Ok(v.date()),
            _ => Err(mismatch("NaiveDate", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveDateTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Timestamp(v) => Ok(*v),
            SqlValue::TimestampTz(v) => Ok(v.naive_utc()),
            _ => Err(mismatch("NaiveDateTime", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::DateTime<chrono::FixedOffset> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::TimestampTz(v) => Ok(*v),
            _ => Err(mismatch("DateTime<FixedOffset>", value)),
        }
    }
}

#[cfg(feature = "json")]
impl FromSql for serde_json::Value {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Json(v) => Ok(v.clone()),
            SqlValue::Text(s) => serde_json::from_str(s).map_err(|e| TypeError::TypeMismatch {
                expected: "JSON",
                actual: format!("invalid JSON: {e}"),
            }),
            SqlValue::Null => Ok(serde_json::Value::Null),
            _ => Err(mismatch("JSON", value)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_sql_i32() {
        assert_eq!(i32::from_sql(&SqlValue::Int(42)).unwrap(), 42);
        assert_eq!(i32::from_sql(&SqlValue::SmallInt(4)).unwrap(), 4);
    }

    #[test]
    fn test_from_sql_null_is_unexpected() {
        assert!(matches!(
            i32::from_sql(&SqlValue::Null),
            Err(TypeError::UnexpectedNull)
        ));
    }

    #[test]
    fn test_from_sql_option() {
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Int(42)).unwrap(), Some(42));
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Null).unwrap(), None);
    }

    #[test]
    fn test_from_sql_mismatch() {
        let err = String::from_sql(&SqlValue::Int(1)).unwrap_err();
        assert!(err.to_string().contains("expected String"));
    }

    #[test]
    fn test_bigint_out_of_range_for_i32() {
        assert!(matches!(
            i32::from_sql(&SqlValue::BigInt(i64::MAX)),
            Err(TypeError::OutOfRange { target_type: "i32" })
        ));
    }

    proptest! {
        #[test]
        fn prop_i32_widens_to_i64(v in any::<i32>()) {
            prop_assert_eq!(i64::from_sql(&SqlValue::Int(v)).unwrap(), i64::from(v));
        }

        #[test]
        fn prop_bigint_narrowing_matches_try_from(v in any::<i64>()) {
            let narrowed = i32::from_sql(&SqlValue::BigInt(v)).ok();
            prop_assert_eq!(narrowed, i32::try_from(v).ok());
        }
    }
}
