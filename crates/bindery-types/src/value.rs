//! SQL value representation.

use bytes::Bytes;

/// A SQL value as exchanged with a dialect or connection.
///
/// The variants cover the portable subset of SQL types. Backends map their
/// native types onto this enum when producing rows and back again when
/// binding parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// NULL value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// 16-bit signed integer (SMALLINT).
    SmallInt(i16),
    /// 32-bit signed integer (INTEGER).
    Int(i32),
    /// 64-bit signed integer (BIGINT).
    BigInt(i64),
    /// 32-bit floating point (REAL).
    Float(f32),
    /// 64-bit floating point (DOUBLE PRECISION).
    Double(f64),
    /// Character data (TEXT, VARCHAR, CHAR).
    Text(String),
    /// Binary data (BYTEA, VARBINARY, BLOB).
    Bytes(Bytes),
    /// Exact numeric value (NUMERIC, DECIMAL).
    #[cfg(feature = "decimal")]
    Decimal(rust_decimal::Decimal),
    /// UUID value.
    #[cfg(feature = "uuid")]
    Uuid(uuid::Uuid),
    /// Date value (DATE).
    #[cfg(feature = "chrono")]
    Date(chrono::NaiveDate),
    /// Time value (TIME).
    #[cfg(feature = "chrono")]
    Time(chrono::NaiveTime),
    /// Timestamp without time zone (TIMESTAMP).
    #[cfg(feature = "chrono")]
    Timestamp(chrono::NaiveDateTime),
    /// Timestamp with time zone (TIMESTAMPTZ).
    #[cfg(feature = "chrono")]
    TimestampTz(chrono::DateTime<chrono::FixedOffset>),
    /// JSON document.
    #[cfg(feature = "json")]
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as a bool, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an i64 if it is any integer variant.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as an f64, if it is a floating point variant.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a string slice, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as bytes, if it is binary.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Get the SQL type name of this value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INTEGER",
            Self::BigInt(_) => "BIGINT",
            Self::Float(_) => "REAL",
            Self::Double(_) => "DOUBLE PRECISION",
            Self::Text(_) => "TEXT",
            Self::Bytes(_) => "BYTEA",
            #[cfg(feature = "decimal")]
            Self::Decimal(_) => "NUMERIC",
            #[cfg(feature = "uuid")]
            Self::Uuid(_) => "UUID",
            #[cfg(feature = "chrono")]
            Self::Date(_) => "DATE",
            #[cfg(feature = "chrono")]
            Self::Time(_) => "TIME",
            #[cfg(feature = "chrono")]
            Self::Timestamp(_) => "TIMESTAMP",
            #[cfg(feature = "chrono")]
            Self::TimestampTz(_) => "TIMESTAMPTZ",
            #[cfg(feature = "json")]
            Self::Json(_) => "JSON",
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        Self::SmallInt(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for SqlValue {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

#[cfg(feature = "uuid")]
impl From<uuid::Uuid> for SqlValue {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

#[cfg(feature = "decimal")]
impl From<rust_decimal::Decimal> for SqlValue {
    fn from(v: rust_decimal::Decimal) -> Self {
        Self::Decimal(v)
    }
}

#[cfg(feature = "chrono")]
impl From<chrono::NaiveDate> for SqlValue {
    fn from(v: chrono::NaiveDate) -> Self {
        Self::Date(v)
    }
}

#[cfg(feature = "chrono")]
impl From<chrono::NaiveDateTime> for SqlValue {
    fn from(v: chrono::NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_default() {
        assert!(SqlValue::default().is_null());
        assert_eq!(SqlValue::default().type_name(), "NULL");
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(SqlValue::SmallInt(7).as_i64(), Some(7));
        assert_eq!(SqlValue::Int(-3).as_i64(), Some(-3));
        assert_eq!(SqlValue::Text("7".into()).as_i64(), None);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(Some(5i32)), SqlValue::Int(5));
        assert_eq!(SqlValue::from(None::<i32>), SqlValue::Null);
    }

    #[test]
    fn test_text_and_bytes() {
        assert_eq!(SqlValue::from("abc").as_str(), Some("abc"));
        assert_eq!(SqlValue::from(vec![1u8, 2]).as_bytes(), Some(&[1u8, 2][..]));
    }
}
