//! Logical column types and the values bound to or read from them.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Logical column type of an entity field.
///
/// Each dialect maps every variant to exactly one data-type policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Blob,
    Boolean,
    Character,
    Clob,
    Date,
    Decimal,
    Double,
    Float,
    Short,
    Integer,
    Long,
    String,
    Timestamp,
    EnumConst,
}

impl ColumnType {
    pub const ALL: [ColumnType; 14] = [
        ColumnType::Blob,
        ColumnType::Boolean,
        ColumnType::Character,
        ColumnType::Clob,
        ColumnType::Date,
        ColumnType::Decimal,
        ColumnType::Double,
        ColumnType::Float,
        ColumnType::Short,
        ColumnType::Integer,
        ColumnType::Long,
        ColumnType::String,
        ColumnType::Timestamp,
        ColumnType::EnumConst,
    ];

    /// Whether values of this type are compared as numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Double | Self::Float | Self::Short | Self::Integer | Self::Long
        )
    }

    /// Whether this type can act as an optimistic-lock version column.
    pub fn is_version_type(&self) -> bool {
        matches!(self, Self::Short | Self::Integer | Self::Long | Self::Timestamp)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A value travelling between records, parameter slots and result rows.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Exact decimal kept in its textual form.
    Decimal(String),
    Char(char),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Read the value as a signed integer when it has an integral representation.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Short(v) => Some(*v as i64),
            SqlValue::Int(v) => Some(*v as i64),
            SqlValue::Long(v) => Some(*v),
            SqlValue::Bool(v) => Some(*v as i64),
            SqlValue::Decimal(v) | SqlValue::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Read the value as a float when it has a numeric representation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Float(v) => Some(*v as f64),
            SqlValue::Double(v) => Some(*v),
            SqlValue::Decimal(v) | SqlValue::Text(v) => v.trim().parse().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Read the value as text, formatting scalars the way they would be displayed.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null | SqlValue::Bytes(_) => None,
            SqlValue::Text(v) | SqlValue::Decimal(v) => Some(v.clone()),
            SqlValue::Char(c) => Some(c.to_string()),
            SqlValue::Bool(v) => Some(v.to_string()),
            SqlValue::Short(v) => Some(v.to_string()),
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Long(v) => Some(v.to_string()),
            SqlValue::Float(v) => Some(v.to_string()),
            SqlValue::Double(v) => Some(v.to_string()),
            SqlValue::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            SqlValue::Timestamp(v) => Some(v.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }

    /// Convert to JSON for display. Binary data is base64 encoded.
    pub fn to_json(&self) -> JsonValue {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(v) => JsonValue::Bool(*v),
            SqlValue::Short(v) => JsonValue::Number((*v).into()),
            SqlValue::Int(v) => JsonValue::Number((*v).into()),
            SqlValue::Long(v) => JsonValue::Number((*v).into()),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v as f64)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            SqlValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            SqlValue::Bytes(v) => JsonValue::String(STANDARD.encode(v)),
            other => other
                .as_text()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i16> for SqlValue {
    fn from(value: i16) -> Self {
        SqlValue::Short(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Long(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Double(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One entry of an ordered parameter list produced while rendering SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    pub column_type: ColumnType,
    pub value: SqlValue,
}

impl SqlParameter {
    pub fn new(column_type: ColumnType, value: impl Into<SqlValue>) -> Self {
        Self {
            column_type,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_i64_conversions() {
        assert_eq!(SqlValue::Short(3).as_i64(), Some(3));
        assert_eq!(SqlValue::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(SqlValue::Double(1.5).as_i64(), None);
        assert_eq!(SqlValue::Null.as_i64(), None);
    }

    #[test]
    fn test_as_f64_conversions() {
        assert_eq!(SqlValue::Decimal("12.50".into()).as_f64(), Some(12.5));
        assert_eq!(SqlValue::Int(7).as_f64(), Some(7.0));
    }

    #[test]
    fn test_to_json_encodes_bytes() {
        let value = SqlValue::Bytes(b"hello world".to_vec());
        assert_eq!(value.to_json(), JsonValue::String("aGVsbG8gd29ybGQ=".to_string()));
    }

    #[test]
    fn test_to_json_timestamp() {
        let ts = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 0)
            .unwrap();
        assert_eq!(
            SqlValue::Timestamp(ts).to_json(),
            JsonValue::String("2024-02-29 13:05:00".to_string())
        );
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i32> = None;
        assert_eq!(SqlValue::from(none), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
    }
}
