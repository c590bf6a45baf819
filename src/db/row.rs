//! Result row decoding.
//!
//! Rows are decoded in two ways:
//! 1. Typed: the caller names the logical [`ColumnType`] of a column, as
//!    statement pools and the schema layer do.
//! 2. Untyped: the database type name is classified into a `TypeCategory`
//!    and decoded accordingly, as native queries do.

use crate::error::{DbError, DbResult};
use crate::models::{ColumnType, SqlValue};
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// Address of a column inside a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRef<'a> {
    Index(usize),
    /// Matched case-insensitively
    Name(&'a str),
}

impl From<usize> for ColumnRef<'_> {
    fn from(index: usize) -> Self {
        ColumnRef::Index(index)
    }
}

impl<'a> From<&'a str> for ColumnRef<'a> {
    fn from(name: &'a str) -> Self {
        ColumnRef::Name(name)
    }
}

/// A row fetched from any supported backend.
pub enum DbRow {
    MySql(MySqlRow),
    Postgres(PgRow),
    SQLite(SqliteRow),
}

impl std::fmt::Debug for DbRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (backend, columns) = match self {
            DbRow::MySql(r) => ("MySql", r.columns().len()),
            DbRow::Postgres(r) => ("Postgres", r.columns().len()),
            DbRow::SQLite(r) => ("SQLite", r.columns().len()),
        };
        f.debug_struct("DbRow")
            .field("backend", &backend)
            .field("columns", &columns)
            .finish()
    }
}

macro_rules! with_row {
    ($row:expr, $r:ident => $body:expr) => {
        match $row {
            DbRow::MySql($r) => $body,
            DbRow::Postgres($r) => $body,
            DbRow::SQLite($r) => $body,
        }
    };
}

impl DbRow {
    pub fn len(&self) -> usize {
        with_row!(self, r => r.columns().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        with_row!(self, r => r.columns().iter().map(|c| c.name().to_string()).collect())
    }

    /// Resolve a column reference to its ordinal.
    pub fn index_of(&self, at: ColumnRef<'_>) -> DbResult<usize> {
        let len = self.len();
        match at {
            ColumnRef::Index(index) if index < len => Ok(index),
            ColumnRef::Index(index) => Err(DbError::invalid_input(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            ))),
            ColumnRef::Name(name) => with_row!(self, r => r
                .columns()
                .iter()
                .position(|c| c.name().eq_ignore_ascii_case(name)))
            .ok_or_else(|| {
                DbError::invalid_input(format!("Column not found in result: {}", name))
            }),
        }
    }

    /// Decode one column as the given logical type.
    pub fn decode(&self, at: ColumnRef<'_>, column_type: ColumnType) -> DbResult<SqlValue> {
        let idx = self.index_of(at)?;
        let value = match self {
            DbRow::MySql(r) => mysql::decode_typed(r, idx, column_type),
            DbRow::Postgres(r) => postgres::decode_typed(r, idx, column_type),
            DbRow::SQLite(r) => sqlite::decode_typed(r, idx, column_type),
        };
        value.map_err(|e| {
            DbError::internal(format!(
                "Failed to decode column {} as {}: {}",
                idx, column_type, e
            ))
        })
    }

    /// Decode every column by its reported database type, in column order.
    pub fn to_values(&self) -> Vec<SqlValue> {
        match self {
            DbRow::MySql(r) => (0..r.columns().len())
                .map(|idx| mysql::decode_any(r, idx))
                .collect(),
            DbRow::Postgres(r) => (0..r.columns().len())
                .map(|idx| postgres::decode_any(r, idx))
                .collect(),
            DbRow::SQLite(r) => (0..r.columns().len())
                .map(|idx| sqlite::decode_any(r, idx))
                .collect(),
        }
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Date,
    Timestamp,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, sqlite: bool) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower == "date" {
        return TypeCategory::Date;
    }

    if lower.starts_with("timestamp") || lower == "datetime" {
        return TypeCategory::Timestamp;
    }

    TypeCategory::Text
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Shared conversions
// =============================================================================

/// Interpret a stored boolean. Booleans are persisted as `'Y'` / `'N'`.
fn text_to_bool(text: &str) -> SqlValue {
    match text.trim().to_ascii_uppercase().as_str() {
        "" => SqlValue::Null,
        "Y" | "T" | "1" | "TRUE" | "YES" => SqlValue::Bool(true),
        _ => SqlValue::Bool(false),
    }
}

fn text_to_char(text: &str) -> SqlValue {
    text.chars().next().map_or(SqlValue::Null, SqlValue::Char)
}

fn text_or_null(value: Option<String>, f: impl FnOnce(String) -> SqlValue) -> SqlValue {
    value.map_or(SqlValue::Null, f)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(text).map(|ts| ts.date()))
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn narrow<T: TryFrom<i64>>(value: i64, column_type: ColumnType) -> Result<T, sqlx::Error> {
    T::try_from(value).map_err(|_| {
        sqlx::Error::Decode(format!("value {} does not fit {}", value, column_type).into())
    })
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    fn integer(row: &MySqlRow, idx: usize) -> Result<Option<i64>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.map(i64::from));
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return Ok(v.map(i64::from));
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return Ok(v.map(i64::from));
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return Ok(v.map(i64::from));
        }
        row.try_get::<Option<u64>, _>(idx)?
            .map(|v| {
                i64::try_from(v).map_err(|_| {
                    sqlx::Error::Decode(format!("value {} does not fit Long", v).into())
                })
            })
            .transpose()
    }

    fn float(row: &MySqlRow, idx: usize) -> Result<Option<f64>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return Ok(v.map(f64::from));
        }
        Ok(row
            .try_get::<Option<RawDecimal>, _>(idx)?
            .and_then(|d| d.0.parse().ok()))
    }

    fn text(row: &MySqlRow, idx: usize) -> Result<Option<String>, sqlx::Error> {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => Ok(v),
            // VARBINARY/BLOB-backed text columns
            Err(_) => Ok(row
                .try_get::<Option<Vec<u8>>, _>(idx)?
                .map(|b| String::from_utf8_lossy(&b).into_owned())),
        }
    }

    pub fn decode_typed(
        row: &MySqlRow,
        idx: usize,
        column_type: ColumnType,
    ) -> Result<SqlValue, sqlx::Error> {
        Ok(match column_type {
            ColumnType::Blob => row
                .try_get::<Option<Vec<u8>>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Bytes),
            ColumnType::Boolean => match text(row, idx) {
                Ok(v) => text_or_null(v, |t| text_to_bool(&t)),
                Err(_) => integer(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::Bool(v != 0)),
            },
            ColumnType::Character => text_or_null(text(row, idx)?, |t| text_to_char(&t)),
            ColumnType::Clob | ColumnType::String | ColumnType::EnumConst => {
                text_or_null(text(row, idx)?, SqlValue::Text)
            }
            ColumnType::Date => match row.try_get::<Option<NaiveDate>, _>(idx) {
                Ok(v) => v.map_or(SqlValue::Null, SqlValue::Date),
                Err(_) => row
                    .try_get::<Option<NaiveDateTime>, _>(idx)?
                    .map_or(SqlValue::Null, |ts| SqlValue::Date(ts.date())),
            },
            ColumnType::Timestamp => row
                .try_get::<Option<NaiveDateTime>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Timestamp),
            ColumnType::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(v) => v.map_or(SqlValue::Null, |d| SqlValue::Decimal(d.0)),
                Err(_) => float(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::Decimal(v.to_string())),
            },
            ColumnType::Double => float(row, idx)?.map_or(SqlValue::Null, SqlValue::Double),
            ColumnType::Float => float(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::Float(v as f32)),
            ColumnType::Short => integer(row, idx)?
                .map(|v| narrow(v, column_type).map(SqlValue::Short))
                .transpose()?
                .unwrap_or(SqlValue::Null),
            ColumnType::Integer => integer(row, idx)?
                .map(|v| narrow(v, column_type).map(SqlValue::Int))
                .transpose()?
                .unwrap_or(SqlValue::Null),
            ColumnType::Long => integer(row, idx)?.map_or(SqlValue::Null, SqlValue::Long),
        })
    }

    pub fn decode_any(row: &MySqlRow, idx: usize) -> SqlValue {
        let type_name = row.columns()[idx].type_info().name().to_string();
        let value = match categorize_type(&type_name, false) {
            TypeCategory::Integer => integer(row, idx).map(|v| v.map_or(SqlValue::Null, SqlValue::Long)),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::Bool)),
            TypeCategory::Decimal => decode_typed(row, idx, ColumnType::Decimal),
            TypeCategory::Float => decode_typed(row, idx, ColumnType::Double),
            TypeCategory::Binary => decode_typed(row, idx, ColumnType::Blob),
            TypeCategory::Date => decode_typed(row, idx, ColumnType::Date),
            TypeCategory::Timestamp => decode_typed(row, idx, ColumnType::Timestamp),
            TypeCategory::Text => decode_typed(row, idx, ColumnType::String),
        };
        value.unwrap_or_else(|e| {
            tracing::warn!(column = idx, type_name = %type_name, error = %e, "Failed to decode column");
            SqlValue::Null
        })
    }
}

mod postgres {
    use super::*;

    fn integer(row: &PgRow, idx: usize) -> Result<Option<i64>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.map(i64::from));
        }
        Ok(row.try_get::<Option<i16>, _>(idx)?.map(i64::from))
    }

    fn float(row: &PgRow, idx: usize) -> Result<Option<f64>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return Ok(v.map(f64::from));
        }
        Ok(row
            .try_get::<Option<RawDecimal>, _>(idx)?
            .and_then(|d| d.0.parse().ok()))
    }

    pub fn decode_typed(
        row: &PgRow,
        idx: usize,
        column_type: ColumnType,
    ) -> Result<SqlValue, sqlx::Error> {
        Ok(match column_type {
            ColumnType::Blob => row
                .try_get::<Option<Vec<u8>>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Bytes),
            ColumnType::Boolean => match row.try_get::<Option<String>, _>(idx) {
                Ok(v) => text_or_null(v, |t| text_to_bool(&t)),
                Err(_) => row
                    .try_get::<Option<bool>, _>(idx)?
                    .map_or(SqlValue::Null, SqlValue::Bool),
            },
            ColumnType::Character => {
                text_or_null(row.try_get::<Option<String>, _>(idx)?, |t| text_to_char(&t))
            }
            ColumnType::Clob | ColumnType::String | ColumnType::EnumConst => {
                text_or_null(row.try_get::<Option<String>, _>(idx)?, SqlValue::Text)
            }
            ColumnType::Date => match row.try_get::<Option<NaiveDate>, _>(idx) {
                Ok(v) => v.map_or(SqlValue::Null, SqlValue::Date),
                Err(_) => row
                    .try_get::<Option<NaiveDateTime>, _>(idx)?
                    .map_or(SqlValue::Null, |ts| SqlValue::Date(ts.date())),
            },
            ColumnType::Timestamp => match row.try_get::<Option<NaiveDateTime>, _>(idx) {
                Ok(v) => v.map_or(SqlValue::Null, SqlValue::Timestamp),
                Err(_) => row
                    .try_get::<Option<NaiveDate>, _>(idx)?
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map_or(SqlValue::Null, SqlValue::Timestamp),
            },
            ColumnType::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(v) => v.map_or(SqlValue::Null, |d| SqlValue::Decimal(d.0)),
                Err(_) => float(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::Decimal(v.to_string())),
            },
            ColumnType::Double => float(row, idx)?.map_or(SqlValue::Null, SqlValue::Double),
            ColumnType::Float => float(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::Float(v as f32)),
            ColumnType::Short => integer(row, idx)?
                .map(|v| narrow(v, column_type).map(SqlValue::Short))
                .transpose()?
                .unwrap_or(SqlValue::Null),
            ColumnType::Integer => integer(row, idx)?
                .map(|v| narrow(v, column_type).map(SqlValue::Int))
                .transpose()?
                .unwrap_or(SqlValue::Null),
            ColumnType::Long => integer(row, idx)?.map_or(SqlValue::Null, SqlValue::Long),
        })
    }

    pub fn decode_any(row: &PgRow, idx: usize) -> SqlValue {
        let type_name = row.columns()[idx].type_info().name().to_string();
        let value = match categorize_type(&type_name, false) {
            TypeCategory::Integer => integer(row, idx).map(|v| v.map_or(SqlValue::Null, SqlValue::Long)),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::Bool)),
            TypeCategory::Decimal => decode_typed(row, idx, ColumnType::Decimal),
            TypeCategory::Float => decode_typed(row, idx, ColumnType::Double),
            TypeCategory::Binary => decode_typed(row, idx, ColumnType::Blob),
            TypeCategory::Date => decode_typed(row, idx, ColumnType::Date),
            TypeCategory::Timestamp => decode_typed(row, idx, ColumnType::Timestamp),
            TypeCategory::Text => decode_typed(row, idx, ColumnType::String),
        };
        value.unwrap_or_else(|e| {
            tracing::warn!(column = idx, type_name = %type_name, error = %e, "Failed to decode column");
            SqlValue::Null
        })
    }
}

mod sqlite {
    use super::*;

    fn integer(row: &SqliteRow, idx: usize) -> Result<Option<i64>, sqlx::Error> {
        match row.try_get::<Option<i64>, _>(idx) {
            Ok(v) => Ok(v),
            Err(e) => match row.try_get::<Option<String>, _>(idx) {
                Ok(v) => Ok(v.and_then(|t| t.trim().parse().ok())),
                Err(_) => Err(e),
            },
        }
    }

    fn float(row: &SqliteRow, idx: usize) -> Result<Option<f64>, sqlx::Error> {
        match row.try_get::<Option<f64>, _>(idx) {
            Ok(v) => Ok(v),
            Err(e) => match row.try_get::<Option<String>, _>(idx) {
                Ok(v) => Ok(v.and_then(|t| t.trim().parse().ok())),
                Err(_) => Err(e),
            },
        }
    }

    pub fn decode_typed(
        row: &SqliteRow,
        idx: usize,
        column_type: ColumnType,
    ) -> Result<SqlValue, sqlx::Error> {
        Ok(match column_type {
            ColumnType::Blob => row
                .try_get::<Option<Vec<u8>>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Bytes),
            ColumnType::Boolean => match row.try_get::<Option<String>, _>(idx) {
                Ok(v) => text_or_null(v, |t| text_to_bool(&t)),
                Err(_) => integer(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::Bool(v != 0)),
            },
            ColumnType::Character => {
                text_or_null(row.try_get::<Option<String>, _>(idx)?, |t| text_to_char(&t))
            }
            ColumnType::Clob | ColumnType::String | ColumnType::EnumConst => {
                text_or_null(row.try_get::<Option<String>, _>(idx)?, SqlValue::Text)
            }
            ColumnType::Date => row
                .try_get::<Option<String>, _>(idx)?
                .and_then(|t| parse_date(&t))
                .map_or(SqlValue::Null, SqlValue::Date),
            ColumnType::Timestamp => row
                .try_get::<Option<String>, _>(idx)?
                .and_then(|t| parse_timestamp(&t))
                .map_or(SqlValue::Null, SqlValue::Timestamp),
            ColumnType::Decimal => float(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::Decimal(v.to_string())),
            ColumnType::Double => float(row, idx)?.map_or(SqlValue::Null, SqlValue::Double),
            ColumnType::Float => float(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::Float(v as f32)),
            ColumnType::Short => integer(row, idx)?
                .map(|v| narrow(v, column_type).map(SqlValue::Short))
                .transpose()?
                .unwrap_or(SqlValue::Null),
            ColumnType::Integer => integer(row, idx)?
                .map(|v| narrow(v, column_type).map(SqlValue::Int))
                .transpose()?
                .unwrap_or(SqlValue::Null),
            ColumnType::Long => integer(row, idx)?.map_or(SqlValue::Null, SqlValue::Long),
        })
    }

    pub fn decode_any(row: &SqliteRow, idx: usize) -> SqlValue {
        let type_name = row.columns()[idx].type_info().name().to_string();
        // Expression columns report NULL as their type; probe the value instead
        let value = match categorize_type(&type_name, true) {
            TypeCategory::Integer | TypeCategory::Boolean => {
                integer(row, idx).map(|v| v.map_or(SqlValue::Null, SqlValue::Long))
            }
            TypeCategory::Float | TypeCategory::Decimal => decode_typed(row, idx, ColumnType::Double),
            TypeCategory::Binary => decode_typed(row, idx, ColumnType::Blob),
            TypeCategory::Date | TypeCategory::Timestamp | TypeCategory::Text => {
                if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                    Ok(SqlValue::Long(v))
                } else if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                    Ok(SqlValue::Double(v))
                } else {
                    decode_typed(row, idx, ColumnType::String)
                }
            }
        };
        value.unwrap_or_else(|e| {
            tracing::warn!(column = idx, type_name = %type_name, error = %e, "Failed to decode column");
            SqlValue::Null
        })
    }
}
