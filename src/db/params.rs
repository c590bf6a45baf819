//! Parameter binding for database queries.
//!
//! Binds [`SqlParameter`] values to database-specific query objects. NULLs are
//! bound with the Rust type matching the parameter's column type so the server
//! sees a typed NULL.

use crate::models::{ColumnType, SqlParameter, SqlValue};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Bind one parameter. Every backend binds the same Rust types.
macro_rules! bind_value {
    ($query:expr, $param:expr) => {
        match &$param.value {
            SqlValue::Null => match $param.column_type {
                ColumnType::Blob => $query.bind(None::<Vec<u8>>),
                ColumnType::Short => $query.bind(None::<i16>),
                ColumnType::Integer => $query.bind(None::<i32>),
                ColumnType::Long => $query.bind(None::<i64>),
                ColumnType::Float => $query.bind(None::<f32>),
                ColumnType::Double | ColumnType::Decimal => $query.bind(None::<f64>),
                ColumnType::Date => $query.bind(None::<chrono::NaiveDate>),
                ColumnType::Timestamp => $query.bind(None::<chrono::NaiveDateTime>),
                ColumnType::Boolean
                | ColumnType::Character
                | ColumnType::String
                | ColumnType::Clob
                | ColumnType::EnumConst => $query.bind(None::<String>),
            },
            SqlValue::Bool(v) => $query.bind(*v),
            SqlValue::Short(v) => $query.bind(*v),
            SqlValue::Int(v) => $query.bind(*v),
            SqlValue::Long(v) => $query.bind(*v),
            SqlValue::Float(v) => $query.bind(*v),
            SqlValue::Double(v) => $query.bind(*v),
            SqlValue::Decimal(v) => $query.bind(v.trim().parse::<f64>().ok()),
            SqlValue::Char(v) => $query.bind(v.to_string()),
            SqlValue::Text(v) => $query.bind(v.clone()),
            SqlValue::Bytes(v) => $query.bind(v.clone()),
            SqlValue::Date(v) => $query.bind(*v),
            SqlValue::Timestamp(v) => $query.bind(*v),
        }
    };
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &SqlParameter,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    bind_value!(query, param)
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &SqlParameter,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    bind_value!(query, param)
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &SqlParameter,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    bind_value!(query, param)
}
