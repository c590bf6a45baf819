//! Live catalog reader.
//!
//! Reads schemas, tables, columns, foreign keys and indexes from SQLite,
//! PostgreSQL and MySQL system catalogs.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface.

use crate::db::pool::DbPool;
use crate::error::DbResult;
use crate::models::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo, TableType};
use tracing::debug;

/// Catalog reader dispatching to the backend of a pool.
pub struct CatalogReader;

impl CatalogReader {
    /// List schemas (databases on MySQL, attached databases on SQLite).
    pub async fn list_schemas(pool: &DbPool) -> DbResult<Vec<String>> {
        match pool {
            DbPool::Postgres(p) => postgres::list_schemas(p).await,
            DbPool::MySql(p) => mysql::list_schemas(p).await,
            DbPool::SQLite(p) => sqlite::list_schemas(p).await,
        }
    }

    /// List tables and views of a schema, or of the connection default.
    pub async fn list_tables(pool: &DbPool, schema: Option<&str>) -> DbResult<Vec<TableInfo>> {
        match pool {
            DbPool::Postgres(p) => postgres::list_tables(p, schema).await,
            DbPool::MySql(p) => mysql::list_tables(p, schema).await,
            DbPool::SQLite(p) => sqlite::list_tables(p, schema).await,
        }
    }

    /// Columns of a table or view in ordinal order. Empty when it does not exist.
    pub async fn columns(
        pool: &DbPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ColumnInfo>> {
        match pool {
            DbPool::Postgres(p) => postgres::columns(p, schema, table).await,
            DbPool::MySql(p) => mysql::columns(p, schema, table).await,
            DbPool::SQLite(p) => sqlite::columns(p, schema, table).await,
        }
    }

    pub async fn foreign_keys(
        pool: &DbPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ForeignKeyInfo>> {
        match pool {
            DbPool::Postgres(p) => postgres::foreign_keys(p, schema, table).await,
            DbPool::MySql(p) => mysql::foreign_keys(p, schema, table).await,
            DbPool::SQLite(p) => sqlite::foreign_keys(p, schema, table).await,
        }
    }

    /// Indexes of a table, including those backing unique and primary keys.
    pub async fn indexes(
        pool: &DbPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        match pool {
            DbPool::Postgres(p) => postgres::indexes(p, schema, table).await,
            DbPool::MySql(p) => mysql::indexes(p, schema, table).await,
            DbPool::SQLite(p) => sqlite::indexes(p, schema, table).await,
        }
    }
}

/// Fold per-column foreign key rows into one record per constraint, keeping row order.
fn group_foreign_keys(rows: Vec<(String, String, String, String)>) -> Vec<ForeignKeyInfo> {
    let mut keys: Vec<ForeignKeyInfo> = Vec::new();
    for (name, column, referenced_table, referenced_column) in rows {
        match keys
            .iter_mut()
            .find(|k| k.name.as_deref() == Some(name.as_str()))
        {
            Some(key) => {
                key.columns.push(column);
                key.referenced_columns.push(referenced_column);
            }
            None => keys.push(ForeignKeyInfo {
                name: Some(name),
                columns: vec![column],
                referenced_table,
                referenced_columns: vec![referenced_column],
            }),
        }
    }
    keys
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const LIST_SCHEMAS: &str = r#"
            SELECT schema_name
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
            AND schema_name NOT LIKE 'pg_%'
            ORDER BY schema_name
            "#;

        pub const LIST_TABLES: &str = r#"
            SELECT table_name, table_type
            FROM information_schema.tables
            WHERE table_schema = $1
            AND table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY table_name
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name,
            format_type(a.atttypid, a.atttypmod) as column_type,
            c.is_nullable,
            c.column_default,
            CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END as is_primary_key
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        LEFT JOIN (
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_name = $1
            AND tc.table_schema = $2
            AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON c.column_name = pk.column_name
        WHERE c.table_name = $1 AND c.table_schema = $2
        ORDER BY c.ordinal_position
        "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            tc.constraint_name,
            kcu.column_name,
            ccu.table_name AS foreign_table_name,
            ccu.column_name AS foreign_column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
            AND ccu.table_schema = tc.table_schema
        WHERE tc.table_name = $1
        AND tc.table_schema = $2
        AND tc.constraint_type = 'FOREIGN KEY'
        ORDER BY tc.constraint_name, kcu.ordinal_position
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.relname as index_name,
            array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) as column_names,
            ix.indisunique as is_unique,
            ix.indisprimary as is_primary
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE t.relname = $1 AND n.nspname = $2
        GROUP BY i.relname, ix.indisunique, ix.indisprimary
        "#;
    }

    pub mod mysql {
        pub const LIST_SCHEMAS: &str = r#"
            SELECT CONVERT(SCHEMA_NAME USING utf8) AS SCHEMA_NAME
            FROM information_schema.SCHEMATA
            WHERE SCHEMA_NAME NOT IN ('mysql', 'information_schema', 'performance_schema', 'sys')
            ORDER BY SCHEMA_NAME
            "#;

        pub const LIST_TABLES: &str = r#"
            SELECT
                CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
                CONVERT(TABLE_TYPE USING utf8) AS TABLE_TYPE
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
            AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
            ORDER BY TABLE_NAME
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY
        FROM information_schema.columns
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            CONVERT(CONSTRAINT_NAME USING utf8) AS CONSTRAINT_NAME,
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(REFERENCED_TABLE_NAME USING utf8) AS REFERENCED_TABLE_NAME,
            CONVERT(REFERENCED_COLUMN_NAME USING utf8) AS REFERENCED_COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_NAME = ?
        AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8) AS INDEX_NAME,
            CONVERT(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) USING utf8) as COLUMN_NAMES,
            NOT NON_UNIQUE as IS_UNIQUE
        FROM information_schema.STATISTICS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        GROUP BY INDEX_NAME, NON_UNIQUE
        "#;
    }

    pub mod sqlite {
        pub const LIST_SCHEMAS: &str = "PRAGMA database_list";
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub async fn list_schemas(pool: &PgPool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::postgres::LIST_SCHEMAS)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("schema_name")).collect())
    }

    pub async fn list_tables(pool: &PgPool, schema: Option<&str>) -> DbResult<Vec<TableInfo>> {
        let schema_name = schema.unwrap_or("public");
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .bind(schema_name)
            .fetch_all(pool)
            .await?;

        let tables = rows
            .iter()
            .map(|row| {
                let name: String = row.get("table_name");
                let type_str: String = row.get("table_type");
                TableInfo::new(name, TableType::parse(&type_str)).with_schema(schema_name)
            })
            .collect::<Vec<_>>();

        debug!(count = tables.len(), schema = schema_name, "Listed PostgreSQL tables");
        Ok(tables)
    }

    pub async fn columns(
        pool: &PgPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table)
            .bind(schema.unwrap_or("public"))
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let column_type: String = row.get("column_type");
                let nullable: String = row.get("is_nullable");
                let default_value: Option<String> = row.try_get("column_default").ok().flatten();
                let is_pk: bool = row.get("is_primary_key");

                ColumnInfo::new(name, column_type, nullable == "YES")
                    .with_default(default_value)
                    .with_primary_key(is_pk)
            })
            .collect())
    }

    pub async fn foreign_keys(
        pool: &PgPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ForeignKeyInfo>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_FOREIGN_KEYS)
            .bind(table)
            .bind(schema.unwrap_or("public"))
            .fetch_all(pool)
            .await?;

        Ok(group_foreign_keys(
            rows.iter()
                .map(|row| {
                    (
                        row.get("constraint_name"),
                        row.get("column_name"),
                        row.get("foreign_table_name"),
                        row.get("foreign_column_name"),
                    )
                })
                .collect(),
        ))
    }

    pub async fn indexes(
        pool: &PgPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_INDEXES)
            .bind(table)
            .bind(schema.unwrap_or("public"))
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name: String = row.get("index_name");
                let columns: Vec<String> = row.get("column_names");
                let is_unique: bool = row.get("is_unique");
                let is_primary: bool = row.get("is_primary");

                (!columns.is_empty()).then(|| {
                    IndexInfo::new(name, columns)
                        .unique(is_unique)
                        .primary(is_primary)
                })
            })
            .collect())
    }
}

mod mysql {
    use super::*;
    use sqlx::{MySqlPool, Row};

    /// Safely get a string from a MySQL row.
    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &sqlx::mysql::MySqlRow, column: &str) -> String {
        row.try_get::<String, _>(column)
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>(column)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
            .unwrap_or_default()
    }

    /// Safely get an optional string from a MySQL row.
    fn get_optional_string(row: &sqlx::mysql::MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    pub async fn list_schemas(pool: &MySqlPool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::mysql::LIST_SCHEMAS)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| get_string(row, "SCHEMA_NAME"))
            .filter(|name| !name.is_empty())
            .collect())
    }

    pub async fn list_tables(pool: &MySqlPool, schema: Option<&str>) -> DbResult<Vec<TableInfo>> {
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        let tables = rows
            .iter()
            .filter_map(|row| {
                let name = get_string(row, "TABLE_NAME");
                if name.is_empty() {
                    return None;
                }
                let type_str = get_string(row, "TABLE_TYPE");
                let table = TableInfo::new(name, TableType::parse(&type_str));
                Some(match schema {
                    Some(s) => table.with_schema(s),
                    None => table,
                })
            })
            .collect::<Vec<_>>();

        debug!(count = tables.len(), "Listed MySQL tables");
        Ok(tables)
    }

    pub async fn columns(
        pool: &MySqlPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(table)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "COLUMN_NAME");
                let column_type = get_string(row, "COLUMN_TYPE");
                let nullable = get_string(row, "IS_NULLABLE");
                let default_value = get_optional_string(row, "COLUMN_DEFAULT");
                let is_pk = get_string(row, "COLUMN_KEY") == "PRI";

                ColumnInfo::new(name, column_type, nullable == "YES")
                    .with_default(default_value)
                    .with_primary_key(is_pk)
            })
            .collect())
    }

    pub async fn foreign_keys(
        pool: &MySqlPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ForeignKeyInfo>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_FOREIGN_KEYS)
            .bind(table)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        Ok(group_foreign_keys(
            rows.iter()
                .map(|row| {
                    (
                        get_string(row, "CONSTRAINT_NAME"),
                        get_string(row, "COLUMN_NAME"),
                        get_string(row, "REFERENCED_TABLE_NAME"),
                        get_string(row, "REFERENCED_COLUMN_NAME"),
                    )
                })
                .collect(),
        ))
    }

    pub async fn indexes(
        pool: &MySqlPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_INDEXES)
            .bind(table)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "INDEX_NAME");
                let columns_str = get_string(row, "COLUMN_NAMES");
                let is_unique: i64 = row.try_get("IS_UNIQUE").unwrap_or(0);
                let columns: Vec<String> = columns_str.split(',').map(|s| s.to_string()).collect();
                let is_primary = name == "PRIMARY";

                IndexInfo::new(name, columns)
                    .unique(is_unique != 0 || is_primary)
                    .primary(is_primary)
            })
            .collect())
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqlitePool};

    /// `PRAGMA [schema.]name('arg')` with the argument quoted.
    fn pragma(schema: Option<&str>, name: &str, arg: &str) -> String {
        let arg = arg.replace('\'', "''");
        match schema {
            Some(schema) if !schema.is_empty() => format!("PRAGMA {}.{}('{}')", schema, name, arg),
            _ => format!("PRAGMA {}('{}')", name, arg),
        }
    }

    pub async fn list_schemas(pool: &SqlitePool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::sqlite::LIST_SCHEMAS)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    pub async fn list_tables(pool: &SqlitePool, schema: Option<&str>) -> DbResult<Vec<TableInfo>> {
        let master = match schema {
            Some(schema) if !schema.is_empty() => format!("{}.sqlite_master", schema),
            _ => "sqlite_master".to_string(),
        };
        let query = format!(
            "SELECT name, type FROM {} WHERE type IN ('table', 'view') \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
            master
        );
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let tables = rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let type_str: String = row.get("type");
                let table = TableInfo::new(name, TableType::parse(&type_str));
                match schema {
                    Some(s) => table.with_schema(s),
                    None => table,
                }
            })
            .collect::<Vec<_>>();

        debug!(count = tables.len(), "Listed SQLite tables");
        Ok(tables)
    }

    pub async fn columns(
        pool: &SqlitePool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(&pragma(schema, "table_info", table))
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let data_type: String = row.get("type");
                let notnull: i32 = row.get("notnull");
                let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
                let pk: i32 = row.get("pk");

                ColumnInfo::new(name, data_type, notnull == 0 && pk == 0)
                    .with_default(default_value)
                    .with_primary_key(pk > 0)
            })
            .collect())
    }

    pub async fn foreign_keys(
        pool: &SqlitePool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ForeignKeyInfo>> {
        let rows = sqlx::query(&pragma(schema, "foreign_key_list", table))
            .fetch_all(pool)
            .await?;

        let mut keys: Vec<(i64, ForeignKeyInfo)> = Vec::new();
        for row in &rows {
            let id: i64 = row.get("id");
            let column: String = row.get("from");
            let referenced_table: String = row.get("table");
            let referenced_column: String = row.try_get("to").unwrap_or_default();
            match keys.iter_mut().find(|(key_id, _)| *key_id == id) {
                Some((_, key)) => {
                    key.columns.push(column);
                    key.referenced_columns.push(referenced_column);
                }
                None => keys.push((
                    id,
                    ForeignKeyInfo {
                        name: None,
                        columns: vec![column],
                        referenced_table,
                        referenced_columns: vec![referenced_column],
                    },
                )),
            }
        }
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    pub async fn indexes(
        pool: &SqlitePool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        let idx_list = sqlx::query(&pragma(schema, "index_list", table))
            .fetch_all(pool)
            .await?;

        let mut indexes = Vec::new();
        for idx_row in &idx_list {
            let name: String = idx_row.get("name");
            let is_unique: i32 = idx_row.get("unique");
            let origin: String = idx_row.try_get("origin").unwrap_or_default();

            let columns: Vec<String> = sqlx::query(&pragma(schema, "index_info", &name))
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| row.get("name"))
                .collect();
            if !columns.is_empty() {
                indexes.push(
                    IndexInfo::new(name, columns)
                        .unique(is_unique != 0)
                        .primary(origin == "pk"),
                );
            }
        }
        Ok(indexes)
    }
}
