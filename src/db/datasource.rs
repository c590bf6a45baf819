//! A configured, connected data source.
//!
//! [`SqlDataSource`] pairs a connection pool with the dialect of its backend
//! and runs every statement the engine produces: parameterized updates and
//! selects, DDL scripts, procedure calls and native queries.
//!
//! # Architecture
//!
//! Statement execution uses database-specific implementations organized in
//! submodules (`mysql`, `postgres`, `sqlite`), each providing the same
//! interface adapted to its backend. Every call is bounded by the data
//! source's query timeout.

use crate::config::DEFAULT_QUERY_TIMEOUT_SECS;
use crate::db::catalog::CatalogReader;
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::pool::{DbPool, create_pool};
use crate::db::row::DbRow;
use crate::dialect::{CallText, DdlScript, Dialect};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, DynamicDataSourceConfig, ForeignKeyInfo, IndexInfo, NativeQuery, SqlParameter,
    SqlValue, TableInfo,
};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Rows produced by a procedure call.
#[derive(Debug, Default)]
pub struct CallRows {
    /// Rows returned by the call statement itself
    pub rows: Vec<DbRow>,
    /// Row read by the follow-up select of session-variable outputs
    pub fetched: Option<DbRow>,
}

/// A named connection pool bound to its dialect.
#[derive(Debug)]
pub struct SqlDataSource {
    config: DynamicDataSourceConfig,
    dialect: &'static Dialect,
    pool: DbPool,
    query_timeout: Duration,
}

impl SqlDataSource {
    /// Open the pool described by `config`.
    pub async fn connect(config: DynamicDataSourceConfig) -> DbResult<Self> {
        let pool = create_pool(&config).await?;
        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: DynamicDataSourceConfig, pool: DbPool) -> Self {
        Self {
            dialect: Dialect::for_type(config.dialect()),
            config,
            pool,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn config(&self) -> &DynamicDataSourceConfig {
        &self.config
    }

    /// Run the dialect's test statement.
    pub async fn test_connection(&self) -> DbResult<()> {
        let sql = self.dialect.capabilities().test_sql;
        self.fetch_rows(sql, &[]).await.map(|_| ())
    }

    /// Execute an INSERT, UPDATE, DELETE or DDL statement and return the affected row count.
    pub async fn execute_update(&self, sql: &str, params: &[SqlParameter]) -> DbResult<u64> {
        debug!(datasource = %self.name(), sql = %sql, params = params.len(), "Executing update");
        self.timed("update", async {
            crate::impl_db_dispatch!(&self.pool, {
                MySql(p) => mysql::execute(p, sql, params).await,
                Postgres(p) => postgres::execute(p, sql, params).await,
                SQLite(p) => sqlite::execute(p, sql, params).await,
            })
        })
        .await
    }

    /// Execute a select and return every row.
    pub async fn fetch_rows(&self, sql: &str, params: &[SqlParameter]) -> DbResult<Vec<DbRow>> {
        debug!(datasource = %self.name(), sql = %sql, params = params.len(), "Executing query");
        self.timed("query execution", async {
            crate::impl_db_dispatch!(&self.pool, {
                MySql(p) => mysql::fetch(p, sql, params).await,
                Postgres(p) => postgres::fetch(p, sql, params).await,
                SQLite(p) => sqlite::fetch(p, sql, params).await,
            })
        })
        .await
    }

    /// Run a DDL script on one connection.
    ///
    /// The prelude runs first, then the statements (inside a transaction when
    /// the dialect's DDL is transactional), then the epilogue, which runs even
    /// when a statement failed.
    pub async fn execute_script(&self, script: &DdlScript) -> DbResult<()> {
        if script.is_empty() {
            return Ok(());
        }
        let transactional = self.dialect.capabilities().transactional_ddl;
        debug!(
            datasource = %self.name(),
            statements = script.statements.len(),
            transactional,
            "Executing DDL script"
        );
        self.timed("ddl script", async {
            crate::impl_db_dispatch!(&self.pool, {
                MySql(p) => mysql::run_script(p, script, transactional).await,
                Postgres(p) => postgres::run_script(p, script, transactional).await,
                SQLite(p) => sqlite::run_script(p, script, transactional).await,
            })
        })
        .await
    }

    /// Execute a procedure call.
    ///
    /// `values` holds one parameter per procedure parameter, in declaration
    /// order; output-only slots carry typed NULLs.
    pub async fn execute_call(&self, call: &CallText, values: &[SqlParameter]) -> DbResult<CallRows> {
        debug!(datasource = %self.name(), sql = %call.sql, "Executing call");
        self.timed("procedure call", async {
            match &self.pool {
                DbPool::MySql(p) => mysql::call(p, call, values).await,
                DbPool::Postgres(p) => postgres::call(p, call, values).await,
                DbPool::SQLite(_) => Err(DbError::unsupported("stored procedures", self.dialect.name())),
            }
        })
        .await
    }

    /// Run a native query and return its rows with column order preserved.
    pub async fn native_rows(&self, query: &NativeQuery) -> DbResult<Vec<Vec<SqlValue>>> {
        let sql = self.dialect.native_query_sql(query)?;
        let rows = self.fetch_rows(&sql, &[]).await?;
        Ok(rows.iter().map(DbRow::to_values).collect())
    }

    /// Execute a native update inside a transaction that is always rolled back.
    ///
    /// Returns the row count the statement would have affected.
    pub async fn native_update(&self, sql: &str) -> DbResult<u64> {
        debug!(datasource = %self.name(), sql = %sql, "Executing rolled-back update");
        self.timed("native update", async {
            crate::impl_db_dispatch!(&self.pool, {
                MySql(p) => mysql::rolled_back(p, sql).await,
                Postgres(p) => postgres::rolled_back(p, sql).await,
                SQLite(p) => sqlite::rolled_back(p, sql).await,
            })
        })
        .await
    }

    pub async fn schemas(&self) -> DbResult<Vec<String>> {
        CatalogReader::list_schemas(&self.pool).await
    }

    pub async fn tables(&self, schema: Option<&str>) -> DbResult<Vec<TableInfo>> {
        CatalogReader::list_tables(&self.pool, schema).await
    }

    pub async fn columns(&self, schema: Option<&str>, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let table = self.dialect.normalize_name(table);
        CatalogReader::columns(&self.pool, schema, &table).await
    }

    pub async fn foreign_keys(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ForeignKeyInfo>> {
        let table = self.dialect.normalize_name(table);
        CatalogReader::foreign_keys(&self.pool, schema, &table).await
    }

    pub async fn indexes(&self, schema: Option<&str>, table: &str) -> DbResult<Vec<IndexInfo>> {
        let table = self.dialect.normalize_name(table);
        CatalogReader::indexes(&self.pool, schema, &table).await
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool, running the dialect's shutdown statement first when asked to.
    ///
    /// Calling it again is a no-op.
    pub async fn terminate(&self) {
        if self.pool.is_closed() {
            return;
        }
        if self.config.shutdown_on_terminate() {
            if let Some(sql) = self.dialect.capabilities().shutdown_sql {
                if let Err(e) = self.execute_update(sql, &[]).await {
                    warn!(datasource = %self.name(), error = %e, "Shutdown statement failed");
                }
            }
        }
        self.pool.close().await;
        info!(datasource = %self.name(), "Data source terminated");
    }

    async fn timed<T>(&self, operation: &str, fut: impl Future<Output = DbResult<T>>) -> DbResult<T> {
        match timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(operation, self.query_timeout.as_secs() as u32)),
        }
    }
}

/// Convert a statement failure, naming the statement in database errors.
fn statement_error(err: sqlx::Error, sql: &str) -> DbError {
    match DbError::from(err) {
        DbError::Database {
            message,
            sql_state,
            suggestion,
        } => DbError::database(format!("{} in `{}`", message, sql), sql_state, suggestion),
        other => other,
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// Statements without parameters run unprepared so that DDL and procedure
// definitions go through on every backend.

/// Generate the statement functions shared by every backend module.
///
/// Each expansion provides `execute`, `fetch`, `run_script` and
/// `rolled_back` for one pool type, binding parameters with `$bind` and
/// wrapping rows in `DbRow::$variant`.
macro_rules! impl_backend_statements {
    ($pool:ty, $variant:ident, $bind:path) => {
        pub async fn execute(pool: &$pool, sql: &str, params: &[SqlParameter]) -> DbResult<u64> {
            let result = if params.is_empty() {
                pool.execute(sql).await
            } else {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = $bind(query, param);
                }
                query.execute(pool).await
            };
            result
                .map(|r| r.rows_affected())
                .map_err(|e| statement_error(e, sql))
        }

        pub async fn fetch(pool: &$pool, sql: &str, params: &[SqlParameter]) -> DbResult<Vec<DbRow>> {
            let result = if params.is_empty() {
                pool.fetch_all(sql).await
            } else {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = $bind(query, param);
                }
                query.fetch_all(pool).await
            };
            let rows = result.map_err(|e| statement_error(e, sql))?;
            Ok(rows.into_iter().map(DbRow::$variant).collect())
        }

        pub async fn run_script(pool: &$pool, script: &DdlScript, transactional: bool) -> DbResult<()> {
            let mut conn = pool.acquire().await?;
            let mut result = Ok(());
            for sql in &script.prelude {
                if let Err(e) = (&mut *conn).execute(sql.as_str()).await {
                    result = Err(statement_error(e, sql));
                    break;
                }
            }
            if result.is_ok() {
                result = if transactional {
                    let mut tx = conn.begin().await?;
                    let mut applied = Ok(());
                    for sql in &script.statements {
                        if let Err(e) = (&mut *tx).execute(sql.as_str()).await {
                            applied = Err(statement_error(e, sql));
                            break;
                        }
                    }
                    match applied {
                        Ok(()) => tx.commit().await.map_err(DbError::from),
                        Err(e) => Err(e),
                    }
                } else {
                    let mut applied = Ok(());
                    for sql in &script.statements {
                        if let Err(e) = (&mut *conn).execute(sql.as_str()).await {
                            applied = Err(statement_error(e, sql));
                            break;
                        }
                    }
                    applied
                };
            }
            for sql in &script.epilogue {
                if let Err(e) = (&mut *conn).execute(sql.as_str()).await {
                    warn!(sql = %sql, error = %e, "Epilogue statement failed");
                }
            }
            result
        }

        pub async fn rolled_back(pool: &$pool, sql: &str) -> DbResult<u64> {
            let mut tx = pool.begin().await?;
            let result = (&mut *tx).execute(sql).await.map_err(|e| statement_error(e, sql));
            tx.rollback().await?;
            Ok(result?.rows_affected())
        }
    };
}

mod mysql {
    use super::*;
    use sqlx::{Acquire, Executor, MySqlPool};

    impl_backend_statements!(MySqlPool, MySql, bind_mysql_param);

    /// Run the prelude, the call and the output select on one connection.
    pub async fn call(pool: &MySqlPool, call: &CallText, values: &[SqlParameter]) -> DbResult<CallRows> {
        let mut conn = pool.acquire().await?;
        for (sql, position) in &call.prelude {
            let param = slot(values, *position)?;
            bind_mysql_param(sqlx::query(sql), param)
                .execute(&mut *conn)
                .await
                .map_err(|e| statement_error(e, sql))?;
        }

        let mut query = sqlx::query(&call.sql);
        for position in &call.bound {
            query = bind_mysql_param(query, slot(values, *position)?);
        }
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| statement_error(e, &call.sql))?;

        let fetched = match &call.fetch_sql {
            Some(sql) => (&mut *conn)
                .fetch_optional(sql.as_str())
                .await
                .map_err(|e| statement_error(e, sql))?
                .map(DbRow::MySql),
            None => None,
        };
        Ok(CallRows {
            rows: rows.into_iter().map(DbRow::MySql).collect(),
            fetched,
        })
    }
}

mod postgres {
    use super::*;
    use sqlx::{Acquire, Executor, PgPool};

    impl_backend_statements!(PgPool, Postgres, bind_postgres_param);

    /// Outputs come back as the row returned by the call.
    pub async fn call(pool: &PgPool, call: &CallText, values: &[SqlParameter]) -> DbResult<CallRows> {
        let mut query = sqlx::query(&call.sql);
        for position in &call.bound {
            query = bind_postgres_param(query, slot(values, *position)?);
        }
        let rows = query
            .fetch_all(pool)
            .await
            .map_err(|e| statement_error(e, &call.sql))?;
        Ok(CallRows {
            rows: rows.into_iter().map(DbRow::Postgres).collect(),
            fetched: None,
        })
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Acquire, Executor, SqlitePool};

    impl_backend_statements!(SqlitePool, SQLite, bind_sqlite_param);
}

/// Parameter at a 1-based call position.
fn slot(values: &[SqlParameter], position: usize) -> DbResult<&SqlParameter> {
    position
        .checked_sub(1)
        .and_then(|i| values.get(i))
        .ok_or_else(|| {
            DbError::internal(format!(
                "No value for call parameter {} ({} supplied)",
                position,
                values.len()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;

    async fn memory_source() -> SqlDataSource {
        let config = DynamicDataSourceConfig::builder("mem", "sqlite::memory:")
            .default_driver()
            .build()
            .unwrap();
        SqlDataSource::connect(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_update_and_fetch_round_trip() {
        let source = memory_source().await;
        source
            .execute_update("CREATE TABLE T (ID INTEGER PRIMARY KEY, NAME VARCHAR(20))", &[])
            .await
            .unwrap();
        let inserted = source
            .execute_update(
                "INSERT INTO T (ID, NAME) VALUES (?, ?)",
                &[
                    SqlParameter::new(ColumnType::Long, 1i64),
                    SqlParameter::new(ColumnType::String, "Ada"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = source.fetch_rows("SELECT ID, NAME FROM T", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].to_values()[1], SqlValue::Text("Ada".into()));
        let debug = format!("{:?}", rows[0]);
        assert!(debug.contains("SQLite") && debug.contains("columns: 2"), "{debug}");
    }

    #[tokio::test]
    async fn test_native_update_is_rolled_back() {
        let source = memory_source().await;
        source
            .execute_update("CREATE TABLE T (ID INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        source
            .execute_update("INSERT INTO T (ID) VALUES (1), (2)", &[])
            .await
            .unwrap();

        assert_eq!(source.native_update("DELETE FROM T").await.unwrap(), 2);
        let rows = source.fetch_rows("SELECT ID FROM T", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_script_names_statement_and_runs_epilogue() {
        let source = memory_source().await;
        let mut script = DdlScript::default();
        script.prelude.push("PRAGMA foreign_keys = OFF".into());
        script.push("CREATE TABLE A (ID INTEGER)");
        script.push("CREATE TABLE A (ID INTEGER)");
        script.epilogue.push("PRAGMA foreign_keys = ON".into());

        let err = source.execute_script(&script).await.unwrap_err();
        assert!(err.to_string().contains("CREATE TABLE A"));
        // The transaction was rolled back as a whole
        assert!(source.columns(None, "A").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_calls_are_unsupported_on_sqlite() {
        let source = memory_source().await;
        let call = CallText {
            sql: "CALL p()".into(),
            bound: Vec::new(),
            prelude: Vec::new(),
            fetch_sql: None,
            outputs: Vec::new(),
        };
        let err = source.execute_call(&call, &[]).await.unwrap_err();
        assert!(matches!(err, DbError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let source = memory_source().await;
        source.test_connection().await.unwrap();
        source.terminate().await;
        source.terminate().await;
        assert!(source.is_closed());
    }

    #[test]
    fn test_slot_positions_are_one_based() {
        let values = vec![SqlParameter::new(ColumnType::Long, 7i64)];
        assert!(slot(&values, 1).is_ok());
        assert!(slot(&values, 0).is_err());
        assert!(slot(&values, 2).is_err());
    }
}
