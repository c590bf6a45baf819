//! Database dispatch macros for reducing code duplication.
//!
//! This module provides declarative macros that generate database-specific
//! implementations while maintaining linear readability. The macros expand
//! at compile time with zero runtime overhead.

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `DbPool` variants, reducing the need
/// to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use crate::db::pool::DbPool;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_dispatch_reaches_matching_variant() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let pool = DbPool::SQLite(pool);
        let backend = crate::impl_db_dispatch!(&pool, {
            MySql(_p) => "mysql",
            Postgres(_p) => "postgres",
            SQLite(_p) => "sqlite",
        });
        assert_eq!(backend, "sqlite");
    }
}
