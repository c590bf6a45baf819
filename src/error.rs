//! Error types for sqlweave.
//!
//! Every failure surfaces synchronously as a [`DbError`]. Variants carry the
//! name of the failing data source, entity, procedure or pool so callers can
//! tell which operation broke without parsing SQL text.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for a unique violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Data source '{name}' is already configured")]
    ConfigurationConflict { name: String },

    #[error("Unknown {kind}: '{name}'")]
    UnknownReference { kind: String, name: String },

    #[error("Unsupported {capability} for dialect {dialect}")]
    Unsupported { capability: String, dialect: String },

    #[error("Pool '{pool}' exhausted: no object available after {waited_ms}ms (max {max})")]
    PoolExhausted {
        pool: String,
        max: usize,
        waited_ms: u64,
    },

    #[error("Schema synchronization failed on data source '{datasource}' while trying to {intent}: {message}")]
    SchemaSync {
        datasource: String,
        intent: String,
        message: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a configuration conflict error.
    pub fn configuration_conflict(name: impl Into<String>) -> Self {
        Self::ConfigurationConflict { name: name.into() }
    }

    /// Create an unknown reference error, e.g. `unknown_reference("data source", "tenant1")`.
    pub fn unknown_reference(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownReference {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an unsupported capability error.
    pub fn unsupported(capability: impl Into<String>, dialect: impl Into<String>) -> Self {
        Self::Unsupported {
            capability: capability.into(),
            dialect: dialect.into(),
        }
    }

    /// Create a pool exhaustion error.
    pub fn pool_exhausted(pool: impl Into<String>, max: usize, waited_ms: u64) -> Self {
        Self::PoolExhausted {
            pool: pool.into(),
            max,
            waited_ms,
        }
    }

    /// Create a schema synchronization error.
    pub fn schema_sync(
        datasource: impl Into<String>,
        intent: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaSync {
            datasource: datasource.into(),
            intent: intent.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if the caller may retry the failed operation.
    ///
    /// Nothing inside the engine retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::PoolExhausted { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => {
                        "A row with the same unique key already exists"
                    }
                    sqlx::error::ErrorKind::ForeignKeyViolation => {
                        "The referenced parent row is missing or still has dependants"
                    }
                    sqlx::error::ErrorKind::NotNullViolation => {
                        "Supply a value for every NOT NULL column"
                    }
                    _ => "Check the SQL syntax and referenced objects",
                };
                DbError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconfigure the data source")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::invalid_input(format!("Column not found in result: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::invalid_input(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::invalid_input("x").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::pool_exhausted("orders:insert", 4, 100).is_retryable());
        assert!(!DbError::configuration_conflict("tenant1").is_retryable());
    }

    #[test]
    fn test_schema_sync_names_datasource_and_intent() {
        let err = DbError::schema_sync("tenant1", "create table orders", "syntax error");
        let text = err.to_string();
        assert!(text.contains("tenant1"));
        assert!(text.contains("create table orders"));
    }

    #[test]
    fn test_unknown_reference_display() {
        let err = DbError::unknown_reference("procedure", "calc_totals");
        assert_eq!(err.to_string(), "Unknown procedure: 'calc_totals'");
    }

    #[test]
    fn test_unsupported_display() {
        let err = DbError::unsupported("column type Blob", "SQLite");
        assert_eq!(err.to_string(), "Unsupported column type Blob for dialect SQLite");
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::Database { .. }));
    }

    #[test]
    fn test_pool_closed_maps_to_connection() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Connection { .. }));
    }
}
