//! Dynamic data source registry.
//!
//! Data sources are registered, swapped and removed by name while the
//! process runs. Pools are always opened and closed outside the registry
//! lock; registration re-checks the name under the write lock so concurrent
//! configure calls for one name leave exactly one pool behind.

use crate::db::datasource::SqlDataSource;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, DynamicDataSourceConfig, NativeQuery, SqlValue, TableInfo};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct DynamicDataSourceManager {
    sources: Arc<RwLock<HashMap<String, Arc<SqlDataSource>>>>,
    query_timeout: Option<Duration>,
}

impl DynamicDataSourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a statement timeout to every data source opened from now on.
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = Some(query_timeout);
        self
    }

    /// Open and register a data source under its configured name.
    pub async fn configure(&self, config: DynamicDataSourceConfig) -> DbResult<Arc<SqlDataSource>> {
        config.require_configured()?;
        let name = config.name().to_string();

        // Early check for an existing registration
        {
            let sources = self.sources.read().await;
            if sources.contains_key(&name) {
                return Err(DbError::configuration_conflict(name));
            }
        }

        info!(datasource = %name, db_type = %config.dialect(), "Configuring data source");
        let source = Arc::new(self.open(config).await?);

        // Re-check after async work to prevent TOCTOU race
        let surplus = {
            let mut sources = self.sources.write().await;
            if sources.contains_key(&name) {
                Some(source)
            } else {
                sources.insert(name.clone(), Arc::clone(&source));
                info!(datasource = %name, "Data source configured");
                return Ok(source);
            }
        }; // Lock released here

        if let Some(source) = surplus {
            warn!(datasource = %name, "Concurrent configure detected, closing surplus pool");
            source.terminate().await;
        }
        Err(DbError::configuration_conflict(name))
    }

    /// Replace a registered data source with a freshly opened one.
    ///
    /// Returns `false` when nothing is registered under the name. The old
    /// source stays usable until the new one is in place, then it is terminated.
    pub async fn reconfigure(&self, config: DynamicDataSourceConfig) -> DbResult<bool> {
        config.require_configured()?;
        let name = config.name().to_string();
        if !self.is_configured(&name).await {
            return Ok(false);
        }

        info!(datasource = %name, db_type = %config.dialect(), "Reconfiguring data source");
        let source = Arc::new(self.open(config).await?);

        let replaced = {
            let mut sources = self.sources.write().await;
            match sources.get_mut(&name) {
                Some(slot) => Ok(std::mem::replace(slot, source)),
                None => Err(source),
            }
        };

        match replaced {
            Ok(old) => {
                old.terminate().await;
                info!(datasource = %name, "Data source reconfigured");
                Ok(true)
            }
            Err(unused) => {
                warn!(datasource = %name, "Data source terminated during reconfigure");
                unused.terminate().await;
                Ok(false)
            }
        }
    }

    pub async fn is_configured(&self, name: &str) -> bool {
        self.sources.read().await.contains_key(name)
    }

    pub async fn data_source_count(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn data_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up a registered data source.
    pub async fn data_source(&self, name: &str) -> DbResult<Arc<SqlDataSource>> {
        self.sources
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::unknown_reference("data source", name))
    }

    /// Open a probe connection, run the dialect's test statement and close it again.
    pub async fn test_configuration(&self, config: &DynamicDataSourceConfig) -> bool {
        match self.probe(config).await {
            Ok(source) => {
                let result = source.test_connection().await;
                source.terminate().await;
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(datasource = %config.name(), error = %e, "Probe query failed");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(datasource = %config.name(), error = %e, "Probe connection failed");
                false
            }
        }
    }

    /// Run a native query on a probe connection and return the number of rows.
    pub async fn test_native_query(
        &self,
        config: &DynamicDataSourceConfig,
        query: &NativeQuery,
    ) -> DbResult<usize> {
        let source = self.probe(config).await?;
        let result = source.native_rows(query).await;
        source.terminate().await;
        Ok(result?.len())
    }

    /// Run an update on a probe connection inside a rolled-back transaction.
    pub async fn test_native_update(&self, config: &DynamicDataSourceConfig, sql: &str) -> DbResult<u64> {
        let source = self.probe(config).await?;
        let result = source.native_update(sql).await;
        source.terminate().await;
        result
    }

    pub async fn schemas(&self, name: &str) -> DbResult<Vec<String>> {
        self.data_source(name).await?.schemas().await
    }

    pub async fn tables(&self, name: &str, schema: Option<&str>) -> DbResult<Vec<TableInfo>> {
        self.data_source(name).await?.tables(schema).await
    }

    pub async fn columns(
        &self,
        name: &str,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<Vec<ColumnInfo>> {
        self.data_source(name).await?.columns(schema, table).await
    }

    pub async fn rows(&self, name: &str, query: &NativeQuery) -> DbResult<Vec<Vec<SqlValue>>> {
        self.data_source(name).await?.native_rows(query).await
    }

    /// Remove a data source and close its pool.
    pub async fn terminate(&self, name: &str) -> DbResult<()> {
        let removed = self.sources.write().await.remove(name);
        match removed {
            Some(source) => {
                source.terminate().await;
                Ok(())
            }
            None => Err(DbError::unknown_reference("data source", name)),
        }
    }

    /// Remove and close every data source. Safe to call repeatedly.
    pub async fn terminate_all(&self) {
        // Drain under lock, close outside lock
        let drained: Vec<_> = {
            let mut sources = self.sources.write().await;
            sources.drain().collect()
        };
        join_all(drained.into_iter().map(|(name, source)| async move {
            info!(datasource = %name, "Closing data source");
            source.terminate().await;
        }))
        .await;
    }

    async fn probe(&self, config: &DynamicDataSourceConfig) -> DbResult<SqlDataSource> {
        config.require_configured()?;
        self.open(config.clone()).await
    }

    async fn open(&self, config: DynamicDataSourceConfig) -> DbResult<SqlDataSource> {
        let source = SqlDataSource::connect(config).await?;
        Ok(match self.query_timeout {
            Some(query_timeout) => source.with_query_timeout(query_timeout),
            None => source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(name: &str) -> DynamicDataSourceConfig {
        DynamicDataSourceConfig::builder(name, "sqlite::memory:")
            .default_driver()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_configure_rejects_duplicate_name() {
        let manager = DynamicDataSourceManager::new();
        manager.configure(memory("a")).await.unwrap();
        let err = manager.configure(memory("a")).await.unwrap_err();
        assert!(matches!(err, DbError::ConfigurationConflict { .. }));
        assert_eq!(manager.data_source_count().await, 1);
    }

    #[tokio::test]
    async fn test_configure_rejects_unconfigured() {
        let manager = DynamicDataSourceManager::new();
        let config = DynamicDataSourceConfig::builder("a", "sqlite::memory:")
            .build()
            .unwrap();
        assert!(manager.configure(config).await.is_err());
        assert!(!manager.is_configured("a").await);
    }

    #[tokio::test]
    async fn test_reconfigure_unknown_returns_false() {
        let manager = DynamicDataSourceManager::new();
        assert!(!manager.reconfigure(memory("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reconfigure_swaps_source() {
        let manager = DynamicDataSourceManager::new();
        let old = manager.configure(memory("a")).await.unwrap();
        assert!(manager.reconfigure(memory("a")).await.unwrap());
        let new = manager.data_source("a").await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_closed());
        assert!(!new.is_closed());
    }

    #[tokio::test]
    async fn test_terminate_unknown_name() {
        let manager = DynamicDataSourceManager::new();
        let err = manager.terminate("ghost").await.unwrap_err();
        assert!(matches!(err, DbError::UnknownReference { .. }));
    }

    #[tokio::test]
    async fn test_terminate_all_is_idempotent() {
        let manager = DynamicDataSourceManager::new();
        manager.configure(memory("a")).await.unwrap();
        manager.configure(memory("b")).await.unwrap();
        assert_eq!(manager.data_source_names().await, vec!["a", "b"]);
        manager.terminate_all().await;
        manager.terminate_all().await;
        assert_eq!(manager.data_source_count().await, 0);
    }

    #[tokio::test]
    async fn test_test_configuration_does_not_register() {
        let manager = DynamicDataSourceManager::new();
        assert!(manager.test_configuration(&memory("probe")).await);
        assert_eq!(manager.data_source_count().await, 0);
    }
}
