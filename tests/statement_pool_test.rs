//! Integration tests for pooled entity and procedure statements on SQLite.
//!
//! Tests verify that:
//! - Insert, find, update and delete round-trip a record with version checks
//! - Concurrent borrowers never exceed the pool bound and time out when it is held
//! - Procedure calls report the dialect as unsupported

use sqlweave::DbError;
use sqlweave::db::{DynamicDataSourceManager, SqlDataSource};
use sqlweave::models::{
    CallableDescriptor, ColumnType, DynamicDataSourceConfig, EntitySchemaDescriptor,
    FieldSchemaDescriptor, ParameterDirection, Record, Restriction, SqlValue,
};
use sqlweave::schema::{SchemaSynchronizer, SyncOptions};
use sqlweave::statement::{
    CallableStatementPools, PoolLimits, SqlStatementPools, StatementArgs, StatementType,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn customer() -> EntitySchemaDescriptor {
    EntitySchemaDescriptor::new("customer", "CUSTOMER")
        .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
        .with_field(FieldSchemaDescriptor::new("name", ColumnType::String, 2).with_length(60))
        .with_field(FieldSchemaDescriptor::new("active", ColumnType::Boolean, 3))
        .with_field(FieldSchemaDescriptor::new("version", ColumnType::Integer, 4))
        .with_version_field("version")
}

async fn setup_pools(limits: PoolLimits) -> (TempDir, DynamicDataSourceManager, SqlStatementPools) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("crm.db").display());
    let config = DynamicDataSourceConfig::builder("crm", url)
        .default_driver()
        .build()
        .unwrap();
    let manager = DynamicDataSourceManager::new();
    let source = manager.configure(config).await.unwrap();
    SchemaSynchronizer::synchronize(&source, &[customer()], &[], SyncOptions::default())
        .await
        .unwrap();
    let pools = SqlStatementPools::with_limits(source, Arc::new(customer()), limits).unwrap();
    (dir, manager, pools)
}

fn limits(max: usize, timeout_ms: u64) -> PoolLimits {
    PoolLimits::new(0, max, Duration::from_millis(timeout_ms))
}

fn ada(version: i32) -> Record {
    Record::new()
        .with("id", 7i64)
        .with("name", "Ada")
        .with("active", true)
        .with("version", version)
}

#[tokio::test]
async fn test_crud_round_trip_with_versions() {
    let (_dir, manager, pools) = setup_pools(limits(4, 1_000)).await;

    assert_eq!(pools.insert(&ada(1)).await.unwrap(), 1);

    let mut loaded = Record::new();
    let id = SqlValue::Long(7);
    assert!(pools.find(&id, None, &mut loaded).await.unwrap());
    assert_eq!(loaded.get("name"), Some(&SqlValue::Text("Ada".into())));
    assert_eq!(loaded.get("active"), Some(&SqlValue::Bool(true)));
    assert_eq!(loaded.get("version").and_then(SqlValue::as_i64), Some(1));

    // Stale version: nothing matches
    let stale = SqlValue::Int(5);
    let renamed = ada(2).with("name", "Ada L.");
    assert_eq!(pools.update(&renamed, Some(&stale)).await.unwrap(), 0);
    let current = SqlValue::Int(1);
    assert_eq!(pools.update(&renamed, Some(&current)).await.unwrap(), 1);

    let mut reloaded = Record::new();
    let v2 = SqlValue::Int(2);
    assert!(pools.find(&id, Some(&v2), &mut reloaded).await.unwrap());
    assert_eq!(reloaded.get("name"), Some(&SqlValue::Text("Ada L.".into())));
    assert!(!pools.find(&id, Some(&current), &mut Record::new()).await.unwrap());

    assert_eq!(pools.delete(&id, Some(&current)).await.unwrap(), 0);
    assert_eq!(pools.delete(&id, Some(&v2)).await.unwrap(), 1);
    assert!(!pools.find(&id, None, &mut Record::new()).await.unwrap());

    pools.terminate().unwrap();
    manager.terminate_all().await;
}

#[tokio::test]
async fn test_sql_text_is_shared_across_borrows() {
    let (_dir, manager, pools) = setup_pools(limits(2, 1_000)).await;
    let first = pools.sql(StatementType::FindByPk).unwrap();
    let second = pools.sql(StatementType::FindByPk).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.starts_with("SELECT"));

    let id = SqlValue::Long(1);
    let statement = pools
        .borrow(StatementType::FindByPk, &StatementArgs::id(&id))
        .await
        .unwrap();
    assert_eq!(statement.sql(), &*first);
    pools.restore(StatementType::FindByPk, statement).unwrap();

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_borrowers_bounded_and_timeout() {
    let (_dir, manager, pools) = setup_pools(limits(2, 50)).await;
    let pools = Arc::new(pools);
    let id = SqlValue::Long(1);

    let a = pools
        .borrow(StatementType::DeleteByPk, &StatementArgs::id(&id))
        .await
        .unwrap();
    let b = pools
        .borrow(StatementType::DeleteByPk, &StatementArgs::id(&id))
        .await
        .unwrap();
    let err = pools
        .borrow(StatementType::DeleteByPk, &StatementArgs::id(&id))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DbError::PoolExhausted { .. }));

    // Other statement types have their own bound
    let other = pools
        .borrow(StatementType::FindByPk, &StatementArgs::id(&id))
        .await
        .unwrap();
    pools.restore(StatementType::FindByPk, other).unwrap();

    pools.restore(StatementType::DeleteByPk, a).unwrap();
    let c = pools
        .borrow(StatementType::DeleteByPk, &StatementArgs::id(&id))
        .await
        .unwrap();
    pools.restore(StatementType::DeleteByPk, b).unwrap();
    pools.restore(StatementType::DeleteByPk, c).unwrap();

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_concurrent_inserts_share_pool() {
    let (_dir, manager, pools) = setup_pools(limits(3, 5_000)).await;
    let pools = Arc::new(pools);

    let handles: Vec<_> = (0..12i64)
        .map(|id| {
            let pools = Arc::clone(&pools);
            tokio::spawn(async move {
                let record = Record::new()
                    .with("id", id)
                    .with("name", format!("customer-{id}"))
                    .with("active", id % 2 == 0)
                    .with("version", 1);
                pools.insert(&record).await
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    assert_eq!(pools.count(None).await.unwrap(), 12);
    let active = Restriction::equals("active", true);
    assert_eq!(pools.count(Some(&active)).await.unwrap(), 6);
    let named = Restriction::amongst("name", ["customer-1", "customer-2", "nobody"]);
    assert_eq!(pools.count(Some(&named)).await.unwrap(), 2);

    let source: &SqlDataSource = &manager.data_source("crm").await.unwrap();
    let rows = source
        .fetch_rows("SELECT COUNT(*) FROM CUSTOMER WHERE active = 'Y'", &[])
        .await
        .unwrap();
    assert_eq!(rows[0].to_values()[0].as_i64(), Some(6));

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_procedures_unsupported_on_sqlite() {
    let (_dir, manager, _pools) = setup_pools(limits(1, 100)).await;
    let source = manager.data_source("crm").await.unwrap();
    let procedures = CallableStatementPools::new(
        source,
        vec![
            CallableDescriptor::new("score", "customer_score")
                .with_param("id", ColumnType::Long, ParameterDirection::In)
                .with_param("score", ColumnType::Integer, ParameterDirection::Out),
        ],
    );

    let mut object = Record::new().with("id", 7i64);
    let err = procedures.execute("score", &mut object).await.unwrap_err();
    assert!(matches!(err, DbError::Unsupported { .. }));

    let err = procedures.execute("missing", &mut object).await.unwrap_err();
    assert!(matches!(err, DbError::UnknownReference { .. }));

    manager.terminate_all().await;
}
