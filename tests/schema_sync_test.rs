//! Integration tests for schema synchronization against SQLite.
//!
//! Tests verify that:
//! - Tables are created in foreign key order and a second run is a no-op
//! - New columns are added in place and type changes rebuild the table with its data
//! - Static rows are inserted once and corrected when their declaration changes
//! - Views are created and rebuilt when a table they read from changes

use sqlweave::db::{DynamicDataSourceManager, SqlDataSource};
use sqlweave::models::{
    ColumnType, DynamicDataSourceConfig, EntitySchemaDescriptor, FieldSchemaDescriptor, StaticRow,
    TableType, ViewDescriptor,
};
use sqlweave::schema::{EntityOutcome, SchemaSynchronizer, SyncOptions};
use std::sync::Arc;
use tempfile::TempDir;

/// Open a data source on a fresh SQLite file. The directory must outlive the source.
async fn setup_source() -> (TempDir, DynamicDataSourceManager, Arc<SqlDataSource>) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("library.db").display());
    let config = DynamicDataSourceConfig::builder("library", url)
        .default_driver()
        .build()
        .unwrap();
    let manager = DynamicDataSourceManager::new();
    let source = manager.configure(config).await.unwrap();
    (dir, manager, source)
}

fn author() -> EntitySchemaDescriptor {
    EntitySchemaDescriptor::new("author", "AUTHOR")
        .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
        .with_field(FieldSchemaDescriptor::new("name", ColumnType::String, 2).with_length(80))
}

fn book() -> EntitySchemaDescriptor {
    EntitySchemaDescriptor::new("book", "BOOK")
        .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
        .with_field(FieldSchemaDescriptor::new("title", ColumnType::String, 2).with_length(120))
        .with_field(
            FieldSchemaDescriptor::new("authorId", ColumnType::Long, 3)
                .with_column("AUTHOR_ID")
                .references("author", "id"),
        )
        .with_field(
            FieldSchemaDescriptor::new("price", ColumnType::Decimal, 4)
                .with_precision(10, 2)
                .nullable(),
        )
        .with_field(
            FieldSchemaDescriptor::new("copies", ColumnType::Integer, 5).with_default("0"),
        )
        .with_unique(&["title"])
        .with_index(&["authorId"], false)
}

fn genre(labels: &[(i32, &str)]) -> EntitySchemaDescriptor {
    let mut entity = EntitySchemaDescriptor::new("genre", "GENRE")
        .with_field(FieldSchemaDescriptor::new("id", ColumnType::Integer, 1).primary_key())
        .with_field(FieldSchemaDescriptor::new("label", ColumnType::String, 2).with_length(40));
    for (id, label) in labels {
        entity = entity.with_static_row(StaticRow::new().with("id", *id).with("label", *label));
    }
    entity
}

fn shelf_view() -> ViewDescriptor {
    ViewDescriptor::new("SHELF", "book")
        .with_join("author", "T1", "authorId", "id")
        .with_column("TITLE", "T1", "title")
        .with_column("AUTHOR_NAME", "T2", "name")
}

async fn count(source: &SqlDataSource, table: &str) -> i64 {
    let rows = source
        .fetch_rows(&format!("SELECT COUNT(*) FROM {}", table), &[])
        .await
        .unwrap();
    rows[0].to_values()[0].as_i64().unwrap()
}

#[tokio::test]
async fn test_create_then_second_run_is_noop() {
    let (_dir, manager, source) = setup_source().await;
    // Declared child first: ordering must still create AUTHOR before BOOK
    let entities = vec![book(), author(), genre(&[(1, "Fiction"), (2, "Poetry")])];
    let views = vec![shelf_view()];

    let report = SchemaSynchronizer::synchronize(&source, &entities, &views, SyncOptions::forced())
        .await
        .unwrap();
    let order: Vec<&str> = report.entities.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(order, vec!["author", "book", "genre"]);
    assert!(report.entities.iter().all(|(_, o)| *o == EntityOutcome::Created));

    let tables = source.tables(None).await.unwrap();
    let shelf = tables.iter().find(|t| t.name == "SHELF").unwrap();
    assert_eq!(shelf.table_type, TableType::View);
    let keys = source.foreign_keys(None, "BOOK").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].referenced_table.eq_ignore_ascii_case("AUTHOR"));
    assert_eq!(count(&source, "GENRE").await, 2);

    let again = SchemaSynchronizer::synchronize(&source, &entities, &views, SyncOptions::forced())
        .await
        .unwrap();
    assert!(again.is_noop(), "unexpected statements: {:?}", again.statements);
    assert!(again.entities.iter().all(|(_, o)| *o == EntityOutcome::Unchanged));

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_unforced_run_leaves_foreign_keys_out() {
    let (_dir, manager, source) = setup_source().await;
    let entities = vec![author(), book()];

    SchemaSynchronizer::synchronize(&source, &entities, &[], SyncOptions::default())
        .await
        .unwrap();
    assert!(source.foreign_keys(None, "BOOK").await.unwrap().is_empty());
    let indexes = source.indexes(None, "BOOK").await.unwrap();
    assert!(indexes.iter().any(|i| i.unique && i.columns == vec!["title".to_string()]));
    assert!(indexes.iter().any(|i| !i.unique && i.columns == vec!["AUTHOR_ID".to_string()]));

    let again = SchemaSynchronizer::synchronize(&source, &entities, &[], SyncOptions::default())
        .await
        .unwrap();
    assert!(again.is_noop(), "unexpected statements: {:?}", again.statements);

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_added_column_and_rebuild_keep_rows() {
    let (_dir, manager, source) = setup_source().await;
    SchemaSynchronizer::synchronize(&source, &[author()], &[], SyncOptions::default())
        .await
        .unwrap();
    source
        .execute_update("INSERT INTO AUTHOR (id, name) VALUES (1, 'Ada')", &[])
        .await
        .unwrap();

    // Nullable column: added in place
    let with_email = author().with_field(
        FieldSchemaDescriptor::new("email", ColumnType::String, 3)
            .with_length(200)
            .nullable(),
    );
    let report = SchemaSynchronizer::synchronize(&source, &[with_email.clone()], &[], SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome("author"), Some(EntityOutcome::Altered));
    assert_eq!(report.statement_count(), 1);
    assert!(report.statements[0].starts_with("ALTER TABLE AUTHOR ADD COLUMN email"));

    // Length change: SQLite cannot alter columns, so the table is rebuilt
    let mut wider = with_email;
    wider.fields[1].length = 160;
    let report = SchemaSynchronizer::synchronize(&source, &[wider], &[], SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome("author"), Some(EntityOutcome::Altered));
    assert!(report.statement_count() > 1);

    let columns = source.columns(None, "AUTHOR").await.unwrap();
    let name = columns.iter().find(|c| c.name == "name").unwrap();
    assert_eq!(name.size, Some(160));
    assert!(columns.iter().any(|c| c.name == "email"));

    let rows = source
        .fetch_rows("SELECT name FROM AUTHOR WHERE id = 1", &[])
        .await
        .unwrap();
    assert_eq!(rows[0].to_values()[0].as_text().as_deref(), Some("Ada"));

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_required_clock_columns_rebuild_populated_table() {
    let (_dir, manager, source) = setup_source().await;
    let item = || {
        EntitySchemaDescriptor::new("item", "ITEM")
            .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
    };
    SchemaSynchronizer::synchronize(&source, &[item()], &[], SyncOptions::forced())
        .await
        .unwrap();
    source
        .execute_update("INSERT INTO ITEM (id) VALUES (1)", &[])
        .await
        .unwrap();

    // CURRENT_TIMESTAMP and CURRENT_DATE are not constants, so ADD COLUMN is refused
    let stamped = item()
        .with_field(FieldSchemaDescriptor::new("createdOn", ColumnType::Timestamp, 2))
        .with_field(FieldSchemaDescriptor::new("due", ColumnType::Date, 3));
    let report = SchemaSynchronizer::synchronize(&source, &[stamped.clone()], &[], SyncOptions::forced())
        .await
        .unwrap();
    assert_eq!(report.outcome("item"), Some(EntityOutcome::Altered));
    assert!(
        report.statements.iter().all(|s| !s.contains("ADD COLUMN")),
        "unexpected statements: {:?}",
        report.statements
    );

    let rows = source
        .fetch_rows("SELECT id, createdOn, due FROM ITEM", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let values = rows[0].to_values();
    assert_eq!(values[0].as_i64(), Some(1));
    assert!(!values[1].is_null());
    assert!(!values[2].is_null());

    let again = SchemaSynchronizer::synchronize(&source, &[stamped], &[], SyncOptions::forced())
        .await
        .unwrap();
    assert!(again.is_noop(), "unexpected statements: {:?}", again.statements);

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_forced_run_drops_undeclared_column() {
    let (_dir, manager, source) = setup_source().await;
    let with_bio = author().with_field(
        FieldSchemaDescriptor::new("bio", ColumnType::Clob, 3).nullable(),
    );
    SchemaSynchronizer::synchronize(&source, &[with_bio], &[], SyncOptions::default())
        .await
        .unwrap();

    // Without force, an abandoned nullable column stays
    let report = SchemaSynchronizer::synchronize(&source, &[author()], &[], SyncOptions::default())
        .await
        .unwrap();
    assert!(report.is_noop());
    assert!(source.columns(None, "AUTHOR").await.unwrap().iter().any(|c| c.name == "bio"));

    let report = SchemaSynchronizer::synchronize(&source, &[author()], &[], SyncOptions::forced())
        .await
        .unwrap();
    assert_eq!(report.outcome("author"), Some(EntityOutcome::Altered));
    let columns = source.columns(None, "AUTHOR").await.unwrap();
    assert_eq!(columns.len(), 2);

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_static_rows_are_corrected() {
    let (_dir, manager, source) = setup_source().await;
    SchemaSynchronizer::synchronize(&source, &[genre(&[(1, "Fiction")])], &[], SyncOptions::default())
        .await
        .unwrap();
    source
        .execute_update("UPDATE GENRE SET label = 'Fact' WHERE id = 1", &[])
        .await
        .unwrap();

    let entities = [genre(&[(1, "Fiction"), (2, "Poetry")])];
    let report = SchemaSynchronizer::synchronize(&source, &entities, &[], SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome("genre"), Some(EntityOutcome::Altered));
    assert_eq!(report.statement_count(), 2);

    let rows = source
        .fetch_rows("SELECT label FROM GENRE ORDER BY id", &[])
        .await
        .unwrap();
    let labels: Vec<String> = rows
        .iter()
        .filter_map(|row| row.to_values()[0].as_text())
        .collect();
    assert_eq!(labels, vec!["Fiction", "Poetry"]);

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_view_recreated_when_table_changes() {
    let (_dir, manager, source) = setup_source().await;
    let views = [shelf_view()];
    SchemaSynchronizer::synchronize(&source, &[author(), book()], &views, SyncOptions::default())
        .await
        .unwrap();
    source
        .execute_update("INSERT INTO AUTHOR (id, name) VALUES (1, 'Ada')", &[])
        .await
        .unwrap();
    source
        .execute_update(
            "INSERT INTO BOOK (id, title, AUTHOR_ID, copies) VALUES (10, 'Notes', 1, 3)",
            &[],
        )
        .await
        .unwrap();

    let mut retitled = book();
    retitled.fields[1].length = 200;
    let report = SchemaSynchronizer::synchronize(&source, &[author(), retitled], &views, SyncOptions::default())
        .await
        .unwrap();
    assert!(report.statements.iter().any(|s| s.starts_with("DROP VIEW")));
    assert!(report.statements.iter().any(|s| s.starts_with("CREATE VIEW")));

    let rows = source
        .fetch_rows("SELECT TITLE, AUTHOR_NAME FROM SHELF", &[])
        .await
        .unwrap();
    let values = rows[0].to_values();
    assert_eq!(values[0].as_text().as_deref(), Some("Notes"));
    assert_eq!(values[1].as_text().as_deref(), Some("Ada"));

    manager.terminate_all().await;
}

#[tokio::test]
async fn test_foreign_key_cycle_is_rejected() {
    let (_dir, manager, source) = setup_source().await;
    let a = EntitySchemaDescriptor::new("a", "A")
        .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
        .with_field(FieldSchemaDescriptor::new("bId", ColumnType::Long, 2).references("b", "id"));
    let b = EntitySchemaDescriptor::new("b", "B")
        .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
        .with_field(FieldSchemaDescriptor::new("aId", ColumnType::Long, 2).references("a", "id"));

    let err = SchemaSynchronizer::synchronize(&source, &[a, b], &[], SyncOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cycle"));
    assert!(source.tables(None).await.unwrap().is_empty());

    manager.terminate_all().await;
}
