//! SQLite type table and capabilities.
//!
//! SQLite keeps declared type names verbatim, so catalog names match the
//! declarations below.

use super::{
    CallableOutput, ConcatStyle, DataChangeStrategy, DataTypePolicy, Dialect, DialectCapabilities,
    PlaceholderStyle, TypeSyntax,
};
use crate::models::{ColumnType, DatabaseType};

/// Bound on host parameters per statement in older SQLite builds.
const MAX_CLAUSE_VALUES: usize = 999;

pub(super) fn dialect() -> Dialect {
    use ColumnType::*;
    use TypeSyntax::*;

    let types = vec![
        DataTypePolicy::new(Blob, Plain("BLOB"), &["blob"]),
        DataTypePolicy::new(Boolean, Plain("CHAR(1)"), &["char"])
            .quoted()
            .with_alt_default("N"),
        DataTypePolicy::new(Character, Plain("CHAR(1)"), &["char"]).quoted(),
        DataTypePolicy::new(Clob, Plain("TEXT"), &["text", "clob"]).quoted(),
        DataTypePolicy::new(Date, Plain("DATE"), &["date"])
            .quoted()
            .with_alt_default("CURRENT_DATE"),
        DataTypePolicy::new(
            Decimal,
            Precision {
                name: "NUMERIC",
                default_precision: 19,
                default_scale: 4,
            },
            &["numeric", "decimal"],
        )
        .with_alt_default("0"),
        DataTypePolicy::new(Double, Plain("DOUBLE"), &["double", "double precision"])
            .with_alt_default("0"),
        DataTypePolicy::new(Float, Plain("REAL"), &["real", "float"]).with_alt_default("0"),
        DataTypePolicy::new(Short, Plain("SMALLINT"), &["smallint"]).with_alt_default("0"),
        DataTypePolicy::new(Integer, Plain("INTEGER"), &["integer", "int"]).with_alt_default("0"),
        DataTypePolicy::new(Long, Plain("BIGINT"), &["bigint"]).with_alt_default("0"),
        DataTypePolicy::new(
            String,
            Length {
                name: "VARCHAR",
                default_length: 255,
            },
            &["varchar"],
        )
        .quoted()
        .with_alt_default(""),
        DataTypePolicy::new(Timestamp, Plain("TIMESTAMP"), &["timestamp", "datetime"])
            .quoted()
            .with_alt_default("CURRENT_TIMESTAMP"),
        DataTypePolicy::new(
            EnumConst,
            Length {
                name: "VARCHAR",
                default_length: 32,
            },
            &["varchar"],
        )
        .quoted(),
    ];

    Dialect::new(
        DatabaseType::SQLite,
        types,
        DialectCapabilities {
            append_null_on_create: false,
            all_objects_lower_case: false,
            alter_column: false,
            data_change_strategy: DataChangeStrategy::Rebuild,
            rebuild_views_on_table_change: true,
            inline_foreign_keys: true,
            callable_output: CallableOutput::Unsupported,
            transactional_ddl: true,
            test_sql: "SELECT 1",
            shutdown_sql: Some("PRAGMA wal_checkpoint(TRUNCATE)"),
        },
        MAX_CLAUSE_VALUES,
        PlaceholderStyle::Positional,
        ConcatStyle::Pipes,
    )
}
