//! MySQL and MariaDB type table and capabilities.

use super::{
    CallableOutput, ConcatStyle, DataChangeStrategy, DataTypePolicy, Dialect, DialectCapabilities,
    PlaceholderStyle, TypeSyntax,
};
use crate::models::{ColumnType, DatabaseType};

pub(super) fn dialect() -> Dialect {
    use ColumnType::*;
    use TypeSyntax::*;

    let types = vec![
        DataTypePolicy::new(Blob, Plain("LONGBLOB"), &["longblob", "mediumblob", "blob"]),
        DataTypePolicy::new(Boolean, Plain("CHAR(1)"), &["char"])
            .quoted()
            .with_alt_default("N"),
        DataTypePolicy::new(Character, Plain("CHAR(1)"), &["char"]).quoted(),
        DataTypePolicy::new(Clob, Plain("LONGTEXT"), &["longtext", "mediumtext", "text"]).quoted(),
        // DATE columns accept no keyword default before 8.0.13
        DataTypePolicy::new(Date, Plain("DATE"), &["date"]).quoted(),
        DataTypePolicy::new(
            Decimal,
            Precision {
                name: "DECIMAL",
                default_precision: 19,
                default_scale: 4,
            },
            &["decimal", "numeric"],
        )
        .with_alt_default("0"),
        DataTypePolicy::new(Double, Plain("DOUBLE"), &["double", "double precision"])
            .with_alt_default("0"),
        DataTypePolicy::new(Float, Plain("FLOAT"), &["float"]).with_alt_default("0"),
        DataTypePolicy::new(Short, Plain("SMALLINT"), &["smallint"]).with_alt_default("0"),
        DataTypePolicy::new(Integer, Plain("INT"), &["int", "integer"]).with_alt_default("0"),
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
        DataTypePolicy::new(Timestamp, Plain("DATETIME"), &["datetime", "timestamp"])
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
        DatabaseType::MySQL,
        types,
        DialectCapabilities {
            append_null_on_create: true,
            all_objects_lower_case: false,
            alter_column: true,
            data_change_strategy: DataChangeStrategy::InPlace,
            rebuild_views_on_table_change: false,
            inline_foreign_keys: false,
            callable_output: CallableOutput::SessionVariables,
            transactional_ddl: false,
            test_sql: "SELECT 1",
            shutdown_sql: None,
        },
        0,
        PlaceholderStyle::Positional,
        ConcatStyle::Function,
    )
}
