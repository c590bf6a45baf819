//! PostgreSQL type table and capabilities.

use super::{
    CallableOutput, ConcatStyle, DataChangeStrategy, DataTypePolicy, Dialect, DialectCapabilities,
    PlaceholderStyle, TypeSyntax,
};
use crate::models::{ColumnType, DatabaseType};

const CHAR_NAMES: &[&str] = &["character", "char", "bpchar"];
const VARCHAR_NAMES: &[&str] = &["character varying", "varchar"];

pub(super) fn dialect() -> Dialect {
    use ColumnType::*;
    use TypeSyntax::*;

    let types = vec![
        DataTypePolicy::new(Blob, Plain("BYTEA"), &["bytea"]),
        DataTypePolicy::new(Boolean, Plain("CHAR(1)"), CHAR_NAMES)
            .quoted()
            .with_alt_default("N"),
        DataTypePolicy::new(Character, Plain("CHAR(1)"), CHAR_NAMES).quoted(),
        DataTypePolicy::new(Clob, Plain("TEXT"), &["text"]).quoted(),
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
        DataTypePolicy::new(Double, Plain("DOUBLE PRECISION"), &["double precision", "float8"])
            .with_alt_default("0"),
        DataTypePolicy::new(Float, Plain("REAL"), &["real", "float4"]).with_alt_default("0"),
        DataTypePolicy::new(Short, Plain("SMALLINT"), &["smallint", "int2"]).with_alt_default("0"),
        DataTypePolicy::new(Integer, Plain("INTEGER"), &["integer", "int4", "int"])
            .with_alt_default("0"),
        DataTypePolicy::new(Long, Plain("BIGINT"), &["bigint", "int8"]).with_alt_default("0"),
        DataTypePolicy::new(
            String,
            Length {
                name: "VARCHAR",
                default_length: 255,
            },
            VARCHAR_NAMES,
        )
        .quoted()
        .with_alt_default(""),
        DataTypePolicy::new(
            Timestamp,
            Plain("TIMESTAMP"),
            &["timestamp without time zone", "timestamp"],
        )
        .quoted()
        .with_alt_default("CURRENT_TIMESTAMP"),
        DataTypePolicy::new(
            EnumConst,
            Length {
                name: "VARCHAR",
                default_length: 32,
            },
            VARCHAR_NAMES,
        )
        .quoted(),
    ];

    Dialect::new(
        DatabaseType::PostgreSQL,
        types,
        DialectCapabilities {
            append_null_on_create: true,
            all_objects_lower_case: true,
            alter_column: true,
            data_change_strategy: DataChangeStrategy::InPlace,
            rebuild_views_on_table_change: true,
            inline_foreign_keys: false,
            callable_output: CallableOutput::ResultRow,
            transactional_ddl: true,
            test_sql: "SELECT 1",
            shutdown_sql: None,
        },
        0,
        PlaceholderStyle::Numbered,
        ConcatStyle::Pipes,
    )
}
