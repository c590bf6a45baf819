//! Dialect policy registry.
//!
//! A [`Dialect`] is an immutable registry built once per database type. It maps
//! every logical column type to a [`DataTypePolicy`] and every restriction
//! operator to a [`CriteriaPolicy`], and records the capabilities the schema
//! synchronizer and statement pools consult. Lookups never fall back to a
//! default: an absent policy is reported as [`DbError::Unsupported`].

pub mod criteria;
pub mod ddl;
pub mod dml;
mod mysql;
mod postgres;
mod sqlite;
pub mod types;

pub use criteria::{CriteriaPolicy, CriteriaShape, LikePattern};
pub use ddl::{DdlScript, REBUILD_SUFFIX};
pub use dml::{CallText, ParamSource, StatementTemplate};
pub use types::{DataTypePolicy, TypeSyntax, is_constant_default};

use crate::error::{DbError, DbResult};
use crate::models::{ColumnType, DatabaseType, Operator, SqlValue};
use std::collections::HashMap;
use std::sync::LazyLock;

static POSTGRES: LazyLock<Dialect> = LazyLock::new(postgres::dialect);
static MYSQL: LazyLock<Dialect> = LazyLock::new(mysql::dialect);
static SQLITE: LazyLock<Dialect> = LazyLock::new(sqlite::dialect);

/// How the engine applies type or length changes to an existing column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChangeStrategy {
    /// Alter the column where it stands
    InPlace,
    /// Copy the table into a new shape
    Rebuild,
}

/// How output parameters of a procedure call come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableOutput {
    /// The call itself returns a row holding the outputs
    ResultRow,
    /// Outputs land in session variables read by a follow-up select
    SessionVariables,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ...
    Numbered,
    /// `?`
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStyle {
    /// `a || b`
    Pipes,
    /// `CONCAT(a, b)`
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectCapabilities {
    /// Nullable columns are declared with an explicit `NULL`
    pub append_null_on_create: bool,
    /// Unquoted identifiers are folded to lower case by the catalog
    pub all_objects_lower_case: bool,
    /// Columns can be altered in place
    pub alter_column: bool,
    pub data_change_strategy: DataChangeStrategy,
    /// Views over a changed table are dropped and recreated
    pub rebuild_views_on_table_change: bool,
    /// Foreign keys are declared inside CREATE TABLE only
    pub inline_foreign_keys: bool,
    pub callable_output: CallableOutput,
    /// DDL statements take part in transactions
    pub transactional_ddl: bool,
    pub test_sql: &'static str,
    /// Run before a data source is closed when it asks for a shutdown
    pub shutdown_sql: Option<&'static str>,
}

#[derive(Debug)]
pub struct Dialect {
    database_type: DatabaseType,
    types: HashMap<ColumnType, DataTypePolicy>,
    criteria: HashMap<Operator, CriteriaPolicy>,
    capabilities: DialectCapabilities,
    max_clause_values: usize,
    placeholder_style: PlaceholderStyle,
    concat_style: ConcatStyle,
}

impl Dialect {
    pub fn new(
        database_type: DatabaseType,
        types: Vec<DataTypePolicy>,
        capabilities: DialectCapabilities,
        max_clause_values: usize,
        placeholder_style: PlaceholderStyle,
        concat_style: ConcatStyle,
    ) -> Self {
        Self {
            database_type,
            types: types.into_iter().map(|p| (p.column_type(), p)).collect(),
            criteria: CriteriaPolicy::standard_set()
                .into_iter()
                .map(|p| (p.operator(), p))
                .collect(),
            capabilities,
            max_clause_values,
            placeholder_style,
            concat_style,
        }
    }

    pub fn postgres() -> &'static Dialect {
        &POSTGRES
    }

    pub fn mysql() -> &'static Dialect {
        &MYSQL
    }

    pub fn sqlite() -> &'static Dialect {
        &SQLITE
    }

    pub fn for_type(database_type: DatabaseType) -> &'static Dialect {
        match database_type {
            DatabaseType::PostgreSQL => Self::postgres(),
            DatabaseType::MySQL => Self::mysql(),
            DatabaseType::SQLite => Self::sqlite(),
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    pub fn name(&self) -> &'static str {
        self.database_type.display_name()
    }

    pub fn capabilities(&self) -> &DialectCapabilities {
        &self.capabilities
    }

    /// Maximum values per IN clause. 0 means unlimited.
    pub fn max_clause_values(&self) -> usize {
        self.max_clause_values
    }

    pub fn type_policy(&self, column_type: ColumnType) -> DbResult<&DataTypePolicy> {
        self.types.get(&column_type).ok_or_else(|| {
            DbError::unsupported(format!("column type {}", column_type), self.name())
        })
    }

    pub fn criteria_policy(&self, operator: Operator) -> DbResult<&CriteriaPolicy> {
        self.criteria
            .get(&operator)
            .ok_or_else(|| DbError::unsupported(format!("operator {}", operator), self.name()))
    }

    /// Placeholder for the `n`th parameter, counting from 1.
    pub fn placeholder(&self, n: usize) -> String {
        match self.placeholder_style {
            PlaceholderStyle::Numbered => format!("${}", n),
            PlaceholderStyle::Positional => "?".to_string(),
        }
    }

    pub fn concat(&self, parts: &[&str]) -> String {
        match self.concat_style {
            ConcatStyle::Pipes => parts.join(" || "),
            ConcatStyle::Function => format!("CONCAT({})", parts.join(", ")),
        }
    }

    /// Wrap a field expression with the wildcards of a pattern operator.
    pub fn like_expression(&self, pattern: LikePattern, expression: &str) -> String {
        match pattern {
            LikePattern::Contains => self.concat(&["'%'", expression, "'%'"]),
            LikePattern::BeginsWith => self.concat(&[expression, "'%'"]),
            LikePattern::EndsWith => self.concat(&["'%'", expression]),
        }
    }

    /// Fold an identifier the way the catalog stores it.
    pub fn normalize_name(&self, name: &str) -> String {
        if self.capabilities.all_objects_lower_case {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    /// Render a value as an inline SQL literal.
    pub fn literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "'Y'" } else { "'N'" }.to_string(),
            SqlValue::Short(v) => v.to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Long(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Double(v) => v.to_string(),
            SqlValue::Decimal(v) => v.clone(),
            SqlValue::Char(c) => quote(&c.to_string()),
            SqlValue::Text(t) => quote(t),
            SqlValue::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                match self.database_type {
                    DatabaseType::PostgreSQL => format!("'\\x{}'", hex),
                    _ => format!("X'{}'", hex),
                }
            }
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            SqlValue::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_every_dialect_covers_every_column_type() {
        for dialect in [Dialect::postgres(), Dialect::mysql(), Dialect::sqlite()] {
            for column_type in ColumnType::ALL {
                assert!(
                    dialect.type_policy(column_type).is_ok(),
                    "{} lacks {}",
                    dialect.name(),
                    column_type
                );
            }
            for op in Operator::ALL {
                assert!(dialect.criteria_policy(op).is_ok());
            }
        }
    }

    #[test]
    fn test_for_type_returns_shared_instance() {
        assert!(std::ptr::eq(
            Dialect::for_type(DatabaseType::SQLite),
            Dialect::sqlite()
        ));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::postgres().placeholder(3), "$3");
        assert_eq!(Dialect::mysql().placeholder(3), "?");
        assert_eq!(Dialect::sqlite().placeholder(1), "?");
    }

    #[test]
    fn test_max_clause_values() {
        assert_eq!(Dialect::postgres().max_clause_values(), 0);
        assert_eq!(Dialect::mysql().max_clause_values(), 0);
        assert_eq!(Dialect::sqlite().max_clause_values(), 999);
    }

    #[test]
    fn test_literals() {
        let d = Dialect::postgres();
        assert_eq!(d.literal(&SqlValue::Text("O'Brien".into())), "'O''Brien'");
        assert_eq!(d.literal(&SqlValue::Bool(true)), "'Y'");
        assert_eq!(d.literal(&SqlValue::Null), "NULL");
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(d.literal(&SqlValue::Date(date)), "'2024-01-31'");
        assert_eq!(
            d.literal(&SqlValue::Timestamp(date.and_hms_opt(8, 5, 9).unwrap())),
            "'2024-01-31 08:05:09'"
        );
        assert_eq!(Dialect::mysql().literal(&SqlValue::Bytes(vec![0xab, 0x01])), "X'ab01'");
    }

    #[test]
    fn test_like_expression_uses_dialect_concat() {
        assert_eq!(
            Dialect::postgres().like_expression(LikePattern::BeginsWith, "T2.code"),
            "T2.code || '%'"
        );
        assert_eq!(
            Dialect::mysql().like_expression(LikePattern::Contains, "T2.code"),
            "CONCAT('%', T2.code, '%')"
        );
    }

    #[test]
    fn test_capabilities() {
        assert!(Dialect::postgres().capabilities().alter_column);
        assert_eq!(
            Dialect::sqlite().capabilities().data_change_strategy,
            DataChangeStrategy::Rebuild
        );
        assert_eq!(
            Dialect::mysql().capabilities().callable_output,
            CallableOutput::SessionVariables
        );
        assert!(Dialect::sqlite().capabilities().shutdown_sql.is_some());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(Dialect::postgres().normalize_name("ORDERS"), "orders");
        assert_eq!(Dialect::mysql().normalize_name("ORDERS"), "ORDERS");
    }
}
