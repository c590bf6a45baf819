//! Records read from a live database catalog.
//!
//! These mirror what the database reports, not what an entity declares.
//! The schema synchronizer compares the two.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table_type: TableType,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table_type,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// Type of database table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
}

impl TableType {
    /// Parse table type from database-specific string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "view" | "system view" => Self::View,
            _ => Self::Table,
        }
    }
}

impl std::fmt::Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
        }
    }
}

/// A live column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as reported, e.g. `character varying(64)`
    pub declared_type: String,
    /// Lower-cased base type without size arguments, e.g. `character varying`
    pub type_name: String,
    /// Character length or numeric precision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimal_digits: Option<u32>,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub primary_key: bool,
}

impl ColumnInfo {
    /// Build a column from its declared type, splitting out size arguments.
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, nullable: bool) -> Self {
        let declared_type = declared_type.into();
        let (type_name, size, decimal_digits) = parse_declared_type(&declared_type);
        Self {
            name: name.into(),
            declared_type,
            type_name,
            size,
            decimal_digits,
            nullable,
            default_value: None,
            primary_key: false,
        }
    }

    pub fn with_default(mut self, default_value: Option<String>) -> Self {
        self.default_value = default_value.filter(|v| !v.is_empty());
        self
    }

    pub fn with_primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Override the size reported by the declared type.
    pub fn with_size(mut self, size: Option<u32>, decimal_digits: Option<u32>) -> Self {
        if size.is_some() {
            self.size = size;
        }
        if decimal_digits.is_some() {
            self.decimal_digits = decimal_digits;
        }
        self
    }
}

/// Split a declared type like `numeric(12,2)` into `("numeric", Some(12), Some(2))`.
///
/// Trailing modifiers such as `unsigned` are dropped.
pub fn parse_declared_type(declared: &str) -> (String, Option<u32>, Option<u32>) {
    let lower = declared.trim().to_lowercase();
    let Some(open) = lower.find('(') else {
        let base = lower
            .trim_end_matches(" unsigned")
            .trim_end_matches(" zerofill")
            .to_string();
        return (base, None, None);
    };
    let base = lower[..open].trim().to_string();
    let args = lower[open + 1..]
        .split(')')
        .next()
        .unwrap_or_default()
        .to_string();
    let mut parts = args.split(',').map(|p| p.trim().parse::<u32>().ok());
    let size = parts.next().flatten();
    let digits = parts.next().flatten();
    (base, size, digits)
}

/// A live foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// SQLite reports no constraint names; the synchronizer matches those by column
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// A live index, including indexes backing unique constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

impl IndexInfo {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            primary: false,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    /// Compare column lists ignoring case.
    pub fn covers(&self, columns: &[String]) -> bool {
        self.columns.len() == columns.len()
            && self
                .columns
                .iter()
                .zip(columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declared_type() {
        assert_eq!(
            parse_declared_type("VARCHAR(64)"),
            ("varchar".to_string(), Some(64), None)
        );
        assert_eq!(
            parse_declared_type("numeric(12, 2)"),
            ("numeric".to_string(), Some(12), Some(2))
        );
        assert_eq!(
            parse_declared_type("bigint"),
            ("bigint".to_string(), None, None)
        );
        assert_eq!(
            parse_declared_type("int(11) unsigned"),
            ("int".to_string(), Some(11), None)
        );
        assert_eq!(
            parse_declared_type("double precision"),
            ("double precision".to_string(), None, None)
        );
    }

    #[test]
    fn test_column_info_blank_default_is_none() {
        let col = ColumnInfo::new("NAME", "TEXT", true).with_default(Some(String::new()));
        assert_eq!(col.default_value, None);
    }

    #[test]
    fn test_index_covers_ignores_case() {
        let index = IndexInfo::new("ORDERS_IDX01", vec!["CUSTOMER_ID".into()]);
        assert!(index.covers(&["customer_id".to_string()]));
        assert!(!index.covers(&["customer_id".to_string(), "status".to_string()]));
    }

    #[test]
    fn test_table_type_parse() {
        assert_eq!(TableType::parse("BASE TABLE"), TableType::Table);
        assert_eq!(TableType::parse("VIEW"), TableType::View);
    }
}
