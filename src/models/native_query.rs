//! Ad hoc queries against tables that have no entity descriptor.

use crate::models::restriction::Operator;
use crate::models::value::SqlValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeColumn {
    pub table: String,
    pub column: String,
}

/// `join_type table ON table.column = to_table.to_column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeJoin {
    pub join_type: JoinType,
    pub table: String,
    pub column: String,
    pub to_table: String,
    pub to_column: String,
}

/// A filter on one column. Range operators use two values, membership any number.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeFilter {
    pub op: Operator,
    pub table: String,
    pub column: String,
    pub values: Vec<SqlValue>,
}

/// A native select over raw tables and columns.
///
/// Tables get aliases `T1`, `T2`, ... in order of first appearance, main table first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NativeQuery {
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<NativeColumn>,
    pub joins: Vec<NativeJoin>,
    pub filters: Vec<NativeFilter>,
    pub distinct: bool,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl NativeQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Select a column of the main table.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        let table = self.table.clone();
        self.columns.push(NativeColumn {
            table,
            column: column.into(),
        });
        self
    }

    pub fn table_column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push(NativeColumn {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn join(
        mut self,
        join_type: JoinType,
        table: impl Into<String>,
        column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        self.joins.push(NativeJoin {
            join_type,
            table: table.into(),
            column: column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
        });
        self
    }

    pub fn filter(
        mut self,
        op: Operator,
        table: impl Into<String>,
        column: impl Into<String>,
        values: Vec<SqlValue>,
    ) -> Self {
        self.filters.push(NativeFilter {
            op,
            table: table.into(),
            column: column.into(),
            values,
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Tables in alias order: main table, then each distinct table seen in joins and columns.
    pub fn tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = vec![self.table.as_str()];
        let referenced = self
            .joins
            .iter()
            .flat_map(|j| [j.to_table.as_str(), j.table.as_str()])
            .chain(self.columns.iter().map(|c| c.table.as_str()))
            .chain(self.filters.iter().map(|f| f.table.as_str()));
        for table in referenced {
            if !tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                tables.push(table);
            }
        }
        tables
    }

    /// Alias of a table, `T1` for the main table.
    pub fn alias_of(&self, table: &str) -> Option<String> {
        self.tables()
            .iter()
            .position(|t| t.eq_ignore_ascii_case(table))
            .map(|i| format!("T{}", i + 1))
    }

    pub fn qualified_table(&self, table: &str) -> String {
        match &self.schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, table),
            _ => table.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_follow_first_appearance() {
        let query = NativeQuery::new("ORDERS")
            .join(JoinType::Left, "CUSTOMER", "ID", "ORDERS", "CUSTOMER_ID")
            .table_column("CUSTOMER", "NAME")
            .column("TOTAL");
        assert_eq!(query.tables(), vec!["ORDERS", "CUSTOMER"]);
        assert_eq!(query.alias_of("customer").as_deref(), Some("T2"));
        assert_eq!(query.alias_of("ORDERS").as_deref(), Some("T1"));
        assert_eq!(query.alias_of("INVOICE"), None);
    }
}
