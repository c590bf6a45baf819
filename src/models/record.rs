//! Field access on entity and procedure objects.

use crate::error::{DbError, DbResult};
use crate::models::value::SqlValue;
use std::collections::BTreeMap;

/// Read and write named fields of an object without knowing its type.
pub trait FieldAccess: Send + Sync {
    fn read_field(&self, name: &str) -> DbResult<SqlValue>;

    fn write_field(&mut self, name: &str, value: SqlValue) -> DbResult<()>;
}

/// A map-backed record. Unset fields read as NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, SqlValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FieldAccess for Record {
    fn read_field(&self, name: &str) -> DbResult<SqlValue> {
        Ok(self.values.get(name).cloned().unwrap_or(SqlValue::Null))
    }

    fn write_field(&mut self, name: &str, value: SqlValue) -> DbResult<()> {
        if name.is_empty() {
            return Err(DbError::invalid_input("Field name cannot be empty"));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reads_unset_as_null() {
        let record = Record::new().with("name", "Ada");
        assert_eq!(record.read_field("name").unwrap(), SqlValue::Text("Ada".into()));
        assert_eq!(record.read_field("email").unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_record_write_field() {
        let mut record = Record::new();
        record.write_field("total", SqlValue::Long(3)).unwrap();
        assert_eq!(record.get("total"), Some(&SqlValue::Long(3)));
        assert!(record.write_field("", SqlValue::Null).is_err());
    }
}
