//! Per-column change flags.

use crate::models::entity::FieldSchemaDescriptor;

/// What differs between a column as declared and as it stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaChangeSet {
    pub nullable_change: bool,
    pub default_change: bool,
    pub type_change: bool,
    pub length_change: bool,
}

impl SchemaChangeSet {
    pub fn is_altered(&self) -> bool {
        self.nullable_change || self.default_change || self.type_change || self.length_change
    }

    /// The stored data itself must be converted.
    pub fn is_data_change(&self) -> bool {
        self.type_change || self.length_change
    }

    /// Changes between two declarations of the same field.
    pub fn between(old: &FieldSchemaDescriptor, new: &FieldSchemaDescriptor) -> Self {
        Self {
            nullable_change: !new.primary_key && old.nullable != new.nullable,
            default_change: old.declared_default().map(str::trim)
                != new.declared_default().map(str::trim),
            type_change: old.column_type != new.column_type,
            length_change: old.column_type == new.column_type
                && (old.length != new.length
                    || old.precision != new.precision
                    || old.scale != new.scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;

    #[test]
    fn test_flags() {
        let changes = SchemaChangeSet {
            default_change: true,
            ..Default::default()
        };
        assert!(changes.is_altered());
        assert!(!changes.is_data_change());
        assert!(!SchemaChangeSet::default().is_altered());
    }

    #[test]
    fn test_between_declarations() {
        let old = FieldSchemaDescriptor::new("name", ColumnType::String, 2).with_length(32);
        let new = old.clone().with_length(64).nullable();
        let changes = SchemaChangeSet::between(&old, &new);
        assert!(changes.length_change);
        assert!(changes.nullable_change);
        assert!(!changes.type_change);
        assert!(changes.is_data_change());
    }
}
