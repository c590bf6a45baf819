//! Entity, field and view descriptors.
//!
//! Descriptors are built by an external discovery step and handed to the
//! engine fully resolved. The engine validates them but never derives them
//! from types at runtime.

use crate::error::{DbError, DbResult};
use crate::models::restriction::Restriction;
use crate::models::value::{ColumnType, SqlValue};
use std::collections::{HashMap, HashSet};

/// Foreign-key linkage of a field: the referenced entity and field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub entity: String,
    pub field: String,
}

/// Schema description of a single entity field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchemaDescriptor {
    pub name: String,
    pub column: String,
    pub column_type: ColumnType,
    pub length: u32,
    pub precision: u32,
    pub scale: u32,
    pub nullable: bool,
    pub default_value: Option<String>,
    /// Stable identity of the field across renames.
    pub marker: u64,
    pub primary_key: bool,
    pub foreign_key: Option<ForeignKeyRef>,
    /// Skip foreign-key constraint generation for this field.
    pub ignore_constraint: bool,
}

impl FieldSchemaDescriptor {
    /// Create a NOT NULL field whose column name equals the field name.
    pub fn new(name: impl Into<String>, column_type: ColumnType, marker: u64) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            column_type,
            length: 0,
            precision: 0,
            scale: 0,
            nullable: false,
            default_value: None,
            marker,
            primary_key: false,
            foreign_key: None,
            ignore_constraint: false,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn references(mut self, entity: impl Into<String>, field: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKeyRef {
            entity: entity.into(),
            field: field.into(),
        });
        self
    }

    pub fn ignore_constraint(mut self) -> Self {
        self.ignore_constraint = true;
        self
    }

    /// The declared default, ignoring blank strings.
    pub fn declared_default(&self) -> Option<&str> {
        self.default_value
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}

/// A named unique constraint over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraintDescriptor {
    pub name: String,
    pub fields: Vec<String>,
}

/// A named index over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

/// Foreign key resolved from a field's linkage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    pub name: String,
    pub field: String,
    pub target_entity: String,
    pub target_field: String,
}

/// A seed row keyed by the entity's primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticRow {
    pub values: Vec<(String, SqlValue)>,
}

impl StaticRow {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.values.push((field.into(), value.into()));
        self
    }

    pub fn value(&self, field: &str) -> Option<&SqlValue> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

impl Default for StaticRow {
    fn default() -> Self {
        Self::new()
    }
}

/// Schema description of a table-backed entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchemaDescriptor {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub alias: String,
    pub fields: Vec<FieldSchemaDescriptor>,
    pub version_field: Option<String>,
    pub tenant_id_field: Option<String>,
    pub unique_constraints: Vec<UniqueConstraintDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub static_rows: Vec<StaticRow>,
    pub view_only: bool,
}

impl EntitySchemaDescriptor {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table: table.into(),
            alias: "T1".to_string(),
            fields: Vec::new(),
            version_field: None,
            tenant_id_field: None,
            unique_constraints: Vec::new(),
            indexes: Vec::new(),
            static_rows: Vec::new(),
            view_only: false,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_field(mut self, field: FieldSchemaDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_version_field(mut self, field: impl Into<String>) -> Self {
        self.version_field = Some(field.into());
        self
    }

    pub fn with_tenant_id_field(mut self, field: impl Into<String>) -> Self {
        self.tenant_id_field = Some(field.into());
        self
    }

    /// Add a unique constraint named `<TABLE>_UCnn`.
    pub fn with_unique(mut self, fields: &[&str]) -> Self {
        let name = format!("{}_UC{:02}", self.table, self.unique_constraints.len() + 1);
        self.unique_constraints.push(UniqueConstraintDescriptor {
            name,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    /// Add an index named `<TABLE>_IDXnn`.
    pub fn with_index(mut self, fields: &[&str], unique: bool) -> Self {
        let name = format!("{}_IDX{:02}", self.table, self.indexes.len() + 1);
        self.indexes.push(IndexDescriptor {
            name,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique,
        });
        self
    }

    pub fn with_static_row(mut self, row: StaticRow) -> Self {
        self.static_rows.push(row);
        self
    }

    pub fn view_only(mut self) -> Self {
        self.view_only = true;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchemaDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field and fail with an unknown-reference error when absent.
    pub fn require_field(&self, name: &str) -> DbResult<&FieldSchemaDescriptor> {
        self.field(name).ok_or_else(|| {
            DbError::unknown_reference("field", format!("{}.{}", self.name, name))
        })
    }

    pub fn field_by_column(&self, column: &str) -> Option<&FieldSchemaDescriptor> {
        self.fields
            .iter()
            .find(|f| f.column.eq_ignore_ascii_case(column))
    }

    pub fn field_by_marker(&self, marker: u64) -> Option<&FieldSchemaDescriptor> {
        self.fields.iter().find(|f| f.marker == marker)
    }

    pub fn id_field(&self) -> Option<&FieldSchemaDescriptor> {
        self.fields.iter().find(|f| f.primary_key)
    }

    pub fn version(&self) -> Option<&FieldSchemaDescriptor> {
        self.version_field.as_deref().and_then(|name| self.field(name))
    }

    /// Table name qualified with its schema when one is set.
    pub fn schema_table_name(&self) -> String {
        match &self.schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, self.table),
            _ => self.table.clone(),
        }
    }

    /// Foreign keys derived from field linkage, named `<TABLE>_FKnn` in field order.
    pub fn foreign_keys(&self) -> Vec<ForeignKeyDescriptor> {
        self.fields
            .iter()
            .filter_map(|f| f.foreign_key.as_ref().map(|fk| (f, fk)))
            .enumerate()
            .map(|(i, (field, fk))| ForeignKeyDescriptor {
                name: format!("{}_FK{:02}", self.table, i + 1),
                field: field.name.clone(),
                target_entity: fk.entity.clone(),
                target_field: fk.field.clone(),
            })
            .collect()
    }

    /// Check descriptor invariants.
    pub fn validate(&self) -> DbResult<()> {
        let primary_keys = self.fields.iter().filter(|f| f.primary_key).count();
        if !self.view_only && primary_keys != 1 {
            return Err(DbError::invalid_input(format!(
                "Entity '{}' must declare exactly one primary key field, found {}",
                self.name, primary_keys
            )));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        let mut markers = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(DbError::invalid_input(format!(
                    "Entity '{}' declares field '{}' more than once",
                    self.name, field.name
                )));
            }
            if !columns.insert(field.column.to_ascii_lowercase()) {
                return Err(DbError::invalid_input(format!(
                    "Entity '{}' maps column '{}' more than once",
                    self.name, field.column
                )));
            }
            if !markers.insert(field.marker) {
                return Err(DbError::invalid_input(format!(
                    "Entity '{}' reuses marker {} on field '{}'",
                    self.name, field.marker, field.name
                )));
            }
        }

        for name in self
            .version_field
            .iter()
            .chain(self.tenant_id_field.iter())
            .chain(self.unique_constraints.iter().flat_map(|u| u.fields.iter()))
            .chain(self.indexes.iter().flat_map(|i| i.fields.iter()))
        {
            self.require_field(name)?;
        }

        if let Some(version) = self.version() {
            if !version.column_type.is_version_type() {
                return Err(DbError::invalid_input(format!(
                    "Version field '{}' of entity '{}' has non-version type {}",
                    version.name, self.name, version.column_type
                )));
            }
        }
        Ok(())
    }
}

/// Entities indexed by name, for resolving references between them.
#[derive(Debug, Clone, Default)]
pub struct EntitySet<'a> {
    entities: HashMap<&'a str, &'a EntitySchemaDescriptor>,
}

impl<'a> EntitySet<'a> {
    pub fn new(entities: &'a [EntitySchemaDescriptor]) -> Self {
        Self {
            entities: entities.iter().map(|e| (e.name.as_str(), e)).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn get(&self, name: &str) -> DbResult<&'a EntitySchemaDescriptor> {
        self.entities
            .get(name)
            .copied()
            .ok_or_else(|| DbError::unknown_reference("entity", name))
    }

    /// Table and column a foreign key points at.
    pub fn resolve_target(&self, fk: &ForeignKeyDescriptor) -> DbResult<(String, String)> {
        let target = self.get(&fk.target_entity)?;
        let field = target.require_field(&fk.target_field)?;
        Ok((target.schema_table_name(), field.column.clone()))
    }
}

/// A left join inside a view definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewJoin {
    pub entity: String,
    pub alias: String,
    pub from_alias: String,
    pub from_field: String,
    pub to_field: String,
}

/// A column exposed by a view, taken from the entity behind `alias`.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewColumn {
    pub name: String,
    pub alias: String,
    pub field: String,
}

/// A view over a base entity and any number of left-joined entities.
///
/// The base entity is aliased `T1`; joins take `T2`, `T3`, ... in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDescriptor {
    pub name: String,
    pub schema: Option<String>,
    pub base_entity: String,
    pub joins: Vec<ViewJoin>,
    pub columns: Vec<ViewColumn>,
    pub restriction: Option<Restriction>,
}

impl ViewDescriptor {
    pub fn new(name: impl Into<String>, base_entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            base_entity: base_entity.into(),
            joins: Vec::new(),
            columns: Vec::new(),
            restriction: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Left join `entity` on `from_alias.from_field = <new alias>.to_field`.
    pub fn with_join(
        mut self,
        entity: impl Into<String>,
        from_alias: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        let alias = format!("T{}", self.joins.len() + 2);
        self.joins.push(ViewJoin {
            entity: entity.into(),
            alias,
            from_alias: from_alias.into(),
            from_field: from_field.into(),
            to_field: to_field.into(),
        });
        self
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        alias: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.columns.push(ViewColumn {
            name: name.into(),
            alias: alias.into(),
            field: field.into(),
        });
        self
    }

    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restriction = Some(restriction);
        self
    }

    /// Entity names this view reads from, base first.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.base_entity.as_str()).chain(self.joins.iter().map(|j| j.entity.as_str()))
    }

    /// Entity name behind a table alias.
    pub fn entity_for_alias(&self, alias: &str) -> Option<&str> {
        if alias == "T1" {
            return Some(&self.base_entity);
        }
        self.joins
            .iter()
            .find(|j| j.alias == alias)
            .map(|j| j.entity.as_str())
    }

    pub fn schema_view_name(&self) -> String {
        match &self.schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, self.name),
            _ => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> EntitySchemaDescriptor {
        EntitySchemaDescriptor::new("customer", "CUSTOMER")
            .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
            .with_field(FieldSchemaDescriptor::new("name", ColumnType::String, 2).with_length(64))
            .with_field(
                FieldSchemaDescriptor::new("regionId", ColumnType::Long, 3)
                    .with_column("REGION_ID")
                    .references("region", "id"),
            )
            .with_unique(&["name"])
    }

    #[test]
    fn test_validate_accepts_well_formed_entity() {
        assert!(customer().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_single_primary_key() {
        let entity = EntitySchemaDescriptor::new("audit", "AUDIT")
            .with_field(FieldSchemaDescriptor::new("note", ColumnType::String, 1));
        assert!(matches!(entity.validate(), Err(DbError::InvalidInput { .. })));
        assert!(entity.view_only().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_field_names() {
        let entity = customer().with_field(FieldSchemaDescriptor::new("name", ColumnType::String, 9));
        assert!(entity.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_reused_marker() {
        let entity = customer().with_field(FieldSchemaDescriptor::new("email", ColumnType::String, 2));
        let err = entity.validate().unwrap_err();
        assert!(err.to_string().contains("marker 2"));
    }

    #[test]
    fn test_validate_rejects_unknown_constraint_field() {
        let entity = customer().with_index(&["missing"], false);
        assert!(matches!(
            entity.validate(),
            Err(DbError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_foreign_key_names() {
        let fks = customer().foreign_keys();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].name, "CUSTOMER_FK01");
        assert_eq!(fks[0].target_entity, "region");
    }

    #[test]
    fn test_generated_constraint_names() {
        let entity = customer().with_index(&["regionId"], false);
        assert_eq!(entity.unique_constraints[0].name, "CUSTOMER_UC01");
        assert_eq!(entity.indexes[0].name, "CUSTOMER_IDX01");
    }

    #[test]
    fn test_entity_set_resolves_foreign_key_target() {
        let region = EntitySchemaDescriptor::new("region", "REGION").with_field(
            FieldSchemaDescriptor::new("id", ColumnType::Long, 1)
                .with_column("REGION_ID")
                .primary_key(),
        );
        let entities = vec![customer(), region];
        let set = EntitySet::new(&entities);
        let fk = &entities[0].foreign_keys()[0];
        assert_eq!(
            set.resolve_target(fk).unwrap(),
            ("REGION".to_string(), "REGION_ID".to_string())
        );
        assert!(matches!(set.get("invoice"), Err(DbError::UnknownReference { .. })));
    }

    #[test]
    fn test_schema_table_name() {
        assert_eq!(customer().schema_table_name(), "CUSTOMER");
        assert_eq!(customer().with_schema("sales").schema_table_name(), "sales.CUSTOMER");
    }

    #[test]
    fn test_view_aliases() {
        let view = ViewDescriptor::new("V_CUSTOMER", "customer")
            .with_join("region", "T1", "regionId", "id")
            .with_column("NAME", "T1", "name")
            .with_column("REGION_NAME", "T2", "name");
        assert_eq!(view.joins[0].alias, "T2");
        assert_eq!(view.entity_for_alias("T2"), Some("region"));
        assert_eq!(view.entities().collect::<Vec<_>>(), vec!["customer", "region"]);
    }
}
