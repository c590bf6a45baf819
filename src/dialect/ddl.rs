//! DDL generation for tables, columns, constraints and views.

use super::Dialect;
use crate::criteria::{CriteriaTranslator, TranslationContext};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, DatabaseType, EntitySchemaDescriptor, EntitySet, FieldSchemaDescriptor,
    ForeignKeyDescriptor, IndexDescriptor, SchemaChangeSet, UniqueConstraintDescriptor,
    ViewDescriptor,
};

/// Suffix of the scratch table used while rebuilding a table.
pub const REBUILD_SUFFIX: &str = "__rebuild";

/// Statements applied as one unit.
///
/// `prelude` and `epilogue` run on the same connection outside the transaction
/// wrapping `statements`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DdlScript {
    pub prelude: Vec<String>,
    pub statements: Vec<String>,
    pub epilogue: Vec<String>,
}

impl DdlScript {
    pub fn push(&mut self, sql: impl Into<String>) {
        self.statements.push(sql.into());
    }

    pub fn append(&mut self, other: DdlScript) {
        self.prelude.extend(other.prelude);
        self.statements.extend(other.statements);
        self.epilogue.extend(other.epilogue);
    }

    pub fn is_empty(&self) -> bool {
        self.prelude.is_empty() && self.statements.is_empty() && self.epilogue.is_empty()
    }

    /// Every statement in execution order.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.prelude
            .iter()
            .chain(self.statements.iter())
            .chain(self.epilogue.iter())
    }
}

impl Dialect {
    /// Default a column is created with: the declared one, or the alternate
    /// default for NOT NULL columns. Primary keys get none.
    pub fn column_default(&self, field: &FieldSchemaDescriptor) -> DbResult<Option<String>> {
        let policy = self.type_policy(field.column_type)?;
        Ok(if field.primary_key {
            None
        } else if field.nullable {
            field
                .declared_default()
                .and_then(|declared| policy.default_value(Some(declared)))
        } else {
            policy.default_value(field.declared_default())
        })
    }

    /// Column definition as used in CREATE TABLE and column alters.
    ///
    /// `with_key` adds the PRIMARY KEY clause for key fields.
    pub fn column_definition(
        &self,
        field: &FieldSchemaDescriptor,
        with_key: bool,
    ) -> DbResult<String> {
        let policy = self.type_policy(field.column_type)?;
        let mut sql = format!(
            "{} {}",
            field.column,
            policy.type_sql(field.length, field.precision, field.scale)
        );
        if field.primary_key && with_key {
            sql.push_str(" PRIMARY KEY NOT NULL");
            return Ok(sql);
        }
        if let Some(default) = self.column_default(field)? {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default);
        }
        if !field.nullable {
            sql.push_str(" NOT NULL");
        } else if self.capabilities().append_null_on_create {
            sql.push_str(" NULL");
        }
        Ok(sql)
    }

    /// CREATE TABLE with every declared column. Foreign keys are inlined when
    /// `include_foreign_keys` is set and the dialect declares them inline.
    pub fn create_table_sql(
        &self,
        entity: &EntitySchemaDescriptor,
        entities: &EntitySet<'_>,
        include_foreign_keys: bool,
    ) -> DbResult<String> {
        self.create_table_as(&entity.schema_table_name(), entity, &[], entities, include_foreign_keys)
    }

    fn create_table_as(
        &self,
        table: &str,
        entity: &EntitySchemaDescriptor,
        extra_columns: &[&ColumnInfo],
        entities: &EntitySet<'_>,
        include_foreign_keys: bool,
    ) -> DbResult<String> {
        let mut parts = Vec::with_capacity(entity.fields.len());
        for field in &entity.fields {
            parts.push(self.column_definition(field, true)?);
        }
        for column in extra_columns {
            parts.push(format!("{} {} NULL", column.name, column.declared_type));
        }
        if include_foreign_keys && self.capabilities().inline_foreign_keys {
            for fk in entity.foreign_keys() {
                let field = entity.require_field(&fk.field)?;
                if field.ignore_constraint {
                    continue;
                }
                let (target_table, target_column) = entities.resolve_target(&fk)?;
                parts.push(format!(
                    "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    fk.name, field.column, target_table, target_column
                ));
            }
        }
        Ok(format!("CREATE TABLE {} ({})", table, parts.join(", ")))
    }

    pub fn add_column_sql(
        &self,
        entity: &EntitySchemaDescriptor,
        field: &FieldSchemaDescriptor,
    ) -> DbResult<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            entity.schema_table_name(),
            self.column_definition(field, false)?
        ))
    }

    /// Statements bringing one column in line with its declaration.
    ///
    /// Tightening to NOT NULL first backfills NULLs with the column default.
    pub fn alter_column_sql(
        &self,
        entity: &EntitySchemaDescriptor,
        field: &FieldSchemaDescriptor,
        changes: &SchemaChangeSet,
    ) -> DbResult<Vec<String>> {
        if !self.capabilities().alter_column {
            return Err(DbError::unsupported("alter column", self.name()));
        }
        let table = entity.schema_table_name();
        let default = self.column_default(field)?;
        let mut statements = Vec::new();

        if changes.nullable_change && !field.nullable {
            if let Some(default) = &default {
                statements.push(format!(
                    "UPDATE {} SET {} = {} WHERE {} IS NULL",
                    table, field.column, default, field.column
                ));
            }
        }

        match self.database_type() {
            DatabaseType::MySQL => {
                statements.push(format!(
                    "ALTER TABLE {} MODIFY {}",
                    table,
                    self.column_definition(field, false)?
                ));
            }
            _ => {
                let prefix = format!("ALTER TABLE {} ALTER COLUMN {}", table, field.column);
                if changes.is_data_change() {
                    let type_sql = self
                        .type_policy(field.column_type)?
                        .type_sql(field.length, field.precision, field.scale);
                    statements.push(format!(
                        "{} TYPE {} USING {}::{}",
                        prefix, type_sql, field.column, type_sql
                    ));
                }
                if changes.default_change {
                    statements.push(match &default {
                        Some(default) => format!("{} SET DEFAULT {}", prefix, default),
                        None => format!("{} DROP DEFAULT", prefix),
                    });
                }
                if changes.nullable_change {
                    statements.push(if field.nullable {
                        format!("{} DROP NOT NULL", prefix)
                    } else {
                        format!("{} SET NOT NULL", prefix)
                    });
                }
            }
        }
        Ok(statements)
    }

    /// Relax a live column no entity field maps to any more.
    pub fn alter_column_nullable_sql(&self, table: &str, column: &ColumnInfo) -> DbResult<String> {
        match self.database_type() {
            DatabaseType::MySQL => Ok(format!(
                "ALTER TABLE {} MODIFY {} {} NULL",
                table, column.name, column.declared_type
            )),
            DatabaseType::PostgreSQL => Ok(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                table, column.name
            )),
            DatabaseType::SQLite => Err(DbError::unsupported("alter column", self.name())),
        }
    }

    pub fn rename_column_sql(&self, table: &str, from: &str, to: &str) -> String {
        format!("ALTER TABLE {} RENAME COLUMN {} TO {}", table, from, to)
    }

    /// Rename a table within its schema.
    pub fn rename_table_sql(&self, schema: Option<&str>, from: &str, to: &str) -> String {
        let qualify = |name: &str| match schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, name),
            _ => name.to_string(),
        };
        match self.database_type() {
            DatabaseType::MySQL => format!("RENAME TABLE {} TO {}", qualify(from), qualify(to)),
            _ => format!("ALTER TABLE {} RENAME TO {}", qualify(from), to),
        }
    }

    pub fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {} DROP COLUMN {}", table, column)
    }

    pub fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE {}", table)
    }

    /// Rebuild a table into its declared shape, copying the data across.
    ///
    /// Live columns no field maps to are carried over as nullable. NULLs in
    /// NOT NULL columns are replaced by the column default during the copy.
    pub fn rebuild_table_sql(
        &self,
        entity: &EntitySchemaDescriptor,
        live_columns: &[ColumnInfo],
        entities: &EntitySet<'_>,
        include_foreign_keys: bool,
    ) -> DbResult<DdlScript> {
        let table = entity.schema_table_name();
        let scratch_name = format!("{}{}", entity.table, REBUILD_SUFFIX);
        let scratch = match &entity.schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, scratch_name),
            _ => scratch_name.clone(),
        };

        let abandoned: Vec<&ColumnInfo> = live_columns
            .iter()
            .filter(|c| entity.field_by_column(&c.name).is_none())
            .collect();

        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for field in &entity.fields {
            let Some(live) = live_columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&field.column))
            else {
                continue;
            };
            targets.push(field.column.clone());
            let default = if field.nullable {
                None
            } else {
                self.column_default(field)?
            };
            sources.push(match default {
                Some(default) => format!("COALESCE({}, {})", live.name, default),
                None => live.name.clone(),
            });
        }
        for column in &abandoned {
            targets.push(column.name.clone());
            sources.push(column.name.clone());
        }

        let mut script = DdlScript::default();
        if self.database_type() == DatabaseType::SQLite {
            script.prelude.push("PRAGMA foreign_keys = OFF".to_string());
            script.epilogue.push("PRAGMA foreign_keys = ON".to_string());
        }
        script.push(self.create_table_as(&scratch, entity, &abandoned, entities, include_foreign_keys)?);
        if !targets.is_empty() {
            script.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                scratch,
                targets.join(", "),
                sources.join(", "),
                table
            ));
        }
        script.push(self.drop_table_sql(&table));
        script.push(self.rename_table_sql(entity.schema.as_deref(), &scratch_name, &entity.table));
        Ok(script)
    }

    pub fn add_foreign_key_sql(
        &self,
        entity: &EntitySchemaDescriptor,
        fk: &ForeignKeyDescriptor,
        entities: &EntitySet<'_>,
    ) -> DbResult<String> {
        if self.capabilities().inline_foreign_keys {
            return Err(DbError::unsupported("add foreign key", self.name()));
        }
        let field = entity.require_field(&fk.field)?;
        let (target_table, target_column) = entities.resolve_target(fk)?;
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            entity.schema_table_name(),
            fk.name,
            field.column,
            target_table,
            target_column
        ))
    }

    pub fn drop_foreign_key_sql(&self, table: &str, name: &str) -> DbResult<String> {
        match self.database_type() {
            DatabaseType::MySQL => Ok(format!("ALTER TABLE {} DROP FOREIGN KEY {}", table, name)),
            DatabaseType::PostgreSQL => Ok(format!("ALTER TABLE {} DROP CONSTRAINT {}", table, name)),
            DatabaseType::SQLite => Err(DbError::unsupported("drop foreign key", self.name())),
        }
    }

    pub fn add_unique_sql(
        &self,
        entity: &EntitySchemaDescriptor,
        unique: &UniqueConstraintDescriptor,
    ) -> DbResult<String> {
        let columns = field_columns(entity, &unique.fields)?;
        Ok(match self.database_type() {
            DatabaseType::SQLite => format!(
                "CREATE UNIQUE INDEX {} ON {} ({})",
                self.qualified_index(entity.schema.as_deref(), &unique.name),
                entity.table,
                columns
            ),
            _ => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                entity.schema_table_name(),
                unique.name,
                columns
            ),
        })
    }

    pub fn drop_unique_sql(&self, schema: Option<&str>, table: &str, name: &str) -> String {
        let qualified_table = match schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, table),
            _ => table.to_string(),
        };
        match self.database_type() {
            DatabaseType::MySQL => format!("ALTER TABLE {} DROP INDEX {}", qualified_table, name),
            DatabaseType::PostgreSQL => {
                format!("ALTER TABLE {} DROP CONSTRAINT {}", qualified_table, name)
            }
            DatabaseType::SQLite => format!("DROP INDEX {}", self.qualified_index(schema, name)),
        }
    }

    pub fn create_index_sql(
        &self,
        entity: &EntitySchemaDescriptor,
        index: &IndexDescriptor,
    ) -> DbResult<String> {
        let columns = field_columns(entity, &index.fields)?;
        let unique = if index.unique { "UNIQUE " } else { "" };
        Ok(match self.database_type() {
            DatabaseType::SQLite => format!(
                "CREATE {}INDEX {} ON {} ({})",
                unique,
                self.qualified_index(entity.schema.as_deref(), &index.name),
                entity.table,
                columns
            ),
            _ => format!(
                "CREATE {}INDEX {} ON {} ({})",
                unique,
                index.name,
                entity.schema_table_name(),
                columns
            ),
        })
    }

    pub fn drop_index_sql(&self, schema: Option<&str>, table: &str, name: &str) -> String {
        match self.database_type() {
            DatabaseType::MySQL => {
                let qualified_table = match schema {
                    Some(schema) if !schema.is_empty() => format!("{}.{}", schema, table),
                    _ => table.to_string(),
                };
                format!("DROP INDEX {} ON {}", name, qualified_table)
            }
            _ => format!("DROP INDEX {}", self.qualified_index(schema, name)),
        }
    }

    fn qualified_index(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, name),
            _ => name.to_string(),
        }
    }

    /// CREATE VIEW selecting the declared columns over left joins, with the
    /// restriction rendered as inline literals.
    pub fn create_view_sql(
        &self,
        view: &ViewDescriptor,
        entities: &EntitySet<'_>,
    ) -> DbResult<String> {
        if view.columns.is_empty() {
            return Err(DbError::invalid_input(format!(
                "View '{}' declares no columns",
                view.name
            )));
        }
        let base = entities.get(&view.base_entity)?;
        let mut ctx = TranslationContext::none().with_table("T1", base);
        for join in &view.joins {
            ctx = ctx.with_table(join.alias.clone(), entities.get(&join.entity)?);
        }
        let entity_at = |alias: &str| -> DbResult<&EntitySchemaDescriptor> {
            let name = view
                .entity_for_alias(alias)
                .ok_or_else(|| DbError::unknown_reference("view alias", format!("{}.{}", view.name, alias)))?;
            entities.get(name)
        };

        let mut columns = Vec::with_capacity(view.columns.len());
        for column in &view.columns {
            let field = entity_at(&column.alias)?.require_field(&column.field)?;
            columns.push(format!("{}.{} AS {}", column.alias, field.column, column.name));
        }

        let mut sql = format!(
            "CREATE VIEW {} AS SELECT {} FROM {} T1",
            view.schema_view_name(),
            columns.join(", "),
            base.schema_table_name()
        );
        for join in &view.joins {
            let target = entities.get(&join.entity)?;
            let from = entity_at(&join.from_alias)?.require_field(&join.from_field)?;
            let to = target.require_field(&join.to_field)?;
            sql.push_str(&format!(
                " LEFT JOIN {} {} ON {}.{} = {}.{}",
                target.schema_table_name(),
                join.alias,
                join.from_alias,
                from.column,
                join.alias,
                to.column
            ));
        }
        if let Some(restriction) = &view.restriction {
            sql.push_str(" WHERE ");
            CriteriaTranslator::new(self).translate_native(restriction, &ctx, &mut sql)?;
        }
        Ok(sql)
    }

    pub fn drop_view_sql(&self, view: &ViewDescriptor) -> String {
        format!("DROP VIEW {}", view.schema_view_name())
    }

    /// Statements upgrading a table from one declaration of an entity to the next.
    ///
    /// Fields are matched by marker; primary keys are left alone.
    pub fn upgrade_sql(
        &self,
        old: &EntitySchemaDescriptor,
        new: &EntitySchemaDescriptor,
    ) -> DbResult<Vec<String>> {
        let mut statements = Vec::new();
        if !old.table.eq_ignore_ascii_case(&new.table) {
            statements.push(self.rename_table_sql(new.schema.as_deref(), &old.table, &new.table));
        }
        let table = new.schema_table_name();

        for field in new.fields.iter().filter(|f| !f.primary_key) {
            match old.field_by_marker(field.marker) {
                Some(previous) => {
                    if !previous.column.eq_ignore_ascii_case(&field.column) {
                        statements.push(self.rename_column_sql(&table, &previous.column, &field.column));
                    }
                    let changes = SchemaChangeSet::between(previous, field);
                    if changes.is_altered() {
                        statements.extend(self.alter_column_sql(new, field, &changes)?);
                    }
                }
                None => statements.push(self.add_column_sql(new, field)?),
            }
        }

        for field in old.fields.iter().filter(|f| !f.primary_key) {
            if new.field_by_marker(field.marker).is_none() {
                statements.push(self.drop_column_sql(&table, &field.column));
            }
        }
        Ok(statements)
    }
}

fn field_columns(entity: &EntitySchemaDescriptor, fields: &[String]) -> DbResult<String> {
    let mut columns = Vec::with_capacity(fields.len());
    for name in fields {
        columns.push(entity.require_field(name)?.column.clone());
    }
    Ok(columns.join(", "))
}
