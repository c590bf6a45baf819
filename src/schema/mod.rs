//! Schema synchronizer.
//!
//! Brings the live schema of a data source in line with a set of entity and
//! view declarations. Work proceeds in phases:
//!
//! 1. plan table bodies per entity in dependency order (create, alter or rebuild)
//! 2. drop views that no longer fit
//! 3. apply each entity's table script as one unit, then upsert its static rows
//! 4. drop unmatched constraints, then add missing ones
//! 5. create missing views
//!
//! The first failing unit aborts the run; statements already applied stay.

pub mod dependency;
pub mod diff;

pub use dependency::dependency_order;

use crate::db::SqlDataSource;
use crate::dialect::{DataChangeStrategy, DdlScript, Dialect, is_constant_default};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, EntitySchemaDescriptor, EntitySet, ForeignKeyDescriptor, ForeignKeyInfo,
    IndexInfo, SqlValue, StaticRow, ViewDescriptor,
};
use diff::{TableDiff, field_columns, foreign_key_matches, index_matches};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Manage foreign keys and drop columns and constraints nothing declares
    pub force_constraints: bool,
}

impl SyncOptions {
    pub fn forced() -> Self {
        Self {
            force_constraints: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityOutcome {
    Unchanged,
    Altered,
    Created,
}

/// What a synchronization run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Entities in the order they were processed
    pub entities: Vec<(String, EntityOutcome)>,
    /// Every statement executed, in order
    pub statements: Vec<String>,
}

impl SyncReport {
    pub fn outcome(&self, entity: &str) -> Option<EntityOutcome> {
        self.entities
            .iter()
            .find(|(name, _)| name == entity)
            .map(|(_, outcome)| *outcome)
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Nothing had to be executed.
    pub fn is_noop(&self) -> bool {
        self.statements.is_empty()
    }

    fn mark_altered(&mut self, entity: &str) {
        if let Some((_, outcome)) = self.entities.iter_mut().find(|(name, _)| name == entity) {
            if *outcome == EntityOutcome::Unchanged {
                *outcome = EntityOutcome::Altered;
            }
        }
    }
}

/// Table-body work planned for one entity.
struct TablePlan<'e> {
    entity: &'e EntitySchemaDescriptor,
    outcome: EntityOutcome,
    script: DdlScript,
}

/// Live constraints of one table, read after the table bodies are applied.
struct LiveConstraints<'e> {
    entity: &'e EntitySchemaDescriptor,
    indexes: Vec<IndexInfo>,
    foreign_keys: Vec<ForeignKeyInfo>,
}

pub struct SchemaSynchronizer;

impl SchemaSynchronizer {
    /// Synchronize the live schema of `source` with the declared entities and views.
    pub async fn synchronize(
        source: &SqlDataSource,
        entities: &[EntitySchemaDescriptor],
        views: &[ViewDescriptor],
        options: SyncOptions,
    ) -> DbResult<SyncReport> {
        for entity in entities {
            entity.validate()?;
        }
        let ordered = dependency_order(entities)?;
        let set = EntitySet::new(entities);
        let run = SyncRun {
            source,
            dialect: source.dialect(),
            set,
            options,
        };

        info!(
            datasource = %source.name(),
            entities = ordered.len(),
            views = views.len(),
            force = options.force_constraints,
            "Synchronizing schema"
        );

        let mut report = SyncReport::default();
        let mut plans = Vec::with_capacity(ordered.len());
        for entity in ordered.into_iter().filter(|e| !e.view_only) {
            let plan = run.plan_table(entity).await?;
            report.entities.push((entity.name.clone(), plan.outcome));
            plans.push(plan);
        }

        let changed: HashSet<&str> = plans
            .iter()
            .filter(|p| p.outcome != EntityOutcome::Unchanged)
            .map(|p| p.entity.name.as_str())
            .collect();
        let pending_views = run.drop_stale_views(views, &changed, &mut report).await?;

        for plan in &plans {
            if !plan.script.is_empty() {
                let verb = match plan.outcome {
                    EntityOutcome::Created => "create",
                    _ => "alter",
                };
                run.apply(&plan.script, &table_intent(verb, &plan.entity.table), &mut report)
                    .await?;
            }
            run.sync_static_rows(plan.entity, &mut report).await?;
        }

        run.sync_constraints(&plans, &mut report).await?;

        for view in pending_views {
            let mut script = DdlScript::default();
            script.push(run.dialect.create_view_sql(view, &run.set)?);
            run.apply(&script, &format!("create view `{}`", view.name), &mut report)
                .await?;
        }

        info!(
            datasource = %source.name(),
            statements = report.statement_count(),
            created = report.entities.iter().filter(|(_, o)| *o == EntityOutcome::Created).count(),
            altered = report.entities.iter().filter(|(_, o)| *o == EntityOutcome::Altered).count(),
            "Schema synchronized"
        );
        Ok(report)
    }
}

fn table_intent(verb: &str, table: &str) -> String {
    format!("{} table `{}`", verb, table)
}

struct SyncRun<'a> {
    source: &'a SqlDataSource,
    dialect: &'static Dialect,
    set: EntitySet<'a>,
    options: SyncOptions,
}

impl<'a> SyncRun<'a> {
    fn force(&self) -> bool {
        self.options.force_constraints
    }

    async fn apply(&self, script: &DdlScript, intent: &str, report: &mut SyncReport) -> DbResult<()> {
        for sql in script.all() {
            debug!(datasource = %self.source.name(), sql = %sql, "Applying schema statement");
        }
        self.source
            .execute_script(script)
            .await
            .map_err(|e| DbError::schema_sync(self.source.name(), intent, e.to_string()))?;
        report.statements.extend(script.all().cloned());
        Ok(())
    }

    async fn plan_table(&self, entity: &'a EntitySchemaDescriptor) -> DbResult<TablePlan<'a>> {
        let live = self
            .source
            .columns(entity.schema.as_deref(), &entity.table)
            .await?;

        if live.is_empty() {
            debug!(table = %entity.table, "Table missing, creating");
            let mut script = DdlScript::default();
            script.push(self.dialect.create_table_sql(entity, &self.set, self.force())?);
            return Ok(TablePlan {
                entity,
                outcome: EntityOutcome::Created,
                script,
            });
        }

        let diff = diff::table_diff(self.dialect, entity, &live)?;
        let live_fks = if self.dialect.capabilities().inline_foreign_keys {
            self.source
                .foreign_keys(entity.schema.as_deref(), &entity.table)
                .await?
        } else {
            Vec::new()
        };

        let script = if self.needs_rebuild(entity, &diff, &live_fks)? {
            debug!(table = %entity.table, "Rebuilding table");
            let kept: Vec<ColumnInfo> = if self.force() {
                live.iter()
                    .filter(|c| entity.field_by_column(&c.name).is_some())
                    .cloned()
                    .collect()
            } else {
                live.clone()
            };
            let include_fks = self.force() || !live_fks.is_empty();
            self.dialect
                .rebuild_table_sql(entity, &kept, &self.set, include_fks)?
        } else {
            self.alter_script(entity, &diff)?
        };

        let outcome = if script.is_empty() {
            EntityOutcome::Unchanged
        } else {
            EntityOutcome::Altered
        };
        Ok(TablePlan {
            entity,
            outcome,
            script,
        })
    }

    fn needs_rebuild(
        &self,
        entity: &EntitySchemaDescriptor,
        diff: &TableDiff<'_, '_>,
        live_fks: &[ForeignKeyInfo],
    ) -> DbResult<bool> {
        let caps = self.dialect.capabilities();
        if !diff.altered.is_empty()
            && (!caps.alter_column
                || (diff.has_data_change() && caps.data_change_strategy == DataChangeStrategy::Rebuild))
        {
            return Ok(true);
        }
        if !caps.alter_column {
            // ADD COLUMN takes neither a key, a NOT NULL column without a
            // default, nor a default evaluated per row
            for field in &diff.missing {
                let addable = match self.dialect.column_default(field)? {
                    Some(default) => is_constant_default(&default),
                    None => field.nullable,
                };
                if field.primary_key || !addable {
                    return Ok(true);
                }
            }
            if diff
                .abandoned
                .iter()
                .any(|column| self.force() || !column.nullable)
            {
                return Ok(true);
            }
        }
        if self.force() && caps.inline_foreign_keys {
            return Ok(!self.inline_keys_in_place(entity, live_fks)?);
        }
        Ok(false)
    }

    /// Whether the live foreign keys of an inline-key table are exactly the declared ones.
    fn inline_keys_in_place(
        &self,
        entity: &EntitySchemaDescriptor,
        live_fks: &[ForeignKeyInfo],
    ) -> DbResult<bool> {
        let desired = self.desired_foreign_keys(entity)?;
        Ok(desired.len() == live_fks.len()
            && desired.iter().all(|(fk, column, target)| {
                live_fks
                    .iter()
                    .any(|live| foreign_key_matches(live, fk, column, target))
            }))
    }

    /// Declared foreign keys that get constraints, with their column and target table.
    fn desired_foreign_keys(
        &self,
        entity: &EntitySchemaDescriptor,
    ) -> DbResult<Vec<(ForeignKeyDescriptor, String, String)>> {
        let mut desired = Vec::new();
        for fk in entity.foreign_keys() {
            let field = entity.require_field(&fk.field)?;
            if field.ignore_constraint {
                continue;
            }
            let (target_table, _) = self.set.resolve_target(&fk)?;
            let column = field.column.clone();
            desired.push((fk, column, target_table));
        }
        Ok(desired)
    }

    fn alter_script(
        &self,
        entity: &EntitySchemaDescriptor,
        diff: &TableDiff<'_, '_>,
    ) -> DbResult<DdlScript> {
        let mut script = DdlScript::default();
        let table = entity.schema_table_name();
        for field in &diff.missing {
            script.push(self.dialect.add_column_sql(entity, field)?);
        }
        for (field, changes) in &diff.altered {
            for sql in self.dialect.alter_column_sql(entity, field, changes)? {
                script.push(sql);
            }
        }
        for column in &diff.abandoned {
            if self.force() {
                script.push(self.dialect.drop_column_sql(&table, &column.name));
            } else if !column.nullable {
                script.push(self.dialect.alter_column_nullable_sql(&table, column)?);
            }
        }
        Ok(script)
    }

    /// Drop views that no longer fit, returning the views to create afterwards.
    async fn drop_stale_views<'v>(
        &self,
        views: &'v [ViewDescriptor],
        changed: &HashSet<&str>,
        report: &mut SyncReport,
    ) -> DbResult<Vec<&'v ViewDescriptor>> {
        let rebuild_on_change = self.dialect.capabilities().rebuild_views_on_table_change;
        let mut pending = Vec::new();
        for view in views {
            let live = self.source.columns(view.schema.as_deref(), &view.name).await?;
            if live.is_empty() {
                pending.push(view);
                continue;
            }
            let touched = view.entities().any(|name| changed.contains(name));
            if !diff::view_columns_match(view, &live) || (touched && rebuild_on_change) {
                debug!(view = %view.name, touched, "Dropping view for recreation");
                let mut script = DdlScript::default();
                script.push(self.dialect.drop_view_sql(view));
                self.apply(&script, &format!("drop view `{}`", view.name), report)
                    .await?;
                pending.push(view);
            }
        }
        Ok(pending)
    }

    /// Insert missing static rows and update rows whose values drifted.
    async fn sync_static_rows(
        &self,
        entity: &EntitySchemaDescriptor,
        report: &mut SyncReport,
    ) -> DbResult<()> {
        let intent = table_intent("populate", &entity.table);
        let fail = |e: DbError| DbError::schema_sync(self.source.name(), &intent, e.to_string());
        for row in &entity.static_rows {
            let (select, key) = self.dialect.static_row_select(entity, row)?;
            let found = self.source.fetch_rows(&select, &key).await.map_err(fail)?;
            let statement = match found.first() {
                None => Some(self.dialect.static_row_insert(entity, row)?),
                Some(live) if !self.static_row_matches(entity, row, live)? => {
                    Some(self.dialect.static_row_update(entity, row)?)
                }
                Some(_) => None,
            };
            if let Some((sql, params)) = statement {
                debug!(table = %entity.table, sql = %sql, "Upserting static row");
                self.source.execute_update(&sql, &params).await.map_err(fail)?;
                report.statements.push(sql);
                report.mark_altered(&entity.name);
            }
        }
        Ok(())
    }

    fn static_row_matches(
        &self,
        entity: &EntitySchemaDescriptor,
        row: &StaticRow,
        live: &crate::db::DbRow,
    ) -> DbResult<bool> {
        for (i, (field, expected)) in self.dialect.static_row_fields(entity, row)?.into_iter().enumerate() {
            let policy = self.dialect.type_policy(field.column_type)?;
            let stored = policy.to_param(&policy.extract(live, i)?)?;
            if !same_value(&stored.value, &expected.value) {
                debug!(table = %entity.table, field = %field.name, "Static row value drifted");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn sync_constraints(
        &self,
        plans: &[TablePlan<'a>],
        report: &mut SyncReport,
    ) -> DbResult<()> {
        let mut tables = Vec::with_capacity(plans.len());
        for plan in plans {
            let schema = plan.entity.schema.as_deref();
            tables.push(LiveConstraints {
                entity: plan.entity,
                indexes: self.source.indexes(schema, &plan.entity.table).await?,
                foreign_keys: self.source.foreign_keys(schema, &plan.entity.table).await?,
            });
        }

        // Drops for every table come before any add
        for live in &mut tables {
            let script = self.constraint_drops(live)?;
            if !script.is_empty() {
                self.apply(&script, &table_intent("alter", &live.entity.table), report)
                    .await?;
                report.mark_altered(&live.entity.name);
            }
        }
        for live in &tables {
            let script = self.constraint_adds(live)?;
            if !script.is_empty() {
                self.apply(&script, &table_intent("alter", &live.entity.table), report)
                    .await?;
                report.mark_altered(&live.entity.name);
            }
        }
        Ok(())
    }

    /// Drop live indexes and constraints nothing declares. Dropped entries are
    /// removed from `live`.
    fn constraint_drops(&self, live: &mut LiveConstraints<'_>) -> DbResult<DdlScript> {
        let entity = live.entity;
        let inline_keys = self.dialect.capabilities().inline_foreign_keys;
        let desired_fks = self.desired_foreign_keys(entity)?;
        let mut script = DdlScript::default();

        // Indexes named after foreign keys back those keys
        let mut key_names: HashSet<String> = desired_fks
            .iter()
            .map(|(fk, _, _)| fk.name.to_lowercase())
            .collect();
        key_names.extend(
            live.foreign_keys
                .iter()
                .filter_map(|fk| fk.name.as_ref().map(|n| n.to_lowercase())),
        );

        let mut declared = Vec::new();
        for unique in &entity.unique_constraints {
            declared.push((field_columns(entity, &unique.fields)?, true));
        }
        for index in &entity.indexes {
            declared.push((field_columns(entity, &index.fields)?, index.unique));
        }

        let mut kept = Vec::with_capacity(live.indexes.len());
        for index in live.indexes.drain(..) {
            let lower = index.name.to_lowercase();
            let managed = !index.primary
                && !lower.starts_with("sqlite_autoindex")
                && !key_names.contains(&lower);
            let matched = declared
                .iter()
                .any(|(columns, unique)| index_matches(&index, columns, *unique));
            if !managed || matched {
                kept.push(index);
                continue;
            }
            let is_declared_index = entity
                .indexes
                .iter()
                .any(|ix| ix.name.eq_ignore_ascii_case(&index.name));
            let schema = entity.schema.as_deref();
            debug!(table = %entity.table, index = %index.name, "Dropping undeclared index");
            script.push(if index.unique && !is_declared_index {
                self.dialect.drop_unique_sql(schema, &entity.table, &index.name)
            } else {
                self.dialect.drop_index_sql(schema, &entity.table, &index.name)
            });
        }
        live.indexes = kept;

        if self.force() && !inline_keys {
            let table = entity.schema_table_name();
            let mut kept = Vec::with_capacity(live.foreign_keys.len());
            for fk in live.foreign_keys.drain(..) {
                let matched = desired_fks
                    .iter()
                    .any(|(declared, column, target)| foreign_key_matches(&fk, declared, column, target));
                if !matched {
                    if let Some(name) = &fk.name {
                        debug!(table = %entity.table, constraint = %name, "Dropping undeclared foreign key");
                        script.push(self.dialect.drop_foreign_key_sql(&table, name)?);
                        continue;
                    }
                }
                kept.push(fk);
            }
            live.foreign_keys = kept;
        }
        Ok(script)
    }

    fn constraint_adds(&self, live: &LiveConstraints<'_>) -> DbResult<DdlScript> {
        let entity = live.entity;
        let mut script = DdlScript::default();
        for unique in &entity.unique_constraints {
            let columns = field_columns(entity, &unique.fields)?;
            if !live.indexes.iter().any(|ix| index_matches(ix, &columns, true)) {
                script.push(self.dialect.add_unique_sql(entity, unique)?);
            }
        }
        for index in &entity.indexes {
            let columns = field_columns(entity, &index.fields)?;
            if !live.indexes.iter().any(|ix| index_matches(ix, &columns, index.unique)) {
                script.push(self.dialect.create_index_sql(entity, index)?);
            }
        }
        if self.force() && !self.dialect.capabilities().inline_foreign_keys {
            for (fk, column, target) in self.desired_foreign_keys(entity)? {
                let present = live
                    .foreign_keys
                    .iter()
                    .any(|live| foreign_key_matches(live, &fk, &column, &target));
                if !present {
                    script.push(self.dialect.add_foreign_key_sql(entity, &fk, &self.set)?);
                }
            }
        }
        Ok(script)
    }
}

/// Compare a stored value with the one a static row declares. Numbers compare by value.
fn same_value(stored: &SqlValue, expected: &SqlValue) -> bool {
    if stored == expected {
        return true;
    }
    let numeric = |v: &SqlValue| {
        matches!(
            v,
            SqlValue::Short(_)
                | SqlValue::Int(_)
                | SqlValue::Long(_)
                | SqlValue::Float(_)
                | SqlValue::Double(_)
                | SqlValue::Decimal(_)
        )
    };
    if numeric(stored) && numeric(expected) {
        return match (stored.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < 1e-9,
            _ => false,
        };
    }
    match (stored, expected) {
        (SqlValue::Text(a), SqlValue::Text(b)) => a.trim_end() == b.trim_end(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_value_compares_numbers_by_value() {
        assert!(same_value(
            &SqlValue::Decimal("1.50".into()),
            &SqlValue::Decimal("1.5".into())
        ));
        assert!(same_value(&SqlValue::Double(2.0), &SqlValue::Long(2)));
        assert!(!same_value(&SqlValue::Text("1".into()), &SqlValue::Long(1)));
    }

    #[test]
    fn test_same_value_ignores_char_padding() {
        assert!(same_value(
            &SqlValue::Text("Y ".into()),
            &SqlValue::Text("Y".into())
        ));
        assert!(!same_value(&SqlValue::Null, &SqlValue::Text("Y".into())));
    }

    #[test]
    fn test_report_outcomes() {
        let mut report = SyncReport {
            entities: vec![
                ("a".into(), EntityOutcome::Created),
                ("b".into(), EntityOutcome::Unchanged),
            ],
            statements: Vec::new(),
        };
        assert!(report.is_noop());
        report.mark_altered("a");
        report.mark_altered("b");
        assert_eq!(report.outcome("a"), Some(EntityOutcome::Created));
        assert_eq!(report.outcome("b"), Some(EntityOutcome::Altered));
        assert_eq!(report.outcome("c"), None);
    }
}
