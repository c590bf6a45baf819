//! DML generation: entity statements, static rows, native queries and procedure calls.

use super::{CallableOutput, Dialect};
use crate::criteria::{CriteriaTranslator, TranslationContext};
use crate::error::{DbError, DbResult};
use crate::models::{
    CallableDescriptor, ColumnType, EntitySchemaDescriptor, FieldSchemaDescriptor, NativeFilter,
    NativeQuery, Operand, Operator, Restriction, SqlParameter, StaticRow,
};
use std::sync::Arc;

/// Where the value of a statement parameter comes from at bind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSource {
    /// A field of the bound record
    Field(String),
    /// The primary key supplied with the call
    Id,
    /// The expected (old) version supplied with the call
    Version,
}

/// SQL text of an entity statement plus the recipe for its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementTemplate {
    pub sql: Arc<str>,
    pub params: Vec<(ParamSource, ColumnType)>,
    /// Fields read back from each result row, in select order
    pub result_fields: Vec<(String, ColumnType)>,
}

impl StatementTemplate {
    fn new(sql: String) -> Self {
        Self {
            sql: Arc::from(sql),
            params: Vec::new(),
            result_fields: Vec::new(),
        }
    }
}

/// SQL needed to run a stored procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct CallText {
    pub sql: Arc<str>,
    /// Parameter positions (1-based) bound to the call's placeholders, in order
    pub bound: Vec<usize>,
    /// Statements run on the same connection before the call, each binding one parameter position
    pub prelude: Vec<(String, usize)>,
    /// Select reading outputs back when they are not returned by the call itself
    pub fetch_sql: Option<String>,
    /// Output parameter positions in the order their values come back
    pub outputs: Vec<usize>,
}

/// Hands out placeholders numbered from 1.
struct Placeholders<'d> {
    dialect: &'d Dialect,
    next: usize,
}

impl<'d> Placeholders<'d> {
    fn new(dialect: &'d Dialect) -> Self {
        Self { dialect, next: 0 }
    }

    fn next(&mut self) -> String {
        self.next += 1;
        self.dialect.placeholder(self.next)
    }
}

impl Dialect {
    /// `INSERT INTO t (all columns) VALUES (..)`, values taken from the record.
    pub fn insert_template(&self, entity: &EntitySchemaDescriptor) -> StatementTemplate {
        let mut ph = Placeholders::new(self);
        let columns: Vec<&str> = entity.fields.iter().map(|f| f.column.as_str()).collect();
        let values: Vec<String> = entity.fields.iter().map(|_| ph.next()).collect();
        let mut template = StatementTemplate::new(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            entity.schema_table_name(),
            columns.join(", "),
            values.join(", ")
        ));
        template.params = entity
            .fields
            .iter()
            .map(|f| (ParamSource::Field(f.name.clone()), f.column_type))
            .collect();
        template
    }

    /// Select all columns of one row by primary key, optionally also matching the version.
    pub fn find_template(
        &self,
        entity: &EntitySchemaDescriptor,
        with_version: bool,
    ) -> DbResult<StatementTemplate> {
        let mut ph = Placeholders::new(self);
        let columns: Vec<String> = entity
            .fields
            .iter()
            .map(|f| format!("{}.{}", entity.alias, f.column))
            .collect();
        let (where_sql, params) = self.key_condition(entity, with_version, Some(&entity.alias), &mut ph)?;
        let mut template = StatementTemplate::new(format!(
            "SELECT {} FROM {} {} WHERE {}",
            columns.join(", "),
            entity.schema_table_name(),
            entity.alias,
            where_sql
        ));
        template.params = params;
        template.result_fields = entity
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.column_type))
            .collect();
        Ok(template)
    }

    /// Update every non-key column by primary key, optionally guarded by the old version.
    pub fn update_template(
        &self,
        entity: &EntitySchemaDescriptor,
        with_version: bool,
    ) -> DbResult<StatementTemplate> {
        let mut ph = Placeholders::new(self);
        let mut params = Vec::new();
        let mut sets = Vec::new();
        for field in entity.fields.iter().filter(|f| !f.primary_key) {
            sets.push(format!("{} = {}", field.column, ph.next()));
            params.push((ParamSource::Field(field.name.clone()), field.column_type));
        }
        if sets.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Entity '{}' has no columns to update",
                entity.name
            )));
        }
        let (where_sql, key_params) = self.key_condition(entity, with_version, None, &mut ph)?;
        params.extend(key_params);
        let mut template = StatementTemplate::new(format!(
            "UPDATE {} SET {} WHERE {}",
            entity.schema_table_name(),
            sets.join(", "),
            where_sql
        ));
        template.params = params;
        Ok(template)
    }

    pub fn delete_template(
        &self,
        entity: &EntitySchemaDescriptor,
        with_version: bool,
    ) -> DbResult<StatementTemplate> {
        let mut ph = Placeholders::new(self);
        let (where_sql, params) = self.key_condition(entity, with_version, None, &mut ph)?;
        let mut template = StatementTemplate::new(format!(
            "DELETE FROM {} WHERE {}",
            entity.schema_table_name(),
            where_sql
        ));
        template.params = params;
        Ok(template)
    }

    fn key_condition(
        &self,
        entity: &EntitySchemaDescriptor,
        with_version: bool,
        alias: Option<&str>,
        ph: &mut Placeholders<'_>,
    ) -> DbResult<(String, Vec<(ParamSource, ColumnType)>)> {
        let qualify = |column: &str| match alias {
            Some(alias) => format!("{}.{}", alias, column),
            None => column.to_string(),
        };
        let id = require_id(entity)?;
        let mut sql = format!("{} = {}", qualify(&id.column), ph.next());
        let mut params = vec![(ParamSource::Id, id.column_type)];
        if with_version {
            let version = entity.version().ok_or_else(|| {
                DbError::invalid_input(format!("Entity '{}' has no version field", entity.name))
            })?;
            sql.push_str(&format!(" AND {} = {}", qualify(&version.column), ph.next()));
            params.push((ParamSource::Version, version.column_type));
        }
        Ok((sql, params))
    }

    /// `SELECT COUNT(*)` over an entity, optionally restricted.
    pub fn count_sql(
        &self,
        entity: &EntitySchemaDescriptor,
        restriction: Option<&Restriction>,
        params: &mut Vec<SqlParameter>,
    ) -> DbResult<String> {
        let mut sql = format!("SELECT COUNT(*) FROM {} {}", entity.schema_table_name(), entity.alias);
        if let Some(restriction) = restriction {
            sql.push_str(" WHERE ");
            CriteriaTranslator::new(self).translate(
                restriction,
                &TranslationContext::entity(entity),
                &mut sql,
                params,
            )?;
        }
        Ok(sql)
    }

    /// Select the columns a static row sets, by its primary key.
    pub fn static_row_select(
        &self,
        entity: &EntitySchemaDescriptor,
        row: &StaticRow,
    ) -> DbResult<(String, Vec<SqlParameter>)> {
        let id = require_id(entity)?;
        let fields = self.static_row_fields(entity, row)?;
        let columns: Vec<&str> = fields.iter().map(|(f, _)| f.column.as_str()).collect();
        let key = static_row_key(entity, id, row, self)?;
        Ok((
            format!(
                "SELECT {} FROM {} WHERE {} = {}",
                columns.join(", "),
                entity.schema_table_name(),
                id.column,
                self.placeholder(1)
            ),
            vec![key],
        ))
    }

    pub fn static_row_insert(
        &self,
        entity: &EntitySchemaDescriptor,
        row: &StaticRow,
    ) -> DbResult<(String, Vec<SqlParameter>)> {
        require_id(entity)?;
        let mut ph = Placeholders::new(self);
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut params = Vec::new();
        let fields = self.static_row_fields(entity, row)?;
        for (field, param) in fields {
            columns.push(field.column.as_str());
            values.push(ph.next());
            params.push(param);
        }
        // NOT NULL columns the row leaves out get their default
        for field in entity
            .fields
            .iter()
            .filter(|f| !f.nullable && row.value(&f.name).is_none())
        {
            let policy = self.type_policy(field.column_type)?;
            if let Some(default) = policy.default_value(field.declared_default()) {
                columns.push(field.column.as_str());
                values.push(default);
            }
        }
        Ok((
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                entity.schema_table_name(),
                columns.join(", "),
                values.join(", ")
            ),
            params,
        ))
    }

    pub fn static_row_update(
        &self,
        entity: &EntitySchemaDescriptor,
        row: &StaticRow,
    ) -> DbResult<(String, Vec<SqlParameter>)> {
        let id = require_id(entity)?;
        let mut ph = Placeholders::new(self);
        let mut sets = Vec::new();
        let mut params = Vec::new();
        for (field, param) in self.static_row_fields(entity, row)? {
            if field.primary_key {
                continue;
            }
            sets.push(format!("{} = {}", field.column, ph.next()));
            params.push(param);
        }
        let where_sql = format!("{} = {}", id.column, ph.next());
        params.push(static_row_key(entity, id, row, self)?);
        Ok((
            format!(
                "UPDATE {} SET {} WHERE {}",
                entity.schema_table_name(),
                sets.join(", "),
                where_sql
            ),
            params,
        ))
    }

    /// Fields a static row sets, in declared field order, with their coerced values.
    pub fn static_row_fields<'e>(
        &self,
        entity: &'e EntitySchemaDescriptor,
        row: &StaticRow,
    ) -> DbResult<Vec<(&'e FieldSchemaDescriptor, SqlParameter)>> {
        for (name, _) in &row.values {
            entity.require_field(name)?;
        }
        let mut fields = Vec::new();
        for field in &entity.fields {
            if let Some(value) = row.value(&field.name) {
                let param = self.type_policy(field.column_type)?.to_param(value)?;
                fields.push((field, param));
            }
        }
        Ok(fields)
    }

    /// Render a native query with inline literals and a LIMIT/OFFSET suffix.
    pub fn native_query_sql(&self, query: &NativeQuery) -> DbResult<String> {
        if query.columns.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Native query on '{}' selects no columns",
                query.table
            )));
        }
        let alias = |table: &str| {
            query
                .alias_of(table)
                .ok_or_else(|| DbError::unknown_reference("table", table))
        };

        let mut columns = Vec::with_capacity(query.columns.len());
        for column in &query.columns {
            columns.push(format!("{}.{}", alias(&column.table)?, column.column));
        }
        let mut sql = format!(
            "SELECT {}{} FROM {} T1",
            if query.distinct { "DISTINCT " } else { "" },
            columns.join(", "),
            query.qualified_table(&query.table)
        );

        for join in &query.joins {
            sql.push_str(&format!(
                " {} {} {} ON {}.{} = {}.{}",
                join.join_type.keyword(),
                query.qualified_table(&join.table),
                alias(&join.table)?,
                alias(&join.table)?,
                join.column,
                alias(&join.to_table)?,
                join.to_column
            ));
        }

        if !query.filters.is_empty() {
            let mut children = Vec::with_capacity(query.filters.len());
            for filter in &query.filters {
                children.push(filter_restriction(filter, &alias(&filter.table)?)?);
            }
            sql.push_str(" WHERE ");
            CriteriaTranslator::new(self).translate_native(
                &Restriction::and(children),
                &TranslationContext::none(),
                &mut sql,
            )?;
        }

        sql.push_str(&self.limit_clause(query.limit, query.offset));
        Ok(sql)
    }

    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        use crate::models::DatabaseType;

        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (None, Some(offset)) => match self.database_type() {
                DatabaseType::PostgreSQL => format!(" OFFSET {}", offset),
                DatabaseType::MySQL => format!(" LIMIT {} OFFSET {}", u64::MAX, offset),
                DatabaseType::SQLite => format!(" LIMIT -1 OFFSET {}", offset),
            },
        }
    }

    /// Build the call text for a procedure on this dialect.
    pub fn call_text(&self, callable: &CallableDescriptor) -> DbResult<CallText> {
        let procedure = callable.qualified_procedure();
        match self.capabilities().callable_output {
            CallableOutput::Unsupported => Err(DbError::unsupported(
                format!("stored procedure '{}'", callable.name),
                self.name(),
            )),
            CallableOutput::ResultRow => {
                let mut ph = Placeholders::new(self);
                let slots: Vec<String> = callable.params.iter().map(|_| ph.next()).collect();
                let verb = if callable.return_value.is_some() { "SELECT" } else { "CALL" };
                Ok(CallText {
                    sql: Arc::from(format!("{} {}({})", verb, procedure, slots.join(", "))),
                    bound: (1..=callable.params.len()).collect(),
                    prelude: Vec::new(),
                    fetch_sql: None,
                    outputs: callable.outputs().map(|(position, _)| position).collect(),
                })
            }
            CallableOutput::SessionVariables => {
                let mut slots = Vec::with_capacity(callable.params.len());
                let mut bound = Vec::new();
                let mut prelude = Vec::new();
                let mut variables = Vec::new();
                for (i, param) in callable.params.iter().enumerate() {
                    let position = i + 1;
                    if param.direction.is_output() {
                        let variable = format!("@p{}", position);
                        if param.direction.is_input() {
                            prelude.push((format!("SET {} = ?", variable), position));
                        }
                        slots.push(variable.clone());
                        variables.push(variable);
                    } else {
                        slots.push("?".to_string());
                        bound.push(position);
                    }
                }
                let (sql, fetch_sql) = if callable.return_value.is_some() {
                    (format!("SELECT {}({})", procedure, slots.join(", ")), None)
                } else {
                    let fetch = (!variables.is_empty())
                        .then(|| format!("SELECT {}", variables.join(", ")));
                    (format!("CALL {}({})", procedure, slots.join(", ")), fetch)
                };
                Ok(CallText {
                    sql: Arc::from(sql),
                    bound,
                    prelude,
                    fetch_sql,
                    outputs: callable.outputs().map(|(position, _)| position).collect(),
                })
            }
        }
    }
}

fn require_id(entity: &EntitySchemaDescriptor) -> DbResult<&FieldSchemaDescriptor> {
    entity.id_field().ok_or_else(|| {
        DbError::invalid_input(format!("Entity '{}' has no primary key", entity.name))
    })
}

fn static_row_key(
    entity: &EntitySchemaDescriptor,
    id: &FieldSchemaDescriptor,
    row: &StaticRow,
    dialect: &Dialect,
) -> DbResult<SqlParameter> {
    let value = row.value(&id.name).ok_or_else(|| {
        DbError::invalid_input(format!(
            "Static row of '{}' has no value for key '{}'",
            entity.name, id.name
        ))
    })?;
    dialect.type_policy(id.column_type)?.to_param(value)
}

/// Restriction equivalent of a native filter, on the table alias.
fn filter_restriction(filter: &NativeFilter, alias: &str) -> DbResult<Restriction> {
    let field = format!("{}.{}", alias, filter.column);
    let wrong_arity = || {
        DbError::invalid_input(format!(
            "Filter {} on '{}' has {} value(s)",
            filter.op,
            filter.column,
            filter.values.len()
        ))
    };
    Ok(match filter.op {
        Operator::IsNull | Operator::IsNotNull => Restriction::Single { op: filter.op, field },
        Operator::Between | Operator::NotBetween => match filter.values.as_slice() {
            [lower, upper] => Restriction::Range {
                op: filter.op,
                field,
                lower: Operand::Value(lower.clone()),
                upper: Operand::Value(upper.clone()),
            },
            _ => return Err(wrong_arity()),
        },
        Operator::Amongst | Operator::NotAmongst => Restriction::Multiple {
            op: filter.op,
            field,
            values: filter.values.clone(),
        },
        Operator::And | Operator::Or | Operator::Not => {
            return Err(DbError::invalid_input(format!(
                "Operator {} cannot filter a column",
                filter.op
            )));
        }
        op => match filter.values.as_slice() {
            [value] => Restriction::binary(op, field, Operand::Value(value.clone())),
            _ => return Err(wrong_arity()),
        },
    })
}
