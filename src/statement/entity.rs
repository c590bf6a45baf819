//! Per-entity pools of prepared CRUD statements.

use super::once::ComputeOnce;
use super::pool::{Borrowed, ObjectPool, PoolLimits, PooledObjectFactory};
use crate::db::{DbRow, SqlDataSource};
use crate::dialect::{DataTypePolicy, Dialect, ParamSource, StatementTemplate};
use crate::error::{DbError, DbResult};
use crate::models::{EntitySchemaDescriptor, FieldAccess, Restriction, SqlParameter, SqlValue};
use std::sync::Arc;
use tracing::debug;

/// The statements pooled for every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementType {
    Insert,
    FindByPk,
    FindByPkVersion,
    UpdateByPk,
    UpdateByPkVersion,
    DeleteByPk,
    DeleteByPkVersion,
}

impl StatementType {
    pub const ALL: [StatementType; 7] = [
        StatementType::Insert,
        StatementType::FindByPk,
        StatementType::FindByPkVersion,
        StatementType::UpdateByPk,
        StatementType::UpdateByPkVersion,
        StatementType::DeleteByPk,
        StatementType::DeleteByPkVersion,
    ];

    /// Whether the statement also matches the expected version.
    pub fn checks_version(&self) -> bool {
        matches!(
            self,
            Self::FindByPkVersion | Self::UpdateByPkVersion | Self::DeleteByPkVersion
        )
    }

    fn index(&self) -> usize {
        *self as usize
    }

    fn template(&self, dialect: &Dialect, entity: &EntitySchemaDescriptor) -> DbResult<StatementTemplate> {
        let version = self.checks_version();
        match self {
            Self::Insert => Ok(dialect.insert_template(entity)),
            Self::FindByPk | Self::FindByPkVersion => dialect.find_template(entity, version),
            Self::UpdateByPk | Self::UpdateByPkVersion => dialect.update_template(entity, version),
            Self::DeleteByPk | Self::DeleteByPkVersion => dialect.delete_template(entity, version),
        }
    }
}

impl std::fmt::Display for StatementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Values bound into an entity statement.
///
/// Without an explicit `id`, the key is read from the record's primary key field.
#[derive(Clone, Copy, Default)]
pub struct StatementArgs<'a> {
    pub record: Option<&'a dyn FieldAccess>,
    pub id: Option<&'a SqlValue>,
    pub version: Option<&'a SqlValue>,
}

impl<'a> StatementArgs<'a> {
    pub fn record(record: &'a dyn FieldAccess) -> Self {
        Self {
            record: Some(record),
            ..Default::default()
        }
    }

    pub fn id(id: &'a SqlValue) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &'a SqlValue) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_version(mut self, version: &'a SqlValue) -> Self {
        self.version = Some(version);
        self
    }
}

struct ParamSlot {
    source: ParamSource,
    policy: &'static DataTypePolicy,
    value: SqlParameter,
}

/// A statement with its parameter slots bound for one borrower.
pub struct PooledStatement {
    sql: Arc<str>,
    slots: Vec<ParamSlot>,
    result_fields: Arc<[(String, &'static DataTypePolicy)]>,
}

impl PooledStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameter values, in placeholder order.
    pub fn params(&self) -> Vec<SqlParameter> {
        self.slots.iter().map(|slot| slot.value.clone()).collect()
    }

    /// Copy one result row into a record, field by field.
    pub fn read_row(&self, row: &DbRow, target: &mut dyn FieldAccess) -> DbResult<()> {
        for (i, (field, policy)) in self.result_fields.iter().enumerate() {
            target.write_field(field, policy.extract(row, i)?)?;
        }
        Ok(())
    }
}

struct StatementFactory {
    entity: String,
    statement_type: StatementType,
    sql: Arc<str>,
    params: Vec<(ParamSource, &'static DataTypePolicy)>,
    result_fields: Arc<[(String, &'static DataTypePolicy)]>,
    id_field: Option<String>,
}

impl StatementFactory {
    fn new(
        dialect: &'static Dialect,
        entity: &EntitySchemaDescriptor,
        statement_type: StatementType,
    ) -> DbResult<Self> {
        let template = statement_type.template(dialect, entity)?;
        let params = template
            .params
            .iter()
            .map(|(source, column_type)| Ok((source.clone(), dialect.type_policy(*column_type)?)))
            .collect::<DbResult<Vec<_>>>()?;
        let result_fields = template
            .result_fields
            .iter()
            .map(|(field, column_type)| Ok((field.clone(), dialect.type_policy(*column_type)?)))
            .collect::<DbResult<Vec<_>>>()?;
        debug!(entity = %entity.name, statement = %statement_type, sql = %template.sql, "Prepared statement text");
        Ok(Self {
            entity: entity.name.clone(),
            statement_type,
            sql: template.sql,
            params,
            result_fields: result_fields.into(),
            id_field: entity.id_field().map(|f| f.name.clone()),
        })
    }

    fn value_for(&self, source: &ParamSource, args: &StatementArgs<'_>) -> DbResult<SqlValue> {
        let missing = |what: &str| {
            DbError::invalid_input(format!(
                "{} statement of '{}' needs {}",
                self.statement_type, self.entity, what
            ))
        };
        match source {
            ParamSource::Field(name) => args
                .record
                .ok_or_else(|| missing("a record"))?
                .read_field(name),
            ParamSource::Id => match (args.id, args.record, &self.id_field) {
                (Some(id), _, _) => Ok(id.clone()),
                (None, Some(record), Some(field)) => record.read_field(field),
                _ => Err(missing("a primary key value")),
            },
            ParamSource::Version => args
                .version
                .cloned()
                .ok_or_else(|| missing("the expected version")),
        }
    }
}

impl PooledObjectFactory for StatementFactory {
    type Object = PooledStatement;
    type Args<'a> = StatementArgs<'a>;

    fn create(&self) -> DbResult<PooledStatement> {
        Ok(PooledStatement {
            sql: Arc::clone(&self.sql),
            slots: self
                .params
                .iter()
                .map(|(source, policy)| ParamSlot {
                    source: source.clone(),
                    policy: *policy,
                    value: policy.output_param(),
                })
                .collect(),
            result_fields: Arc::clone(&self.result_fields),
        })
    }

    fn on_borrow(&self, statement: &mut PooledStatement, args: &StatementArgs<'_>) -> DbResult<()> {
        for slot in &mut statement.slots {
            let value = self.value_for(&slot.source, args)?;
            slot.value = slot.policy.to_param(&value)?;
        }
        Ok(())
    }

    fn validate(&self, statement: &PooledStatement) -> bool {
        Arc::ptr_eq(&statement.sql, &self.sql) && statement.slots.len() == self.params.len()
    }
}

/// Pools of the CRUD statements of one entity on one data source.
///
/// Each pool, with its SQL text and result fields, is built on first use.
pub struct SqlStatementPools {
    source: Arc<SqlDataSource>,
    entity: Arc<EntitySchemaDescriptor>,
    limits: PoolLimits,
    pools: [ComputeOnce<ObjectPool<StatementFactory>>; 7],
}

impl std::fmt::Debug for SqlStatementPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStatementPools")
            .field("datasource", &self.source.name())
            .field("entity", &self.entity.name)
            .field("limits", &self.limits)
            .finish()
    }
}

impl SqlStatementPools {
    /// Pools sized from the data source's pool options.
    pub fn new(source: Arc<SqlDataSource>, entity: Arc<EntitySchemaDescriptor>) -> DbResult<Self> {
        let options = source.config().pool_options();
        let limits = PoolLimits::new(
            options.statement_pool_min_or_default(),
            options.statement_pool_max_or_default(),
            options.statement_borrow_timeout_or_default(),
        );
        Self::with_limits(source, entity, limits)
    }

    pub fn with_limits(
        source: Arc<SqlDataSource>,
        entity: Arc<EntitySchemaDescriptor>,
        limits: PoolLimits,
    ) -> DbResult<Self> {
        entity.validate()?;
        Ok(Self {
            source,
            entity,
            limits,
            pools: Default::default(),
        })
    }

    pub fn entity(&self) -> &EntitySchemaDescriptor {
        &self.entity
    }

    fn pool(&self, statement_type: StatementType) -> DbResult<&ObjectPool<StatementFactory>> {
        self.pools[statement_type.index()].get_or_try_init(|| {
            let factory = StatementFactory::new(self.source.dialect(), &self.entity, statement_type)?;
            let name = format!("{}:{}:{}", self.source.name(), self.entity.name, statement_type);
            let pool = ObjectPool::new(name, factory, self.limits);
            pool.initialize()?;
            Ok(pool)
        })
    }

    /// SQL text of a statement type.
    pub fn sql(&self, statement_type: StatementType) -> DbResult<Arc<str>> {
        Ok(Arc::clone(&self.pool(statement_type)?.factory().sql))
    }

    pub async fn borrow(
        &self,
        statement_type: StatementType,
        args: &StatementArgs<'_>,
    ) -> DbResult<Borrowed<PooledStatement>> {
        self.pool(statement_type)?.borrow(args).await
    }

    pub fn restore(&self, statement_type: StatementType, statement: Borrowed<PooledStatement>) -> DbResult<()> {
        self.pool(statement_type)?.restore(statement)
    }

    /// Run an insert, update or delete and return the affected row count.
    pub async fn execute(&self, statement_type: StatementType, args: &StatementArgs<'_>) -> DbResult<u64> {
        let statement = self.borrow(statement_type, args).await?;
        let result = self
            .source
            .execute_update(statement.sql(), &statement.params())
            .await;
        self.pool(statement_type)?.restore_after(statement, result)
    }

    pub async fn insert(&self, record: &dyn FieldAccess) -> DbResult<u64> {
        self.execute(StatementType::Insert, &StatementArgs::record(record))
            .await
    }

    /// Update by key, guarded by the expected version when one is given.
    pub async fn update(&self, record: &dyn FieldAccess, expected_version: Option<&SqlValue>) -> DbResult<u64> {
        match expected_version {
            Some(version) => {
                let args = StatementArgs::record(record).with_version(version);
                self.execute(StatementType::UpdateByPkVersion, &args).await
            }
            None => {
                self.execute(StatementType::UpdateByPk, &StatementArgs::record(record))
                    .await
            }
        }
    }

    pub async fn delete(&self, id: &SqlValue, expected_version: Option<&SqlValue>) -> DbResult<u64> {
        match expected_version {
            Some(version) => {
                let args = StatementArgs::id(id).with_version(version);
                self.execute(StatementType::DeleteByPkVersion, &args).await
            }
            None => self.execute(StatementType::DeleteByPk, &StatementArgs::id(id)).await,
        }
    }

    /// Load one row by key into `target`. Returns `false` when no row matches.
    pub async fn find(
        &self,
        id: &SqlValue,
        expected_version: Option<&SqlValue>,
        target: &mut dyn FieldAccess,
    ) -> DbResult<bool> {
        let (statement_type, args) = match expected_version {
            Some(version) => (
                StatementType::FindByPkVersion,
                StatementArgs::id(id).with_version(version),
            ),
            None => (StatementType::FindByPk, StatementArgs::id(id)),
        };
        let statement = self.borrow(statement_type, &args).await?;
        let found = match self
            .source
            .fetch_rows(statement.sql(), &statement.params())
            .await
        {
            Ok(rows) => match rows.first() {
                Some(row) => statement.read_row(row, target).map(|()| true),
                None => Ok(false),
            },
            Err(e) => Err(e),
        };
        self.pool(statement_type)?.restore_after(statement, found)
    }

    /// Count the entity's rows matching an optional restriction.
    pub async fn count(&self, restriction: Option<&Restriction>) -> DbResult<u64> {
        let mut params = Vec::new();
        let sql = self
            .source
            .dialect()
            .count_sql(&self.entity, restriction, &mut params)?;
        let rows = self.source.fetch_rows(&sql, &params).await?;
        let total = rows
            .first()
            .and_then(|row| row.to_values().first().and_then(SqlValue::as_i64))
            .ok_or_else(|| DbError::internal(format!("Count of '{}' returned no value", self.entity.name)))?;
        Ok(total.max(0) as u64)
    }

    /// Pre-create the minimum number of statements for every type.
    pub fn initialize(&self) -> DbResult<()> {
        for statement_type in StatementType::ALL {
            self.pool(statement_type)?;
        }
        Ok(())
    }

    pub fn terminate(&self) -> DbResult<()> {
        for cell in &self.pools {
            if let Some(pool) = cell.get() {
                pool.terminate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnType, FieldSchemaDescriptor, Record};

    fn entity() -> EntitySchemaDescriptor {
        EntitySchemaDescriptor::new("customer", "CUSTOMER")
            .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
            .with_field(FieldSchemaDescriptor::new("name", ColumnType::String, 2))
            .with_field(FieldSchemaDescriptor::new("version", ColumnType::Integer, 3))
            .with_version_field("version")
    }

    fn factory(statement_type: StatementType) -> StatementFactory {
        StatementFactory::new(Dialect::sqlite(), &entity(), statement_type).unwrap()
    }

    #[test]
    fn test_statement_types_cover_all_slots() {
        for (i, statement_type) in StatementType::ALL.iter().enumerate() {
            assert_eq!(statement_type.index(), i);
        }
        assert!(StatementType::DeleteByPkVersion.checks_version());
        assert!(!StatementType::Insert.checks_version());
    }

    #[test]
    fn test_bind_reads_record_fields() {
        let factory = factory(StatementType::UpdateByPkVersion);
        let record = Record::new().with("id", 7i64).with("name", "Ada").with("version", 2i32);
        let expected = SqlValue::Int(1);
        let mut statement = factory.create().unwrap();
        factory
            .on_borrow(&mut statement, &StatementArgs::record(&record).with_version(&expected))
            .unwrap();
        let values: Vec<SqlValue> = statement.params().into_iter().map(|p| p.value).collect();
        assert_eq!(
            values,
            vec![
                SqlValue::Text("Ada".into()),
                SqlValue::Int(2),
                SqlValue::Long(7),
                SqlValue::Int(1)
            ]
        );
    }

    #[test]
    fn test_bind_requires_version_for_guarded_statements() {
        let factory = factory(StatementType::DeleteByPkVersion);
        let id = SqlValue::Long(1);
        let mut statement = factory.create().unwrap();
        let err = factory
            .on_borrow(&mut statement, &StatementArgs::id(&id))
            .unwrap_err();
        assert!(err.to_string().contains("expected version"));
    }
}
