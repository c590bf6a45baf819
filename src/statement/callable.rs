//! Pools of stored-procedure calls, keyed by procedure name.

use super::once::ComputeOnce;
use super::pool::{Borrowed, ObjectPool, PoolLimits, PooledObjectFactory};
use crate::db::{CallRows, DbRow, SqlDataSource};
use crate::dialect::{CallText, DataTypePolicy, Dialect};
use crate::error::{DbError, DbResult};
use crate::models::{
    CallableDescriptor, FieldAccess, Record, ResultAddressing, ResultDescriptor, SqlParameter,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct CallSlot {
    field: String,
    input: bool,
    policy: &'static DataTypePolicy,
    value: SqlParameter,
}

/// A procedure call with its inputs bound from a procedure object.
pub struct PooledCallableStatement {
    call: Arc<CallText>,
    slots: Vec<CallSlot>,
    returns: Option<(String, &'static DataTypePolicy)>,
    results: Arc<HashMap<String, ResultDescriptor>>,
}

impl PooledCallableStatement {
    pub fn call(&self) -> &CallText {
        &self.call
    }

    /// One value per procedure parameter; output-only slots hold typed NULLs.
    pub fn params(&self) -> Vec<SqlParameter> {
        self.slots.iter().map(|slot| slot.value.clone()).collect()
    }

    pub fn result(&self, result_type: &str) -> Option<&ResultDescriptor> {
        self.results.get(result_type)
    }
}

struct CallableFactory {
    descriptor: Arc<CallableDescriptor>,
    call: Arc<CallText>,
    policies: Vec<&'static DataTypePolicy>,
    returns: Option<(String, &'static DataTypePolicy)>,
    results: Arc<HashMap<String, ResultDescriptor>>,
}

impl CallableFactory {
    fn new(dialect: &'static Dialect, descriptor: Arc<CallableDescriptor>) -> DbResult<Self> {
        let call = dialect.call_text(&descriptor)?;
        let policies = descriptor
            .params
            .iter()
            .map(|param| dialect.type_policy(param.column_type))
            .collect::<DbResult<Vec<_>>>()?;
        let returns = match &descriptor.return_value {
            Some((field, column_type)) => Some((field.clone(), dialect.type_policy(*column_type)?)),
            None => None,
        };
        let results = descriptor
            .results
            .iter()
            .map(|result| (result.result_type.clone(), result.clone()))
            .collect();
        debug!(procedure = %descriptor.name, sql = %call.sql, "Prepared call text");
        Ok(Self {
            descriptor,
            call: Arc::new(call),
            policies,
            returns,
            results: Arc::new(results),
        })
    }
}

impl PooledObjectFactory for CallableFactory {
    type Object = PooledCallableStatement;
    type Args<'a> = &'a dyn FieldAccess;

    fn create(&self) -> DbResult<PooledCallableStatement> {
        Ok(PooledCallableStatement {
            call: Arc::clone(&self.call),
            slots: self
                .descriptor
                .params
                .iter()
                .zip(&self.policies)
                .map(|(param, policy)| CallSlot {
                    field: param.field.clone(),
                    input: param.direction.is_input(),
                    policy: *policy,
                    value: policy.output_param(),
                })
                .collect(),
            returns: self.returns.clone(),
            results: Arc::clone(&self.results),
        })
    }

    fn on_borrow(
        &self,
        statement: &mut PooledCallableStatement,
        object: &&dyn FieldAccess,
    ) -> DbResult<()> {
        for slot in &mut statement.slots {
            slot.value = if slot.input {
                slot.policy.to_param(&object.read_field(&slot.field)?)?
            } else {
                slot.policy.output_param()
            };
        }
        Ok(())
    }

    fn validate(&self, statement: &PooledCallableStatement) -> bool {
        Arc::ptr_eq(&statement.call, &self.call)
    }
}

struct CallableEntry {
    descriptor: Arc<CallableDescriptor>,
    pool: ComputeOnce<ObjectPool<CallableFactory>>,
}

/// Stored-procedure call pools of one data source.
///
/// Call text and the result-field map of a procedure are computed on its
/// first call. Inputs are read from the procedure object and outputs written
/// back to it through [`FieldAccess`].
pub struct CallableStatementPools {
    source: Arc<SqlDataSource>,
    limits: PoolLimits,
    procedures: HashMap<String, CallableEntry>,
}

impl std::fmt::Debug for CallableStatementPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.procedures.keys().collect();
        names.sort();
        f.debug_struct("CallableStatementPools")
            .field("datasource", &self.source.name())
            .field("procedures", &names)
            .finish()
    }
}

impl CallableStatementPools {
    pub fn new(source: Arc<SqlDataSource>, procedures: Vec<CallableDescriptor>) -> Self {
        let options = source.config().pool_options();
        let limits = PoolLimits::new(
            options.statement_pool_min_or_default(),
            options.statement_pool_max_or_default(),
            options.statement_borrow_timeout_or_default(),
        );
        Self::with_limits(source, procedures, limits)
    }

    pub fn with_limits(
        source: Arc<SqlDataSource>,
        procedures: Vec<CallableDescriptor>,
        limits: PoolLimits,
    ) -> Self {
        let procedures = procedures
            .into_iter()
            .map(|descriptor| {
                (
                    descriptor.name.clone(),
                    CallableEntry {
                        descriptor: Arc::new(descriptor),
                        pool: ComputeOnce::new(),
                    },
                )
            })
            .collect();
        Self {
            source,
            limits,
            procedures,
        }
    }

    pub fn descriptor(&self, name: &str) -> DbResult<&CallableDescriptor> {
        Ok(&self.entry(name)?.descriptor)
    }

    fn entry(&self, name: &str) -> DbResult<&CallableEntry> {
        self.procedures
            .get(name)
            .ok_or_else(|| DbError::unknown_reference("procedure", name))
    }

    fn pool(&self, name: &str) -> DbResult<&ObjectPool<CallableFactory>> {
        let entry = self.entry(name)?;
        entry.pool.get_or_try_init(|| {
            let factory = CallableFactory::new(self.source.dialect(), Arc::clone(&entry.descriptor))?;
            let pool = ObjectPool::new(
                format!("{}:call:{}", self.source.name(), name),
                factory,
                self.limits,
            );
            pool.initialize()?;
            Ok(pool)
        })
    }

    pub async fn borrow(
        &self,
        name: &str,
        object: &dyn FieldAccess,
    ) -> DbResult<Borrowed<PooledCallableStatement>> {
        self.pool(name)?.borrow(&object).await
    }

    pub fn restore(&self, name: &str, statement: Borrowed<PooledCallableStatement>) -> DbResult<()> {
        self.pool(name)?.restore(statement)
    }

    /// Call a procedure, writing its outputs or return value back into `object`.
    ///
    /// Returns the rows the call produced.
    pub async fn execute(&self, name: &str, object: &mut dyn FieldAccess) -> DbResult<Vec<DbRow>> {
        let statement = self.borrow(name, &*object).await?;
        let result = self
            .source
            .execute_call(statement.call(), &statement.params())
            .await;
        let result = match result {
            Ok(rows) => write_back(&statement, &rows, object).map(|()| rows.rows),
            Err(e) => Err(e),
        };
        self.pool(name)?.restore_after(statement, result)
    }

    /// Map rows of a declared result type into records.
    pub fn read_results(&self, name: &str, result_type: &str, rows: &[DbRow]) -> DbResult<Vec<Record>> {
        let descriptor = self.entry(name)?.descriptor.result(result_type).ok_or_else(|| {
            DbError::unknown_reference("result type", format!("{}.{}", name, result_type))
        })?;
        let dialect = self.source.dialect();
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = Record::new();
            for (i, field) in descriptor.fields.iter().enumerate() {
                let policy = dialect.type_policy(field.column_type)?;
                let value = match descriptor.addressing {
                    ResultAddressing::ByIndex => policy.extract(row, i)?,
                    ResultAddressing::ByName => policy.extract(row, field.column.as_str())?,
                };
                record.write_field(&field.field, value)?;
            }
            records.push(record);
        }
        Ok(records)
    }

    pub fn terminate(&self) -> DbResult<()> {
        for entry in self.procedures.values() {
            if let Some(pool) = entry.pool.get() {
                pool.terminate()?;
            }
        }
        Ok(())
    }
}

/// Copy output parameters, or the return value, into the procedure object.
fn write_back(
    statement: &PooledCallableStatement,
    rows: &CallRows,
    object: &mut dyn FieldAccess,
) -> DbResult<()> {
    if let Some((field, policy)) = &statement.returns {
        let row = rows
            .rows
            .first()
            .ok_or_else(|| DbError::internal("Function call returned no rows"))?;
        return object.write_field(field, policy.extract(row, 0usize)?);
    }
    let call = statement.call();
    if call.outputs.is_empty() {
        return Ok(());
    }
    let Some(row) = rows.fetched.as_ref().or_else(|| rows.rows.first()) else {
        return Err(DbError::internal("Procedure call returned no output values"));
    };
    for (i, position) in call.outputs.iter().enumerate() {
        let slot = statement
            .slots
            .get(position - 1)
            .ok_or_else(|| DbError::internal(format!("No parameter at position {}", position)))?;
        object.write_field(&slot.field, slot.policy.read_output(row, i)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnType, ParameterDirection};

    fn descriptor() -> CallableDescriptor {
        CallableDescriptor::new("totals", "calc_totals")
            .with_schema("billing")
            .with_param("customerId", ColumnType::Long, ParameterDirection::In)
            .with_param("total", ColumnType::Decimal, ParameterDirection::Out)
            .with_result(
                ResultDescriptor::new("line", ResultAddressing::ByName)
                    .with_field("amount", "AMOUNT", ColumnType::Decimal),
            )
    }

    #[test]
    fn test_bind_reads_inputs_and_nulls_outputs() {
        let factory = CallableFactory::new(Dialect::postgres(), Arc::new(descriptor())).unwrap();
        let mut statement = factory.create().unwrap();
        let object = Record::new().with("customerId", 42i64);
        let args: &dyn FieldAccess = &object;
        factory.on_borrow(&mut statement, &args).unwrap();
        let params = statement.params();
        assert_eq!(params[0].value, crate::models::SqlValue::Long(42));
        assert!(params[1].value.is_null());
        assert_eq!(&*statement.call().sql, "CALL billing.calc_totals($1, $2)");
        assert!(statement.result("line").is_some());
    }

    #[test]
    fn test_mysql_call_uses_session_variables() {
        let factory = CallableFactory::new(Dialect::mysql(), Arc::new(descriptor())).unwrap();
        let call = &factory.call;
        assert_eq!(&*call.sql, "CALL billing.calc_totals(?, @p2)");
        assert_eq!(call.fetch_sql.as_deref(), Some("SELECT @p2"));
    }

    #[test]
    fn test_function_call_binds_return_field() {
        let function = CallableDescriptor::new("balance", "account_balance")
            .with_param("accountId", ColumnType::Long, ParameterDirection::In)
            .with_return("balance", ColumnType::Decimal);
        let factory = CallableFactory::new(Dialect::postgres(), Arc::new(function)).unwrap();
        let statement = factory.create().unwrap();
        assert_eq!(&*statement.call().sql, "SELECT account_balance($1)");
        assert_eq!(statement.returns.as_ref().map(|(f, _)| f.as_str()), Some("balance"));
    }

    #[test]
    fn test_sqlite_has_no_procedures() {
        let err = CallableFactory::new(Dialect::sqlite(), Arc::new(descriptor()))
            .err()
            .unwrap();
        assert!(matches!(err, DbError::Unsupported { .. }));
    }
}
