//! Data models shared by the dialect, schema and data source layers.
//!
//! This module re-exports all model types used throughout the crate.

pub mod callable;
pub mod catalog;
pub mod change;
pub mod datasource;
pub mod entity;
pub mod native_query;
pub mod record;
pub mod restriction;
pub mod value;

// Re-export commonly used types
pub use callable::{
    CallableDescriptor, CallableParam, ParameterDirection, ResultAddressing, ResultDescriptor,
    ResultField,
};
pub use catalog::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo, TableType};
pub use change::SchemaChangeSet;
pub use datasource::{DatabaseType, DynamicDataSourceConfig, DynamicDataSourceConfigBuilder};
pub use entity::{
    EntitySchemaDescriptor, EntitySet, FieldSchemaDescriptor, ForeignKeyDescriptor, ForeignKeyRef,
    IndexDescriptor, StaticRow, UniqueConstraintDescriptor, ViewColumn, ViewDescriptor, ViewJoin,
};
pub use native_query::{JoinType, NativeColumn, NativeFilter, NativeJoin, NativeQuery};
pub use record::{FieldAccess, Record};
pub use restriction::{Operand, Operator, Restriction};
pub use value::{ColumnType, SqlParameter, SqlValue};
