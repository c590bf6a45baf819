//! sqlweave
//!
//! A dialect-aware SQL persistence engine for SQLite, PostgreSQL and MySQL:
//! per-dialect type and DDL policies, translation of criteria queries,
//! schema synchronization from entity descriptors, a registry of data
//! sources that can be swapped at runtime, and pools of reusable statements.

pub mod config;
pub mod criteria;
pub mod db;
pub mod dialect;
pub mod error;
pub mod models;
pub mod schema;
pub mod statement;

pub use config::Config;
pub use db::{DynamicDataSourceManager, SqlDataSource};
pub use dialect::Dialect;
pub use error::{DbError, DbResult};
pub use schema::{SchemaSynchronizer, SyncOptions, SyncReport};
pub use statement::{CallableStatementPools, SqlStatementPools};
