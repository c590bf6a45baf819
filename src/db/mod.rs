//! Database access layer.
//!
//! This module provides database access functionality:
//! - Connection pool creation per backend
//! - Parameter binding and row decoding
//! - Live catalog reading
//! - Data sources and the dynamic data source registry
//! - Database dispatch macros for reducing code duplication

pub mod catalog;
pub mod datasource;
#[macro_use]
pub mod macros;
pub mod manager;
pub mod params;
pub mod pool;
pub mod row;

pub use catalog::CatalogReader;
pub use datasource::{CallRows, SqlDataSource};
pub use manager::DynamicDataSourceManager;
pub use pool::{DbPool, create_pool};
pub use row::{ColumnRef, DbRow};
