//! Pooled, reusable statement objects.
//!
//! Each entity gets one pool per statement type and each stored procedure one
//! pool of calls. SQL text is computed on first use of a pool and shared by
//! every object it serves.

pub mod callable;
pub mod entity;
pub mod once;
pub mod pool;

pub use callable::{CallableStatementPools, PooledCallableStatement};
pub use entity::{PooledStatement, SqlStatementPools, StatementArgs, StatementType};
pub use once::ComputeOnce;
pub use pool::{Borrowed, ObjectPool, PoolLimits, PoolStats, PooledObjectFactory};
