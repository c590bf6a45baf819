//! Fallible compute-once cell.

use crate::error::{DbError, DbResult};
use std::sync::{Mutex, OnceLock};

/// A value computed at most once, on first use.
///
/// Initialization is serialized by a mutex and re-checked under it, so
/// concurrent callers run the initializer once. A failed initializer leaves
/// the cell empty for the next caller. Reads after publication take no lock.
#[derive(Debug)]
pub struct ComputeOnce<T> {
    value: OnceLock<T>,
    init: Mutex<()>,
}

impl<T> Default for ComputeOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ComputeOnce<T> {
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub fn get_or_try_init(&self, init: impl FnOnce() -> DbResult<T>) -> DbResult<&T> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let _guard = self
            .init
            .lock()
            .map_err(|_| DbError::internal("Compute-once lock poisoned"))?;
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let value = init()?;
        Ok(self.value.get_or_init(|| value))
    }
}
