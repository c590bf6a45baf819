//! Generic bounded object pool.
//!
//! A tokio `Semaphore` bounds the number of objects out on loan; idle objects
//! and the set of served slot ids live under a `std::sync::Mutex` so a
//! dropped handle can forget its slot without awaiting.

use crate::error::{DbError, DbResult};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Creates, binds and disposes of the objects held by an [`ObjectPool`].
pub trait PooledObjectFactory: Send + Sync {
    type Object: Send;
    /// Values bound into an object when it is borrowed
    type Args<'a>;

    fn create(&self) -> DbResult<Self::Object>;

    /// Prepare an object for a borrower.
    fn on_borrow(&self, object: &mut Self::Object, args: &Self::Args<'_>) -> DbResult<()>;

    /// Whether a restored object may be handed out again.
    fn validate(&self, _object: &Self::Object) -> bool {
        true
    }

    fn destroy(&self, _object: Self::Object) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub min: usize,
    pub max: usize,
    pub borrow_timeout: Duration,
}

impl PoolLimits {
    pub fn new(min: usize, max: usize, borrow_timeout: Duration) -> Self {
        Self {
            min,
            max: max.max(1),
            borrow_timeout,
        }
    }
}

struct Slot<T> {
    id: u64,
    object: T,
}

struct PoolState<T> {
    idle: Vec<Slot<T>>,
    served: HashSet<u64>,
    next_slot: u64,
    terminated: bool,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            idle: Vec::new(),
            served: HashSet::new(),
            next_slot: 1,
            terminated: false,
        }
    }

    fn next_slot(&mut self) -> u64 {
        let id = self.next_slot;
        self.next_slot += 1;
        id
    }
}

fn lock<T>(state: &Mutex<PoolState<T>>) -> DbResult<MutexGuard<'_, PoolState<T>>> {
    state
        .lock()
        .map_err(|_| DbError::internal("Object pool state lock poisoned"))
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub max: usize,
}

pub struct ObjectPool<F: PooledObjectFactory> {
    id: u64,
    name: String,
    factory: F,
    limits: PoolLimits,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<PoolState<F::Object>>>,
}

impl<F: PooledObjectFactory> std::fmt::Debug for ObjectPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl<F: PooledObjectFactory> ObjectPool<F> {
    pub fn new(name: impl Into<String>, factory: F, limits: PoolLimits) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            factory,
            semaphore: Arc::new(Semaphore::new(limits.max)),
            limits,
            state: Arc::new(Mutex::new(PoolState::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    /// Pre-create `min(min, max)` idle objects.
    pub fn initialize(&self) -> DbResult<()> {
        let target = self.limits.min.min(self.limits.max);
        let mut state = lock(&self.state)?;
        while state.idle.len() + state.served.len() < target {
            let object = self.factory.create()?;
            let id = state.next_slot();
            state.idle.push(Slot { id, object });
        }
        debug!(pool = %self.name, idle = state.idle.len(), "Object pool initialized");
        Ok(())
    }

    /// Borrow an object bound with `args`, waiting up to the borrow timeout.
    pub async fn borrow(&self, args: &F::Args<'_>) -> DbResult<Borrowed<F::Object>> {
        let started = Instant::now();
        let permit = match tokio::time::timeout(
            self.limits.borrow_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(DbError::invalid_input(format!(
                    "Object pool '{}' is terminated",
                    self.name
                )));
            }
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(pool = %self.name, max = self.limits.max, waited_ms, "Object pool exhausted");
                return Err(DbError::pool_exhausted(&self.name, self.limits.max, waited_ms));
            }
        };

        let reused = lock(&self.state)?.idle.pop();
        let slot = match reused {
            Some(mut slot) => match self.factory.on_borrow(&mut slot.object, args) {
                Ok(()) => slot,
                Err(e) => {
                    warn!(pool = %self.name, error = %e, "Binding a reused object failed, replacing it");
                    self.factory.destroy(slot.object);
                    self.fresh(args)?
                }
            },
            None => self.fresh(args)?,
        };

        lock(&self.state)?.served.insert(slot.id);
        Ok(Borrowed {
            pool_id: self.id,
            slot: slot.id,
            object: Some(slot.object),
            state: Arc::clone(&self.state),
            _permit: permit,
        })
    }

    fn fresh(&self, args: &F::Args<'_>) -> DbResult<Slot<F::Object>> {
        let mut object = self.factory.create()?;
        if let Err(e) = self.factory.on_borrow(&mut object, args) {
            self.factory.destroy(object);
            return Err(e);
        }
        let id = lock(&self.state)?.next_slot();
        Ok(Slot { id, object })
    }

    /// Return a borrowed object. Only objects served by this pool are accepted;
    /// objects failing validation are destroyed instead of recycled.
    pub fn restore(&self, mut borrowed: Borrowed<F::Object>) -> DbResult<()> {
        if borrowed.pool_id != self.id {
            return Err(DbError::invalid_input(format!(
                "Object was not served by pool '{}'",
                self.name
            )));
        }
        let mut state = lock(&self.state)?;
        if !state.served.remove(&borrowed.slot) {
            return Err(DbError::invalid_input(format!(
                "Slot {} is not on loan from pool '{}'",
                borrowed.slot, self.name
            )));
        }
        let Some(object) = borrowed.object.take() else {
            return Err(DbError::internal("Borrowed object already taken"));
        };
        if state.terminated || !self.factory.validate(&object) {
            if !state.terminated {
                warn!(pool = %self.name, slot = borrowed.slot, "Discarding invalid pooled object");
            }
            drop(state);
            self.factory.destroy(object);
        } else {
            state.idle.push(Slot {
                id: borrowed.slot,
                object,
            });
        }
        Ok(())
    }

    /// Restore `borrowed` once the work done with it has produced `result`.
    ///
    /// A failed restore is returned only when the work succeeded; otherwise
    /// it is logged and the work's own error wins.
    pub fn restore_after<T>(&self, borrowed: Borrowed<F::Object>, result: DbResult<T>) -> DbResult<T> {
        match (self.restore(borrowed), result) {
            (Ok(()), result) => result,
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(original)) => {
                warn!(pool = %self.name, error = %e, "Restore failed after a failed statement");
                Err(original)
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        match lock(&self.state) {
            Ok(state) => PoolStats {
                idle: state.idle.len(),
                active: state.served.len(),
                max: self.limits.max,
            },
            Err(_) => PoolStats {
                max: self.limits.max,
                ..Default::default()
            },
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Close the pool: pending and future borrows fail and idle objects are destroyed.
    pub fn terminate(&self) -> DbResult<()> {
        self.semaphore.close();
        let idle = {
            let mut state = lock(&self.state)?;
            state.terminated = true;
            std::mem::take(&mut state.idle)
        };
        let count = idle.len();
        for slot in idle {
            self.factory.destroy(slot.object);
        }
        debug!(pool = %self.name, destroyed = count, "Object pool terminated");
        Ok(())
    }
}

/// An object on loan from an [`ObjectPool`].
///
/// Dropping it without restoring forgets the slot and frees the permit.
pub struct Borrowed<T> {
    pool_id: u64,
    slot: u64,
    object: Option<T>,
    state: Arc<Mutex<PoolState<T>>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: std::fmt::Debug> std::fmt::Debug for Borrowed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Borrowed")
            .field("pool_id", &self.pool_id)
            .field("slot", &self.slot)
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

impl<T> Borrowed<T> {
    pub fn slot(&self) -> u64 {
        self.slot
    }
}

impl<T> Deref for Borrowed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.object.as_ref().expect("borrowed object is present until restored")
    }
}

impl<T> DerefMut for Borrowed<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_mut().expect("borrowed object is present until restored")
    }
}

impl<T> Drop for Borrowed<T> {
    fn drop(&mut self) {
        if self.object.is_some() {
            if let Ok(mut state) = self.state.lock() {
                state.served.remove(&self.slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    struct CounterFactory(Arc<Counter>);

    impl PooledObjectFactory for CounterFactory {
        type Object = i64;
        type Args<'a> = i64;

        fn create(&self) -> DbResult<i64> {
            self.0.created.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        fn on_borrow(&self, object: &mut i64, args: &i64) -> DbResult<()> {
            if *args < 0 {
                return Err(DbError::invalid_input("negative"));
            }
            *object = *args;
            Ok(())
        }

        fn validate(&self, object: &i64) -> bool {
            *object != 13
        }

        fn destroy(&self, _object: i64) {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(min: usize, max: usize, timeout_ms: u64) -> (ObjectPool<CounterFactory>, Arc<Counter>) {
        let counter = Arc::new(Counter::default());
        let pool = ObjectPool::new(
            "test",
            CounterFactory(Arc::clone(&counter)),
            PoolLimits::new(min, max, Duration::from_millis(timeout_ms)),
        );
        (pool, counter)
    }

    #[tokio::test]
    async fn test_borrow_binds_and_restore_recycles() {
        let (pool, counter) = pool(0, 2, 100);
        let borrowed = pool.borrow(&7).await.unwrap();
        assert_eq!(*borrowed, 7);
        pool.restore(borrowed).unwrap();
        let again = pool.borrow(&9).await.unwrap();
        assert_eq!(*again, 9);
        assert_eq!(counter.created.load(Ordering::SeqCst), 1);
        pool.restore(again).unwrap();
        assert_eq!(pool.stats(), PoolStats { idle: 1, active: 0, max: 2 });
    }

    #[tokio::test]
    async fn test_borrow_times_out_when_exhausted() {
        let (pool, _) = pool(0, 1, 50);
        let held = pool.borrow(&1).await.unwrap();
        let err = pool.borrow(&2).await.unwrap_err();
        assert!(matches!(err, DbError::PoolExhausted { max: 1, .. }));
        pool.restore(held).unwrap();
        assert!(pool.borrow(&3).await.is_ok());
    }

    #[tokio::test]
    async fn test_restore_rejects_foreign_object() {
        let (first, _) = pool(0, 1, 50);
        let (second, _) = pool(0, 1, 50);
        let borrowed = first.borrow(&1).await.unwrap();
        let err = second.restore(borrowed).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        // The rejected handle was dropped, so its permit is free again
        assert!(first.borrow(&2).await.is_ok());
    }

    #[tokio::test]
    async fn test_restore_after_keeps_the_work_error() {
        let (first, _) = pool(0, 1, 50);
        let (second, _) = pool(0, 1, 50);

        let borrowed = first.borrow(&1).await.unwrap();
        let err = second
            .restore_after::<u64>(borrowed, Err(DbError::timeout("update", 5)))
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout { .. }));

        let borrowed = first.borrow(&2).await.unwrap();
        let err = second.restore_after(borrowed, Ok(1u64)).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));

        let borrowed = first.borrow(&3).await.unwrap();
        assert_eq!(first.restore_after(borrowed, Ok(7u64)).unwrap(), 7);
        assert_eq!(first.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_invalid_object_is_destroyed() {
        let (pool, counter) = pool(0, 1, 50);
        let borrowed = pool.borrow(&13).await.unwrap();
        pool.restore(borrowed).unwrap();
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(counter.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_forgets_slot() {
        let (pool, _) = pool(0, 1, 50);
        let borrowed = pool.borrow(&1).await.unwrap();
        assert_eq!(pool.stats().active, 1);
        drop(borrowed);
        assert_eq!(pool.stats().active, 0);
        assert!(pool.borrow(&2).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_bind_replaces_reused_object() {
        let (pool, counter) = pool(1, 1, 50);
        pool.initialize().unwrap();
        assert!(pool.borrow(&-1).await.is_err());
        assert_eq!(counter.destroyed.load(Ordering::SeqCst), 2);
        assert!(pool.borrow(&4).await.is_ok());
    }

    #[tokio::test]
    async fn test_initialize_and_terminate() {
        let (pool, counter) = pool(3, 2, 50);
        pool.initialize().unwrap();
        assert_eq!(pool.stats().idle, 2);
        pool.terminate().unwrap();
        assert!(pool.is_terminated());
        assert_eq!(counter.destroyed.load(Ordering::SeqCst), 2);
        assert!(pool.borrow(&1).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_borrows_never_exceed_max() {
        let (pool, _) = pool(0, 3, 2_000);
        let pool = Arc::new(pool);
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..12 {
            let pool = Arc::clone(&pool);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let borrowed = pool.borrow(&i).await.unwrap();
                peak.fetch_max(pool.stats().active, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.restore(borrowed).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
