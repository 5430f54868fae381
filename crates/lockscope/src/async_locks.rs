use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::panic::Location;

use lockscope_types::{RwlockKey, RwlockOperation};

use crate::engine::Engine;
use crate::instance::RwlockInstance;
use crate::locker::RwlockLockerState;
use crate::sync_locks::{RC_BUSY, next_identity};

// ── InstrumentedAsyncRwLock ──────────────────────────────────

/// A `tokio::sync::RwLock` reporting to an [`Engine`].
///
/// The locker state lives inside the acquisition future. If that future is
/// dropped before the lock is granted (a cancelled `.await`), the attempt is
/// abandoned and nothing is recorded. Guards report their release only when
/// their acquisition was recorded.
pub struct InstrumentedAsyncRwLock<T> {
    inner: tokio::sync::RwLock<T>,
    engine: Engine,
    psi: RwlockInstance,
}

impl<T> InstrumentedAsyncRwLock<T> {
    pub fn new(engine: &Engine, key: RwlockKey, value: T) -> Self {
        Self {
            inner: tokio::sync::RwLock::new(value),
            psi: engine.create_instance(key, next_identity()),
            engine: engine.clone(),
        }
    }

    pub fn instance(&self) -> &RwlockInstance {
        &self.psi
    }

    #[track_caller]
    pub fn read(&self) -> impl Future<Output = InstrumentedAsyncRwLockReadGuard<'_, T>> + '_ {
        let location = Location::caller();
        async move {
            let mut state = RwlockLockerState::new();
            let locker = self.engine.start_read_wait(
                &mut state,
                &self.psi,
                RwlockOperation::ReadLock,
                location,
            );
            let guard = self.inner.read().await;
            let recorded = locker.is_some();
            if let Some(locker) = locker {
                self.engine.end_read_wait(locker, 0);
            }
            InstrumentedAsyncRwLockReadGuard {
                guard,
                lock: self,
                recorded,
            }
        }
    }

    #[track_caller]
    pub fn write(&self) -> impl Future<Output = InstrumentedAsyncRwLockWriteGuard<'_, T>> + '_ {
        let location = Location::caller();
        async move {
            let mut state = RwlockLockerState::new();
            let locker = self.engine.start_write_wait(
                &mut state,
                &self.psi,
                RwlockOperation::WriteLock,
                location,
            );
            let guard = self.inner.write().await;
            let recorded = locker.is_some();
            if let Some(locker) = locker {
                self.engine.end_write_wait(locker, 0);
            }
            InstrumentedAsyncRwLockWriteGuard {
                guard,
                lock: self,
                recorded,
            }
        }
    }

    #[track_caller]
    pub fn try_read(
        &self,
    ) -> Result<InstrumentedAsyncRwLockReadGuard<'_, T>, tokio::sync::TryLockError> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_read_wait(
            &mut state,
            &self.psi,
            RwlockOperation::TryReadLock,
            Location::caller(),
        );
        let result = self.inner.try_read();
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine
                .end_read_wait(locker, if result.is_ok() { 0 } else { RC_BUSY });
        }
        result.map(|guard| InstrumentedAsyncRwLockReadGuard {
            guard,
            lock: self,
            recorded,
        })
    }

    #[track_caller]
    pub fn try_write(
        &self,
    ) -> Result<InstrumentedAsyncRwLockWriteGuard<'_, T>, tokio::sync::TryLockError> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_write_wait(
            &mut state,
            &self.psi,
            RwlockOperation::TryWriteLock,
            Location::caller(),
        );
        let result = self.inner.try_write();
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine
                .end_write_wait(locker, if result.is_ok() { 0 } else { RC_BUSY });
        }
        result.map(|guard| InstrumentedAsyncRwLockWriteGuard {
            guard,
            lock: self,
            recorded,
        })
    }
}

pub struct InstrumentedAsyncRwLockReadGuard<'a, T> {
    guard: tokio::sync::RwLockReadGuard<'a, T>,
    lock: &'a InstrumentedAsyncRwLock<T>,
    recorded: bool,
}

impl<T> Drop for InstrumentedAsyncRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        if self.recorded {
            self.lock.engine.notify_unlock(&self.lock.psi);
        }
    }
}

impl<T> Deref for InstrumentedAsyncRwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct InstrumentedAsyncRwLockWriteGuard<'a, T> {
    guard: tokio::sync::RwLockWriteGuard<'a, T>,
    lock: &'a InstrumentedAsyncRwLock<T>,
    recorded: bool,
}

impl<T> Drop for InstrumentedAsyncRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        if self.recorded {
            self.lock.engine.notify_unlock(&self.lock.psi);
        }
    }
}

impl<T> Deref for InstrumentedAsyncRwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for InstrumentedAsyncRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
