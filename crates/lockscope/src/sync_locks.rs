use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lockscope_types::{RwlockKey, RwlockOperation};

use crate::engine::Engine;
use crate::instance::RwlockInstance;
use crate::locker::RwlockLockerState;

/// Return code for a try-lock that found the lock taken.
pub const RC_BUSY: i32 = 16;
/// Return code for a timed acquisition that gave up.
pub const RC_TIMED_OUT: i32 = 110;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Identity for a wrapper lock. Wrappers can move, so their address is not
/// a usable identity.
pub(crate) fn next_identity() -> u64 {
    NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed)
}

// ── InstrumentedRwLock ───────────────────────────────────────

/// A `parking_lot::RwLock` whose acquisitions and releases are reported to
/// an [`Engine`].
///
/// A guard reports its release only if its acquisition was recorded, so
/// holders on uninstrumented threads (or taken while the key or engine was
/// switched off) never disturb the reader and writer tracking.
pub struct InstrumentedRwLock<T> {
    inner: parking_lot::RwLock<T>,
    engine: Engine,
    psi: RwlockInstance,
}

impl<T> InstrumentedRwLock<T> {
    pub fn new(engine: &Engine, key: RwlockKey, value: T) -> Self {
        Self {
            inner: parking_lot::RwLock::new(value),
            psi: engine.create_instance(key, next_identity()),
            engine: engine.clone(),
        }
    }

    pub fn instance(&self) -> &RwlockInstance {
        &self.psi
    }

    #[track_caller]
    pub fn read(&self) -> InstrumentedRwLockReadGuard<'_, T> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_read_wait(
            &mut state,
            &self.psi,
            RwlockOperation::ReadLock,
            Location::caller(),
        );
        let guard = self.inner.read();
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine.end_read_wait(locker, 0);
        }
        InstrumentedRwLockReadGuard {
            guard,
            lock: self,
            recorded,
        }
    }

    #[track_caller]
    pub fn try_read(&self) -> Option<InstrumentedRwLockReadGuard<'_, T>> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_read_wait(
            &mut state,
            &self.psi,
            RwlockOperation::TryReadLock,
            Location::caller(),
        );
        let guard = self.inner.try_read();
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine
                .end_read_wait(locker, if guard.is_some() { 0 } else { RC_BUSY });
        }
        guard.map(|guard| InstrumentedRwLockReadGuard {
            guard,
            lock: self,
            recorded,
        })
    }

    /// Blocking read that gives up after `timeout`. A timeout is recorded
    /// as a failed `ReadLock` wait.
    #[track_caller]
    pub fn try_read_for(&self, timeout: Duration) -> Option<InstrumentedRwLockReadGuard<'_, T>> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_read_wait(
            &mut state,
            &self.psi,
            RwlockOperation::ReadLock,
            Location::caller(),
        );
        let guard = self.inner.try_read_for(timeout);
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine
                .end_read_wait(locker, if guard.is_some() { 0 } else { RC_TIMED_OUT });
        }
        guard.map(|guard| InstrumentedRwLockReadGuard {
            guard,
            lock: self,
            recorded,
        })
    }

    #[track_caller]
    pub fn write(&self) -> InstrumentedRwLockWriteGuard<'_, T> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_write_wait(
            &mut state,
            &self.psi,
            RwlockOperation::WriteLock,
            Location::caller(),
        );
        let guard = self.inner.write();
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine.end_write_wait(locker, 0);
        }
        InstrumentedRwLockWriteGuard {
            guard,
            lock: self,
            recorded,
        }
    }

    #[track_caller]
    pub fn try_write(&self) -> Option<InstrumentedRwLockWriteGuard<'_, T>> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_write_wait(
            &mut state,
            &self.psi,
            RwlockOperation::TryWriteLock,
            Location::caller(),
        );
        let guard = self.inner.try_write();
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine
                .end_write_wait(locker, if guard.is_some() { 0 } else { RC_BUSY });
        }
        guard.map(|guard| InstrumentedRwLockWriteGuard {
            guard,
            lock: self,
            recorded,
        })
    }

    #[track_caller]
    pub fn try_write_for(&self, timeout: Duration) -> Option<InstrumentedRwLockWriteGuard<'_, T>> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_write_wait(
            &mut state,
            &self.psi,
            RwlockOperation::WriteLock,
            Location::caller(),
        );
        let guard = self.inner.try_write_for(timeout);
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine
                .end_write_wait(locker, if guard.is_some() { 0 } else { RC_TIMED_OUT });
        }
        guard.map(|guard| InstrumentedRwLockWriteGuard {
            guard,
            lock: self,
            recorded,
        })
    }

    /// Shared-exclusive acquisition: excludes writers and other upgradable
    /// readers, admits plain readers. Recorded as `SharedExclusiveLock` and
    /// counted as a reader until upgraded or released.
    #[track_caller]
    pub fn upgradable_read(&self) -> InstrumentedRwLockUpgradableReadGuard<'_, T> {
        let mut state = RwlockLockerState::new();
        let locker = self.engine.start_read_wait(
            &mut state,
            &self.psi,
            RwlockOperation::SharedExclusiveLock,
            Location::caller(),
        );
        let guard = self.inner.upgradable_read();
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            self.engine.end_read_wait(locker, 0);
        }
        InstrumentedRwLockUpgradableReadGuard {
            guard: Some(guard),
            lock: self,
            recorded,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> InstrumentedRwLock<T> {
    /// An uninstrumented lock, as if created with key `0`.
    pub fn uninstrumented(engine: &Engine) -> Self {
        Self::new(engine, lockscope_types::DISABLED_KEY, T::default())
    }
}

// Each guard reports in `Drop::drop`, before its fields drop, so the release
// is recorded while the real lock is still held and cannot interleave with
// the next owner's acquisition.

pub struct InstrumentedRwLockReadGuard<'a, T> {
    guard: parking_lot::RwLockReadGuard<'a, T>,
    lock: &'a InstrumentedRwLock<T>,
    recorded: bool,
}

impl<T> Drop for InstrumentedRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        if self.recorded {
            self.lock.engine.notify_unlock(&self.lock.psi);
        }
    }
}

impl<T> Deref for InstrumentedRwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct InstrumentedRwLockWriteGuard<'a, T> {
    guard: parking_lot::RwLockWriteGuard<'a, T>,
    lock: &'a InstrumentedRwLock<T>,
    recorded: bool,
}

impl<T> Drop for InstrumentedRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        if self.recorded {
            self.lock.engine.notify_unlock(&self.lock.psi);
        }
    }
}

impl<T> Deref for InstrumentedRwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for InstrumentedRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

pub struct InstrumentedRwLockUpgradableReadGuard<'a, T> {
    /// Always `Some` until `upgrade` takes it.
    guard: Option<parking_lot::RwLockUpgradableReadGuard<'a, T>>,
    lock: &'a InstrumentedRwLock<T>,
    recorded: bool,
}

impl<'a, T> InstrumentedRwLockUpgradableReadGuard<'a, T> {
    /// Upgrades to exclusive access, recorded as an `ExclusiveLock` wait.
    /// The lock stays write-owned across the upgrade.
    #[track_caller]
    pub fn upgrade(mut self) -> InstrumentedRwLockWriteGuard<'a, T> {
        let lock = self.lock;
        if std::mem::take(&mut self.recorded) {
            // Stop counting as a reader; the write wait below makes us the writer.
            lock.engine.notify_unlock(&lock.psi);
        }

        let mut state = RwlockLockerState::new();
        let locker = lock.engine.start_write_wait(
            &mut state,
            &lock.psi,
            RwlockOperation::ExclusiveLock,
            Location::caller(),
        );
        let guard = match self.guard.take() {
            Some(upgradable) => parking_lot::RwLockUpgradableReadGuard::upgrade(upgradable),
            None => unreachable!("upgradable guard is only taken by upgrade"),
        };
        let recorded = locker.is_some();
        if let Some(locker) = locker {
            lock.engine.end_write_wait(locker, 0);
        }
        InstrumentedRwLockWriteGuard {
            guard,
            lock,
            recorded,
        }
    }
}

impl<T> Drop for InstrumentedRwLockUpgradableReadGuard<'_, T> {
    fn drop(&mut self) {
        if self.recorded {
            self.lock.engine.notify_unlock(&self.lock.psi);
        }
    }
}

impl<T> Deref for InstrumentedRwLockUpgradableReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!("upgradable guard is only taken by upgrade"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::registry::RwlockInfo;
    use lockscope_types::WaitOutcome;

    fn engine_with_key(name: &str) -> (Engine, RwlockKey) {
        let engine = Engine::new(EngineConfig::default());
        let mut infos = [RwlockInfo::new(name)];
        engine.register("wrapper", &mut infos);
        (engine, infos[0].key)
    }

    fn count(
        engine: &Engine,
        lock: &InstrumentedRwLock<u32>,
        op: RwlockOperation,
        outcome: WaitOutcome,
    ) -> u64 {
        engine
            .snapshot_instance(lock.instance())
            .unwrap()
            .stats
            .bucket(op, outcome)
            .count
    }

    #[test]
    fn read_and_write_are_recorded() {
        let (engine, key) = engine_with_key("LOCK_rw");
        let lock = InstrumentedRwLock::new(&engine, key, 0u32);

        {
            let a = lock.read();
            let b = lock.read();
            assert_eq!(*a + *b, 0);
            let snap = engine.snapshot_instance(lock.instance()).unwrap();
            assert_eq!(snap.readers, 2);
        }
        *lock.write() += 5;
        assert_eq!(*lock.read(), 5);

        assert_eq!(
            count(&engine, &lock, RwlockOperation::ReadLock, WaitOutcome::Succeeded),
            3
        );
        assert_eq!(
            count(&engine, &lock, RwlockOperation::WriteLock, WaitOutcome::Succeeded),
            1
        );
        let snap = engine.snapshot_instance(lock.instance()).unwrap();
        assert_eq!(snap.readers, 0);
        assert!(!snap.write_locked);
        assert_eq!(snap.stats.write_hold.count, 1);
    }

    #[test]
    fn failed_try_locks_are_counted_as_failures() {
        let (engine, key) = engine_with_key("LOCK_try");
        let lock = InstrumentedRwLock::new(&engine, key, 0u32);

        let writer = lock.write();
        assert!(lock.try_read().is_none());
        assert!(lock.try_write().is_none());
        assert!(lock.try_read_for(Duration::from_millis(1)).is_none());
        drop(writer);
        assert!(lock.try_write().is_some());

        assert_eq!(
            count(&engine, &lock, RwlockOperation::TryReadLock, WaitOutcome::Failed),
            1
        );
        assert_eq!(
            count(&engine, &lock, RwlockOperation::TryWriteLock, WaitOutcome::Failed),
            1
        );
        assert_eq!(
            count(&engine, &lock, RwlockOperation::ReadLock, WaitOutcome::Failed),
            1
        );
        assert_eq!(
            count(&engine, &lock, RwlockOperation::TryWriteLock, WaitOutcome::Succeeded),
            1
        );
    }

    #[test]
    fn upgrade_records_shared_exclusive_then_exclusive() {
        let (engine, key) = engine_with_key("LOCK_sx");
        let lock = InstrumentedRwLock::new(&engine, key, 1u32);

        let sx = lock.upgradable_read();
        assert_eq!(*sx, 1);
        let mut x = sx.upgrade();
        *x = 2;
        assert!(engine.snapshot_instance(lock.instance()).unwrap().write_locked);
        drop(x);

        assert_eq!(
            count(
                &engine,
                &lock,
                RwlockOperation::SharedExclusiveLock,
                WaitOutcome::Succeeded
            ),
            1
        );
        assert_eq!(
            count(&engine, &lock, RwlockOperation::ExclusiveLock, WaitOutcome::Succeeded),
            1
        );
        let snap = engine.snapshot_instance(lock.instance()).unwrap();
        assert!(!snap.write_locked);
        // One release for the whole SX -> X sequence.
        assert_eq!(snap.stats.write_hold.count, 1);
        assert_eq!(lock.into_inner(), 2);
    }

    #[test]
    fn release_from_uninstrumented_thread_keeps_reader_count() {
        let (engine, key) = engine_with_key("LOCK_thread_off");
        let lock = InstrumentedRwLock::new(&engine, key, 0u32);

        let held = lock.read();
        std::thread::scope(|s| {
            s.spawn(|| {
                crate::thread::set_thread_instrumented(false);
                drop(lock.read());
            });
        });
        assert_eq!(engine.snapshot_instance(lock.instance()).unwrap().readers, 1);
        drop(held);
        assert_eq!(engine.snapshot_instance(lock.instance()).unwrap().readers, 0);
    }

    #[test]
    fn release_while_key_disabled_keeps_reader_count() {
        let (engine, key) = engine_with_key("LOCK_key_off");
        let lock = InstrumentedRwLock::new(&engine, key, 0u32);

        let held = lock.read();
        engine.set_key_enabled(key, false);
        drop(lock.read());
        engine.set_key_enabled(key, true);
        assert_eq!(engine.snapshot_instance(lock.instance()).unwrap().readers, 1);

        engine.set_enabled(false);
        let unrecorded = lock.read();
        engine.set_enabled(true);
        drop(unrecorded);
        assert_eq!(engine.snapshot_instance(lock.instance()).unwrap().readers, 1);

        drop(held);
        assert_eq!(engine.snapshot_instance(lock.instance()).unwrap().readers, 0);
    }

    #[test]
    fn write_release_after_instance_disabled_clears_writer() {
        let (engine, key) = engine_with_key("LOCK_instance_off");
        let lock = InstrumentedRwLock::new(&engine, key, 0u32);

        let writer = lock.write();
        lock.instance().set_enabled(false);
        drop(writer);

        let snap = engine.snapshot_instance(lock.instance()).unwrap();
        assert!(!snap.write_locked);
        assert!(snap.stats.write_hold.is_empty());
    }

    #[test]
    fn unrecorded_upgradable_read_upgrades_cleanly() {
        let (engine, key) = engine_with_key("LOCK_sx_off");
        let lock = InstrumentedRwLock::new(&engine, key, 1u32);

        let reader = lock.read();
        engine.set_key_enabled(key, false);
        let sx = lock.upgradable_read();
        engine.set_key_enabled(key, true);
        drop(reader);
        *sx.upgrade() += 1;

        let snap = engine.snapshot_instance(lock.instance()).unwrap();
        assert_eq!(snap.readers, 0);
        assert!(!snap.write_locked);
        assert_eq!(
            count(&engine, &lock, RwlockOperation::ExclusiveLock, WaitOutcome::Succeeded),
            1
        );
        assert_eq!(snap.stats.write_hold.count, 1);
    }

    #[test]
    fn uninstrumented_lock_still_locks() {
        let engine = Engine::default();
        let lock: InstrumentedRwLock<Vec<u8>> = InstrumentedRwLock::uninstrumented(&engine);
        lock.write().push(1);
        assert_eq!(lock.read().len(), 1);
        assert!(!lock.instance().is_instrumented());
        assert!(engine.snapshot().instances.is_empty());
    }
}
