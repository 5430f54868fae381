//! Lock instance table: one record per live instrumented rwlock.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use lockscope_types::{DISABLED_KEY, RwlockInstanceSnapshot, RwlockKey};
use parking_lot::Mutex;

use crate::registry::RwlockClass;
use crate::stats::RwlockStats;

pub(crate) const WRITER_NONE: u8 = 0;
pub(crate) const WRITER_UNTIMED: u8 = 1;
pub(crate) const WRITER_TIMED: u8 = 2;

#[derive(Debug)]
pub(crate) struct InstanceTable {
    slots: Mutex<Slots>,
    count: AtomicUsize,
    capacity: usize,
    lost: AtomicU64,
}

/// Slot storage for live instances. A dropped instance frees its slot
/// directly, so neither insert nor removal scans the table.
#[derive(Debug, Default)]
struct Slots {
    entries: Vec<Option<Weak<InstanceInner>>>,
    free: Vec<usize>,
}

impl Slots {
    fn insert(&mut self, entry: Weak<InstanceInner>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    fn remove(&mut self, slot: usize) {
        if let Some(entry) = self.entries.get_mut(slot) {
            *entry = None;
            self.free.push(slot);
        }
    }
}

impl InstanceTable {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(Slots::default()),
            count: AtomicUsize::new(0),
            capacity,
            lost: AtomicU64::new(0),
        })
    }

    pub(crate) fn create(self: &Arc<Self>, class: Arc<RwlockClass>, identity: u64) -> RwlockInstance {
        if self.count.fetch_add(1, Ordering::Relaxed) >= self.capacity {
            self.count.fetch_sub(1, Ordering::Relaxed);
            self.lost.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                class = %class.name,
                capacity = self.capacity,
                "rwlock instance table full, instance not instrumented"
            );
            return RwlockInstance::disabled();
        }

        let previous = class.live_instances.fetch_add(1, Ordering::Relaxed);
        if class.is_singleton() && previous > 0 {
            tracing::warn!(
                class = %class.name,
                live = previous + 1,
                "singleton rwlock class has more than one live instance"
            );
        }

        let own_stats = (!class.is_singleton()).then(RwlockStats::default);
        let table = Arc::clone(self);
        let inner = Arc::new_cyclic(|weak| {
            let slot = table.slots.lock().insert(weak.clone());
            InstanceInner {
            class,
            identity,
            enabled: AtomicBool::new(true),
            own_stats,
            readers: AtomicU32::new(0),
            writer: AtomicU8::new(WRITER_NONE),
            write_acquired_at: AtomicU64::new(0),
            slot,
            table,
            }
        });

        tracing::debug!(
            key = inner.class.key,
            identity = format_args!("{identity:#x}"),
            "created rwlock instance"
        );
        RwlockInstance { inner: Some(inner) }
    }

    /// Every live instance. Upgraded handles are released only after the
    /// table lock, since dropping the last one frees its slot.
    pub(crate) fn live(&self) -> Vec<Arc<InstanceInner>> {
        let slots = self.slots.lock();
        slots
            .entries
            .iter()
            .flatten()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn find(&self, identity: u64) -> Option<Arc<InstanceInner>> {
        self.live()
            .into_iter()
            .find(|inner| inner.identity == identity)
    }

    pub(crate) fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn slots_allocated(&self) -> usize {
        self.slots.lock().entries.len()
    }
}

#[derive(Debug)]
pub(crate) struct InstanceInner {
    pub(crate) class: Arc<RwlockClass>,
    pub(crate) identity: u64,
    pub(crate) enabled: AtomicBool,
    /// `None` for singleton classes, which record into the class.
    own_stats: Option<RwlockStats>,
    pub(crate) readers: AtomicU32,
    pub(crate) writer: AtomicU8,
    pub(crate) write_acquired_at: AtomicU64,
    slot: usize,
    table: Arc<InstanceTable>,
}

impl InstanceInner {
    #[inline]
    pub(crate) fn stats(&self) -> &RwlockStats {
        self.own_stats.as_ref().unwrap_or(&self.class.stats)
    }

    /// Statistics recorded by this instance alone, if it keeps its own.
    pub(crate) fn own_stats(&self) -> Option<&RwlockStats> {
        self.own_stats.as_ref()
    }

    pub(crate) fn describe(&self) -> RwlockInstanceSnapshot {
        RwlockInstanceSnapshot {
            key: self.class.key,
            class_name: self.class.name.clone(),
            identity: self.identity,
            enabled: self.enabled.load(Ordering::Relaxed),
            readers: self.readers.load(Ordering::Relaxed),
            write_locked: self.writer.load(Ordering::Relaxed) != WRITER_NONE,
            stats: self.stats().snapshot(),
        }
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        if let Some(stats) = &self.own_stats {
            self.class.stats.absorb(stats);
        }
        self.class.live_instances.fetch_sub(1, Ordering::Relaxed);
        self.table.slots.lock().remove(self.slot);
        self.table.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Handle to an instrumented rwlock, held next to the real lock.
///
/// A handle created for key `0`, for an unknown key, or when the table is
/// full is a no-op sentinel: every call on it does nothing. Dropping the
/// handle (or passing it to `destroy_instance`) ends the instance and folds
/// its statistics into its class.
#[derive(Debug, Default)]
pub struct RwlockInstance {
    inner: Option<Arc<InstanceInner>>,
}

impl RwlockInstance {
    /// The no-op sentinel.
    pub const fn disabled() -> Self {
        Self { inner: None }
    }

    #[inline]
    pub fn is_instrumented(&self) -> bool {
        self.inner.is_some()
    }

    pub fn key(&self) -> RwlockKey {
        self.inner
            .as_ref()
            .map_or(DISABLED_KEY, |inner| inner.class.key)
    }

    pub fn identity(&self) -> Option<u64> {
        self.inner.as_ref().map(|inner| inner.identity)
    }

    /// Per-instance switch. Has no effect on the sentinel.
    pub fn set_enabled(&self, enabled: bool) {
        if let Some(inner) = &self.inner {
            inner.enabled.store(enabled, Ordering::Relaxed);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.enabled.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn inner(&self) -> Option<&InstanceInner> {
        self.inner.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::RwlockFlags;
    use crate::registry::{KeyRegistry, RwlockInfo};
    use lockscope_types::{RwlockOperation, WaitOutcome};

    fn class(flags: RwlockFlags) -> Arc<RwlockClass> {
        let mut registry = KeyRegistry::new(4);
        let mut infos = [RwlockInfo::new("LOCK_test").flags(flags)];
        registry.register("test", &mut infos);
        Arc::clone(registry.class(infos[0].key).unwrap())
    }

    #[test]
    fn create_and_drop_track_live_counts() {
        let table = InstanceTable::new(8);
        let class = class(RwlockFlags::empty());

        let a = table.create(Arc::clone(&class), 0x1000);
        let b = table.create(Arc::clone(&class), 0x2000);
        assert!(a.is_instrumented());
        assert_eq!(a.key(), class.key);
        assert_eq!(b.identity(), Some(0x2000));
        assert_eq!(class.live_instances.load(Ordering::Relaxed), 2);
        assert_eq!(table.live().len(), 2);

        drop(a);
        assert_eq!(class.live_instances.load(Ordering::Relaxed), 1);
        assert_eq!(table.live().len(), 1);
        assert!(table.find(0x1000).is_none());
        assert!(table.find(0x2000).is_some());
    }

    #[test]
    fn full_table_returns_sentinel() {
        let table = InstanceTable::new(1);
        let class = class(RwlockFlags::empty());

        let first = table.create(Arc::clone(&class), 1);
        let second = table.create(Arc::clone(&class), 2);
        assert!(first.is_instrumented());
        assert!(!second.is_instrumented());
        assert_eq!(second.key(), DISABLED_KEY);
        assert_eq!(table.lost(), 1);

        drop(first);
        let third = table.create(class, 3);
        assert!(third.is_instrumented());
    }

    #[test]
    fn destroyed_instance_folds_into_class() {
        let table = InstanceTable::new(8);
        let class = class(RwlockFlags::empty());
        let instance = table.create(Arc::clone(&class), 7);
        instance
            .inner()
            .unwrap()
            .stats()
            .bucket(RwlockOperation::ReadLock, WaitOutcome::Succeeded)
            .record_timed(42);

        assert_eq!(class.stats.snapshot().total_waits(), 0);
        drop(instance);
        let folded = class.stats.snapshot();
        let bucket = folded.bucket(RwlockOperation::ReadLock, WaitOutcome::Succeeded);
        assert_eq!((bucket.count, bucket.sum), (1, 42));
    }

    #[test]
    fn singleton_instances_share_class_stats() {
        let table = InstanceTable::new(8);
        let class = class(RwlockFlags::SINGLETON);
        let instance = table.create(Arc::clone(&class), 9);
        let inner = instance.inner().unwrap();
        assert!(inner.own_stats().is_none());

        inner
            .stats()
            .bucket(RwlockOperation::WriteLock, WaitOutcome::Failed)
            .record_untimed();
        assert_eq!(class.stats.snapshot().total_waits(), 1);

        // Nothing is folded twice on destroy.
        drop(instance);
        assert_eq!(class.stats.snapshot().total_waits(), 1);
    }

    #[test]
    fn dropped_instances_free_their_slots() {
        let table = InstanceTable::new(1024);
        let class = class(RwlockFlags::empty());

        let keep = table.create(Arc::clone(&class), 1);
        for identity in 2..1000 {
            let churn = table.create(Arc::clone(&class), identity);
            assert!(churn.is_instrumented());
        }
        assert_eq!(table.slots_allocated(), 2);
        assert_eq!(table.live().len(), 1);

        let batch: Vec<_> = (0..10)
            .map(|identity| table.create(Arc::clone(&class), 5000 + identity))
            .collect();
        assert_eq!(table.live().len(), 11);
        drop(batch);
        assert_eq!(table.slots_allocated(), 11);
        assert_eq!(table.live().len(), 1);
        assert_eq!(table.find(1).map(|inner| inner.identity), keep.identity());

        // Freed slots are reused before the storage grows.
        let again: Vec<_> = (0..10)
            .map(|identity| table.create(Arc::clone(&class), 6000 + identity))
            .collect();
        assert_eq!(table.slots_allocated(), 11);
        assert_eq!(again.len(), 10);
    }

    #[test]
    fn sentinel_ignores_toggles() {
        let sentinel = RwlockInstance::disabled();
        sentinel.set_enabled(true);
        assert!(!sentinel.is_enabled());
        assert_eq!(sentinel.identity(), None);
    }
}
