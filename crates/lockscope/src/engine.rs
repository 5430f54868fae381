use std::fmt::Write as _;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use lockscope_types::{
    DISABLED_KEY, RwlockClassSnapshot, RwlockInstanceSnapshot, RwlockKey, RwlockOperation,
    RwlockStatsSnapshot, WaitStatSnapshot,
};
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::instance::{InstanceInner, InstanceTable, RwlockInstance};
use crate::locker::{self, RwlockLocker, RwlockLockerState};
use crate::policy::GlobalPolicy;
use crate::registry::{KeyRegistry, RwlockClass, RwlockInfo};
use crate::service::CURRENT_INTERFACE_VERSION;

/// Process-wide rwlock instrumentation engine.
///
/// The host builds one engine at startup and hands clones of it to whatever
/// needs to instrument locks. Clones share the same registry and tables.
#[derive(Clone, Debug)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

#[derive(Debug)]
struct EngineShared {
    registry: Mutex<KeyRegistry>,
    instances: Arc<InstanceTable>,
    policy: GlobalPolicy,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        tracing::debug!(
            enabled = config.enabled,
            timed = config.timer.is_some(),
            max_classes = config.max_classes,
            max_instances = config.max_instances,
            "starting rwlock instrumentation engine"
        );
        Self {
            shared: Arc::new(EngineShared {
                registry: Mutex::new(KeyRegistry::new(config.max_classes)),
                instances: InstanceTable::new(config.max_instances),
                policy: GlobalPolicy::new(&config),
            }),
        }
    }

    /// Drops this handle, logging a summary. Instances outlive the engine
    /// safely; they keep their class records alive.
    pub fn shutdown(self) {
        let snapshot = self.snapshot();
        tracing::debug!(
            classes = snapshot.classes.len(),
            live_instances = snapshot.instances.len(),
            classes_lost = snapshot.classes_lost,
            instances_lost = snapshot.instances_lost,
            "rwlock instrumentation engine shut down"
        );
    }

    // ── Registration ─────────────────────────────────────────────

    /// Assigns a key to every entry of `infos`, writing it into `info.key`.
    ///
    /// Idempotent per `(category, name)`. Meant for the startup phase; a
    /// name that cannot be registered keeps key `0`.
    pub fn register(&self, category: &str, infos: &mut [RwlockInfo<'_>]) {
        self.shared.registry.lock().register(category, infos);
    }

    // ── Instances ────────────────────────────────────────────────

    /// Creates the instrumentation record for a real lock. `identity` is the
    /// address or handle of that lock. Key `0` (or an unknown key) yields the
    /// no-op sentinel.
    pub fn create_instance(&self, key: RwlockKey, identity: u64) -> RwlockInstance {
        if key == DISABLED_KEY {
            return RwlockInstance::disabled();
        }
        let Some(class) = self.class(key) else {
            return RwlockInstance::disabled();
        };
        self.shared.instances.create(class, identity)
    }

    /// Ends an instance's lifecycle, folding its statistics into its class.
    pub fn destroy_instance(&self, instance: RwlockInstance) {
        if let Some(identity) = instance.identity() {
            tracing::debug!(
                key = instance.key(),
                identity = format_args!("{identity:#x}"),
                "destroying rwlock instance"
            );
        }
        drop(instance);
    }

    // ── Wait attempts ────────────────────────────────────────────

    /// Records the start of a read-side wait. `None` means "not
    /// instrumented, do not call end".
    #[inline]
    pub fn start_read_wait<'s, 'i>(
        &self,
        state: &'s mut RwlockLockerState<'i>,
        rwlock: &'i RwlockInstance,
        operation: RwlockOperation,
        location: &'static Location<'static>,
    ) -> Option<RwlockLocker<'s, 'i>> {
        let admission = self.shared.policy.admit(rwlock)?;
        Some(locker::start(state, admission, operation, true, location))
    }

    /// Records the end of a read-side wait. `rc` is the real lock call's
    /// return code; `0` is success.
    #[inline]
    pub fn end_read_wait(&self, locker: RwlockLocker<'_, '_>, rc: i32) {
        locker::end(locker, rc);
    }

    #[inline]
    pub fn start_write_wait<'s, 'i>(
        &self,
        state: &'s mut RwlockLockerState<'i>,
        rwlock: &'i RwlockInstance,
        operation: RwlockOperation,
        location: &'static Location<'static>,
    ) -> Option<RwlockLocker<'s, 'i>> {
        let admission = self.shared.policy.admit(rwlock)?;
        Some(locker::start(state, admission, operation, false, location))
    }

    #[inline]
    pub fn end_write_wait(&self, locker: RwlockLocker<'_, '_>, rc: i32) {
        locker::end(locker, rc);
    }

    /// Records a release of `rwlock`. A write release records hold time
    /// when hold tracking is on, the instance is enabled and the acquisition
    /// was timed.
    ///
    /// Call it only for acquisitions whose `end_*_wait` reported success;
    /// a release of an unrecorded acquisition would be charged to another
    /// holder. The wrappers in this crate track that for their guards.
    #[inline]
    pub fn notify_unlock(&self, rwlock: &RwlockInstance) {
        let Some(inner) = rwlock.inner() else {
            return;
        };
        // Ownership is balanced even if the instance was switched off while
        // held; only the hold-time sample is dropped.
        let hold_timer = if inner.enabled.load(Ordering::Relaxed) {
            self.shared.policy.hold_timer()
        } else {
            None
        };
        locker::unlock(inner, hold_timer);
    }

    // ── Policy ───────────────────────────────────────────────────

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.policy.set_enabled(enabled);
    }

    /// True when the global switch is on and a timer is configured.
    pub fn is_enabled(&self) -> bool {
        self.shared.policy.is_enabled()
    }

    pub fn set_track_hold_time(&self, track: bool) {
        self.shared.policy.set_track_hold_time(track);
    }

    /// Enables or disables every instance of `key`. Returns `false` for an
    /// unknown key.
    pub fn set_key_enabled(&self, key: RwlockKey, enabled: bool) -> bool {
        self.class(key)
            .map(|class| class.enabled.store(enabled, Ordering::Relaxed))
            .is_some()
    }

    /// Switches timing for `key`. Untimed waits are still counted.
    pub fn set_key_timed(&self, key: RwlockKey, timed: bool) -> bool {
        self.class(key)
            .map(|class| class.timed.store(timed, Ordering::Relaxed))
            .is_some()
    }

    // ── Snapshots ────────────────────────────────────────────────

    pub fn snapshot_instance(&self, rwlock: &RwlockInstance) -> Option<RwlockInstanceSnapshot> {
        rwlock.inner().map(|inner| inner.describe())
    }

    /// Looks up a live instance by the identity it was created with.
    pub fn snapshot_identity(&self, identity: u64) -> Option<RwlockInstanceSnapshot> {
        self.shared
            .instances
            .find(identity)
            .map(|inner| inner.describe())
    }

    /// Totals for one key: destroyed instances plus every live one.
    pub fn snapshot_key(&self, key: RwlockKey) -> Option<RwlockClassSnapshot> {
        let class = self.class(key)?;
        let live = self.shared.instances.live();
        Some(describe_class(&class, &live))
    }

    pub fn snapshot(&self) -> RwlockStatsSnapshot {
        let (classes, classes_lost) = {
            let registry = self.shared.registry.lock();
            (registry.classes().to_vec(), registry.lost())
        };
        let live = self.shared.instances.live();

        RwlockStatsSnapshot {
            interface_version: CURRENT_INTERFACE_VERSION,
            classes: classes
                .iter()
                .map(|class| describe_class(class, &live))
                .collect(),
            instances: live.iter().map(|inner| inner.describe()).collect(),
            classes_lost,
            instances_lost: self.shared.instances.lost(),
        }
    }

    /// Zeroes every counter. Samples completing concurrently with the reset
    /// may or may not survive it.
    pub fn reset_stats(&self) {
        let classes = self.shared.registry.lock().classes().to_vec();
        for class in &classes {
            class.stats.reset();
        }
        for inner in self.shared.instances.live() {
            if let Some(stats) = inner.own_stats() {
                stats.reset();
            }
        }
    }

    pub fn classes_lost(&self) -> u64 {
        self.shared.registry.lock().lost()
    }

    pub fn instances_lost(&self) -> u64 {
        self.shared.instances.lost()
    }

    /// Human-readable listing of every class with recorded activity.
    pub fn dump_report(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        for class in &snapshot.classes {
            if class.stats.total_waits() == 0 && class.stats.write_hold.is_empty() {
                continue;
            }
            let _ = writeln!(
                out,
                "Rwlock \"{}\" (key={}, instances={}{}{}):",
                class.name,
                class.key,
                class.live_instances,
                if class.enabled { "" } else { ", disabled" },
                if class.timed { "" } else { ", untimed" },
            );
            for op in &class.stats.operations {
                if op.is_empty() {
                    continue;
                }
                for (label, stat) in [("ok", &op.succeeded), ("failed", &op.failed)] {
                    if stat.is_empty() {
                        continue;
                    }
                    let _ = writeln!(
                        out,
                        "  {:<26} {:<6} {}",
                        op.operation.name(),
                        label,
                        format_stat(stat)
                    );
                }
            }
            let hold = &class.stats.write_hold;
            if !hold.is_empty() {
                let _ = writeln!(
                    out,
                    "  {:<26} {:<6} {}",
                    "write_hold",
                    "",
                    format_stat(hold)
                );
            }
        }

        if snapshot.classes_lost > 0 || snapshot.instances_lost > 0 {
            let _ = writeln!(
                out,
                "lost: classes={} instances={}",
                snapshot.classes_lost, snapshot.instances_lost
            );
        }
        out
    }

    fn class(&self, key: RwlockKey) -> Option<Arc<RwlockClass>> {
        self.shared.registry.lock().class(key).cloned()
    }
}

fn describe_class(
    class: &RwlockClass,
    live: &[Arc<InstanceInner>],
) -> RwlockClassSnapshot {
    let mut snapshot = class.describe();
    for inner in live.iter().filter(|inner| inner.class.key == class.key) {
        if let Some(stats) = inner.own_stats() {
            snapshot.stats.merge(&stats.snapshot());
        }
    }
    snapshot
}

fn format_stat(stat: &WaitStatSnapshot) -> String {
    match stat.min {
        Some(min) => format!(
            "count={} sum={} min={} avg={} max={}",
            stat.count,
            stat.sum,
            min,
            stat.avg().unwrap_or(0),
            stat.max
        ),
        None => format!("count={} (untimed)", stat.count),
    }
}
