//! Rwlock instrumentation engine.
//!
//! Instruments acquisitions and releases of reader/writer locks owned by the
//! host and rolls the wait times into per-lock statistics:
//!
//! - a **key registry** mapping `(category, name)` to small integer keys,
//! - a **lock instance table** with one record per live instrumented lock,
//! - a **locker state machine** bracketing each wait attempt
//!   (`start_*_wait` before the real lock call, `end_*_wait` after it),
//! - a lock-free **aggregator** bucketing waits by operation and outcome,
//! - a **policy** layer that turns everything off per instance, per key,
//!   per thread or globally.
//!
//! No entry point fails. When something cannot be instrumented the engine
//! hands back a no-op sentinel and the host keeps running.
//!
//! ```no_run
//! use std::panic::Location;
//! use lockscope::{Engine, RwlockInfo, RwlockLockerState, RwlockOperation};
//!
//! let engine = Engine::default();
//! let mut infos = [RwlockInfo::new("page_lock")];
//! engine.register("storage", &mut infos);
//!
//! let real_lock = parking_lot::RwLock::new(0u32);
//! let psi = engine.create_instance(infos[0].key, &real_lock as *const _ as u64);
//!
//! let mut state = RwlockLockerState::new();
//! let locker = engine.start_write_wait(&mut state, &psi, RwlockOperation::WriteLock, Location::caller());
//! let mut guard = real_lock.write();
//! let recorded = locker.is_some();
//! if let Some(locker) = locker {
//!     engine.end_write_wait(locker, 0);
//! }
//! *guard += 1;
//! if recorded {
//!     engine.notify_unlock(&psi);
//! }
//! drop(guard);
//! engine.destroy_instance(psi);
//! ```

mod async_locks;
mod config;
mod engine;
mod flags;
mod instance;
mod locker;
mod policy;
mod registry;
mod service;
mod stats;
mod sync_locks;
mod thread;
mod timer;

pub use async_locks::{
    InstrumentedAsyncRwLock, InstrumentedAsyncRwLockReadGuard, InstrumentedAsyncRwLockWriteGuard,
};
pub use config::{
    ConfigError, DEFAULT_MAX_CLASSES, DEFAULT_MAX_INSTANCES, ENABLED_ENV, EngineConfig,
    MAX_CLASSES_ENV, MAX_INSTANCES_ENV, TIMED_ENV, TRACK_HOLD_TIME_ENV,
};
pub use engine::Engine;
pub use flags::RwlockFlags;
pub use instance::RwlockInstance;
pub use locker::{RwlockLocker, RwlockLockerState};
pub use registry::{NAME_PREFIX, RwlockInfo};
pub use service::{
    CURRENT_INTERFACE_VERSION, INTERFACE_VERSION_1, InterfaceVersion, RwlockService,
    RwlockServiceV1,
};
pub use sync_locks::{
    InstrumentedRwLock, InstrumentedRwLockReadGuard, InstrumentedRwLockUpgradableReadGuard,
    InstrumentedRwLockWriteGuard, RC_BUSY, RC_TIMED_OUT,
};
pub use thread::{current_thread_id, is_thread_instrumented, set_thread_instrumented};
pub use timer::{TimerFn, monotonic_ns};

pub use lockscope_types::{
    DISABLED_KEY, OperationStatSnapshot, RwlockClassSnapshot, RwlockInstanceSnapshot, RwlockKey,
    RwlockOperation, RwlockStatsBlock, RwlockStatsSnapshot, Volatility, WaitOutcome,
    WaitStatSnapshot,
};
