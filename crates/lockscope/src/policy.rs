//! Disable/flag policy.
//!
//! A wait attempt is instrumented only if every switch is on: the instance
//! handle is real, the instance flag, the global flag and timer, the class
//! (key) flag, and the calling thread. Checks run cheapest-first so a
//! disabled instance costs one load and one branch.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::EngineConfig;
use crate::instance::{InstanceInner, RwlockInstance};
use crate::thread;
use crate::timer::TimerFn;

#[derive(Debug)]
pub(crate) struct GlobalPolicy {
    enabled: AtomicBool,
    timer: Option<TimerFn>,
    track_hold_time: AtomicBool,
}

/// What `start` needs once a wait attempt has been admitted.
pub(crate) struct Admission<'i> {
    pub(crate) rwlock: &'i InstanceInner,
    pub(crate) timer: TimerFn,
    pub(crate) timed: bool,
    pub(crate) thread: u64,
}

impl GlobalPolicy {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            timer: config.timer,
            track_hold_time: AtomicBool::new(config.track_hold_time),
        }
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed) && self.timer.is_some()
    }

    pub(crate) fn set_track_hold_time(&self, track: bool) {
        self.track_hold_time.store(track, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn active_timer(&self) -> Option<TimerFn> {
        if self.enabled.load(Ordering::Relaxed) {
            self.timer
        } else {
            None
        }
    }

    /// Timer to use for hold-time accounting, if hold times are tracked.
    #[inline]
    pub(crate) fn hold_timer(&self) -> Option<TimerFn> {
        if self.track_hold_time.load(Ordering::Relaxed) {
            self.active_timer()
        } else {
            None
        }
    }

    #[inline]
    pub(crate) fn admit<'i>(&self, rwlock: &'i RwlockInstance) -> Option<Admission<'i>> {
        let inner = rwlock.inner()?;
        if !inner.enabled.load(Ordering::Relaxed) {
            return None;
        }
        let timer = self.active_timer()?;
        let class = &inner.class;
        if !class.enabled.load(Ordering::Relaxed) {
            return None;
        }
        let thread = thread::instrumented_thread_id()?;
        Some(Admission {
            rwlock: inner,
            timer,
            timed: class.timed.load(Ordering::Relaxed),
            thread,
        })
    }
}
