//! Locker state machine: one in-flight wait attempt.
//!
//! ```text
//! IDLE --start_*--> WAITING --end_*(rc == 0)--> COMPLETED_SUCCESS (back to IDLE)
//!                          \--end_*(rc != 0)--> COMPLETED_FAILURE (back to IDLE)
//! ```
//!
//! The caller owns the [`RwlockLockerState`] (usually on its stack) and keeps
//! the real blocking call between `start` and `end`, so no engine code runs
//! while the thread is blocked. `end` consumes the [`RwlockLocker`], which
//! makes a second `end` for the same start impossible. A locker that is
//! dropped without `end` (an abandoned attempt) records nothing.

use std::panic::Location;
use std::sync::atomic::Ordering;

use lockscope_types::{RwlockOperation, WaitOutcome};

use crate::flags::LockerFlags;
use crate::instance::{InstanceInner, WRITER_NONE, WRITER_TIMED, WRITER_UNTIMED};
use crate::policy::Admission;
use crate::timer::TimerFn;

/// Caller-provided storage for one wait attempt.
///
/// The fields are engine-private. A state can be reused for any number of
/// sequential attempts, but only by one thread at a time.
#[derive(Debug)]
pub struct RwlockLockerState<'i> {
    flags: LockerFlags,
    operation: RwlockOperation,
    rwlock: Option<&'i InstanceInner>,
    thread: u64,
    timer_start: u64,
    timer: Option<TimerFn>,
    location: Option<&'static Location<'static>>,
}

impl Default for RwlockLockerState<'_> {
    fn default() -> Self {
        Self {
            flags: LockerFlags::empty(),
            operation: RwlockOperation::ReadLock,
            rwlock: None,
            thread: 0,
            timer_start: 0,
            timer: None,
            location: None,
        }
    }
}

impl RwlockLockerState<'_> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a started attempt is waiting for its `end` call.
    pub fn is_waiting(&self) -> bool {
        self.flags.contains(LockerFlags::WAITING)
    }

    pub fn operation(&self) -> RwlockOperation {
        self.operation
    }

    /// Instrumentation id of the thread that started the attempt.
    pub fn thread_id(&self) -> u64 {
        self.thread
    }

    pub fn timer_start(&self) -> u64 {
        self.timer_start
    }

    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.location
    }
}

/// A live wait attempt. Pass it to the matching `end_*` call exactly once.
#[derive(Debug)]
#[must_use = "a started wait must be passed to the matching end call"]
pub struct RwlockLocker<'s, 'i> {
    state: &'s mut RwlockLockerState<'i>,
}

impl RwlockLocker<'_, '_> {
    pub fn operation(&self) -> RwlockOperation {
        self.state.operation
    }

    pub fn timer_start(&self) -> u64 {
        self.state.timer_start
    }
}

/// IDLE -> WAITING.
#[inline]
pub(crate) fn start<'s, 'i>(
    state: &'s mut RwlockLockerState<'i>,
    admission: Admission<'i>,
    operation: RwlockOperation,
    read_entry: bool,
    location: &'static Location<'static>,
) -> RwlockLocker<'s, 'i> {
    let mut flags = LockerFlags::WAITING;
    if read_entry {
        flags |= LockerFlags::READ_ENTRY;
    }
    if admission.timed {
        flags |= LockerFlags::TIMED;
        state.timer_start = (admission.timer)();
    } else {
        state.timer_start = 0;
    }
    state.flags = flags;
    state.operation = operation;
    state.rwlock = Some(admission.rwlock);
    state.thread = admission.thread;
    state.timer = Some(admission.timer);
    state.location = Some(location);
    RwlockLocker { state }
}

/// WAITING -> COMPLETED_SUCCESS / COMPLETED_FAILURE, then back to IDLE.
#[inline]
pub(crate) fn end(locker: RwlockLocker<'_, '_>, rc: i32) {
    let state = locker.state;
    let Some(rwlock) = state.rwlock.take() else {
        return;
    };
    let outcome = WaitOutcome::from_rc(rc);
    let bucket = rwlock.stats().bucket(state.operation, outcome);

    let timed_now = match state.timer {
        Some(timer) if state.flags.contains(LockerFlags::TIMED) => {
            let now = timer();
            bucket.record_timed(now.saturating_sub(state.timer_start));
            Some(now)
        }
        _ => {
            bucket.record_untimed();
            None
        }
    };

    if outcome == WaitOutcome::Succeeded {
        if state.flags.contains(LockerFlags::READ_ENTRY) {
            rwlock.readers.fetch_add(1, Ordering::Relaxed);
        } else {
            match timed_now {
                Some(now) => {
                    rwlock.write_acquired_at.store(now, Ordering::Relaxed);
                    rwlock.writer.store(WRITER_TIMED, Ordering::Release);
                }
                None => rwlock.writer.store(WRITER_UNTIMED, Ordering::Release),
            }
        }
    }

    state.flags = LockerFlags::empty();
}

/// Release bookkeeping: clears the writer, or drops one reader.
#[inline]
pub(crate) fn unlock(rwlock: &InstanceInner, hold_timer: Option<TimerFn>) {
    match rwlock.writer.swap(WRITER_NONE, Ordering::Acquire) {
        WRITER_NONE => {
            let _ = rwlock
                .readers
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
        WRITER_TIMED => {
            if let Some(timer) = hold_timer {
                let acquired = rwlock.write_acquired_at.load(Ordering::Relaxed);
                rwlock
                    .stats()
                    .write_hold()
                    .record_timed(timer().saturating_sub(acquired));
            }
        }
        _ => {}
    }
}
