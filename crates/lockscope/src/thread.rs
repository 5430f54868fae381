//! Per-thread instrumentation context.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

struct ThreadContext {
    id: u64,
    instrumented: Cell<bool>,
}

thread_local! {
    static CURRENT: ThreadContext = ThreadContext {
        id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
        instrumented: Cell::new(true),
    };
}

/// Instrumentation id of the calling thread. Ids start at 1 and are never
/// reused.
pub fn current_thread_id() -> u64 {
    CURRENT.with(|t| t.id)
}

/// Switches instrumentation on or off for the calling thread only.
pub fn set_thread_instrumented(instrumented: bool) {
    CURRENT.with(|t| t.instrumented.set(instrumented));
}

pub fn is_thread_instrumented() -> bool {
    CURRENT.try_with(|t| t.instrumented.get()).unwrap_or(false)
}

/// Id of the calling thread if it is instrumented. `None` also during
/// thread-local teardown.
#[inline]
pub(crate) fn instrumented_thread_id() -> Option<u64> {
    CURRENT
        .try_with(|t| t.instrumented.get().then_some(t.id))
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_per_thread() {
        let here = current_thread_id();
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, current_thread_id());
    }

    #[test]
    fn disabling_only_affects_the_calling_thread() {
        std::thread::spawn(|| {
            assert!(instrumented_thread_id().is_some());
            set_thread_instrumented(false);
            assert!(instrumented_thread_id().is_none());
            assert!(!is_thread_instrumented());

            let other = std::thread::spawn(is_thread_instrumented).join().unwrap();
            assert!(other);

            set_thread_instrumented(true);
            assert_eq!(instrumented_thread_id(), Some(current_thread_id()));
        })
        .join()
        .unwrap();
    }
}
