//! Lock-free wait statistics.
//!
//! Every counter is an independent atomic. A bucket's `count`, `sum`, `min`
//! and `max` are not updated as one unit, but no sample is ever lost or
//! counted twice: readers see some interleaving of completed updates.

use std::sync::atomic::{AtomicU64, Ordering};

use lockscope_types::{
    OperationStatSnapshot, RwlockOperation, RwlockStatsBlock, WaitOutcome, WaitStatSnapshot,
};

const NO_MIN: u64 = u64::MAX;

#[derive(Debug)]
pub(crate) struct WaitStat {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for WaitStat {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(NO_MIN),
            max: AtomicU64::new(0),
        }
    }
}

impl WaitStat {
    #[inline]
    pub(crate) fn record_timed(&self, elapsed: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(elapsed, Ordering::Relaxed);
        self.min.fetch_min(elapsed, Ordering::Relaxed);
        self.max.fetch_max(elapsed, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_untimed(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WaitStatSnapshot {
        let min = self.min.load(Ordering::Relaxed);
        WaitStatSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum: self.sum.load(Ordering::Relaxed),
            min: (min != NO_MIN).then_some(min),
            max: self.max.load(Ordering::Relaxed),
        }
    }

    /// Adds a whole stream of samples at once.
    pub(crate) fn absorb(&self, other: &WaitStatSnapshot) {
        if other.count == 0 {
            return;
        }
        self.count.fetch_add(other.count, Ordering::Relaxed);
        self.sum.fetch_add(other.sum, Ordering::Relaxed);
        if let Some(min) = other.min {
            self.min.fetch_min(min, Ordering::Relaxed);
        }
        self.max.fetch_max(other.max, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(NO_MIN, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }
}

/// Buckets indexed by `(operation, outcome)`, plus write hold time.
#[derive(Debug)]
pub(crate) struct RwlockStats {
    buckets: [[WaitStat; WaitOutcome::COUNT]; RwlockOperation::COUNT],
    write_hold: WaitStat,
}

impl Default for RwlockStats {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| std::array::from_fn(|_| WaitStat::default())),
            write_hold: WaitStat::default(),
        }
    }
}

impl RwlockStats {
    #[inline]
    pub(crate) fn bucket(&self, operation: RwlockOperation, outcome: WaitOutcome) -> &WaitStat {
        &self.buckets[operation.index()][outcome.index()]
    }

    #[inline]
    pub(crate) fn write_hold(&self) -> &WaitStat {
        &self.write_hold
    }

    pub(crate) fn snapshot(&self) -> RwlockStatsBlock {
        RwlockStatsBlock {
            operations: RwlockOperation::ALL
                .iter()
                .map(|&operation| OperationStatSnapshot {
                    operation,
                    succeeded: self.bucket(operation, WaitOutcome::Succeeded).snapshot(),
                    failed: self.bucket(operation, WaitOutcome::Failed).snapshot(),
                })
                .collect(),
            write_hold: self.write_hold.snapshot(),
        }
    }

    /// Folds another statistics block into this one.
    pub(crate) fn absorb(&self, other: &RwlockStats) {
        for (mine, theirs) in self.buckets.iter().zip(&other.buckets) {
            for (m, t) in mine.iter().zip(theirs) {
                m.absorb(&t.snapshot());
            }
        }
        self.write_hold.absorb(&other.write_hold.snapshot());
    }

    pub(crate) fn reset(&self) {
        for per_op in &self.buckets {
            for stat in per_op {
                stat.reset();
            }
        }
        self.write_hold.reset();
    }
}
