//! Shared snapshot types for lockscope.
//!
//! These are the read-only views handed to reporting collaborators. They
//! live in their own crate so a consumer can deserialize a dump without
//! pulling in the instrumentation engine.

use facet::Facet;

/// Instrumented rwlock key. `0` always means "not instrumented".
pub type RwlockKey = u32;

/// The reserved key for locks that are not instrumented.
pub const DISABLED_KEY: RwlockKey = 0;

// ── Operations ───────────────────────────────────────────────────

/// Operation performed on an instrumented rwlock.
///
/// Plain read/write locks use `ReadLock`/`WriteLock` and their `Try`
/// variants. Shared-exclusive (SX) locks use the `Shared*` and `Exclusive*`
/// operations. Numeric values are part of the interface and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum RwlockOperation {
    ReadLock = 0,
    WriteLock = 1,
    TryReadLock = 2,
    TryWriteLock = 3,
    SharedLock = 4,
    SharedExclusiveLock = 5,
    ExclusiveLock = 6,
    TrySharedLock = 7,
    TrySharedExclusiveLock = 8,
    TryExclusiveLock = 9,
}

impl RwlockOperation {
    pub const COUNT: usize = 10;

    pub const ALL: [RwlockOperation; Self::COUNT] = [
        RwlockOperation::ReadLock,
        RwlockOperation::WriteLock,
        RwlockOperation::TryReadLock,
        RwlockOperation::TryWriteLock,
        RwlockOperation::SharedLock,
        RwlockOperation::SharedExclusiveLock,
        RwlockOperation::ExclusiveLock,
        RwlockOperation::TrySharedLock,
        RwlockOperation::TrySharedExclusiveLock,
        RwlockOperation::TryExclusiveLock,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this operation admits concurrent plain readers. Shared-exclusive
    /// (upgradable) acquisitions count as read-side: they only exclude
    /// writers and each other, and their holder is tracked as a reader.
    pub fn is_read_side(self) -> bool {
        matches!(
            self,
            RwlockOperation::ReadLock
                | RwlockOperation::TryReadLock
                | RwlockOperation::SharedLock
                | RwlockOperation::SharedExclusiveLock
                | RwlockOperation::TrySharedLock
                | RwlockOperation::TrySharedExclusiveLock
        )
    }

    pub fn is_try(self) -> bool {
        matches!(
            self,
            RwlockOperation::TryReadLock
                | RwlockOperation::TryWriteLock
                | RwlockOperation::TrySharedLock
                | RwlockOperation::TrySharedExclusiveLock
                | RwlockOperation::TryExclusiveLock
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            RwlockOperation::ReadLock => "read_lock",
            RwlockOperation::WriteLock => "write_lock",
            RwlockOperation::TryReadLock => "try_read_lock",
            RwlockOperation::TryWriteLock => "try_write_lock",
            RwlockOperation::SharedLock => "shared_lock",
            RwlockOperation::SharedExclusiveLock => "shared_exclusive_lock",
            RwlockOperation::ExclusiveLock => "exclusive_lock",
            RwlockOperation::TrySharedLock => "try_shared_lock",
            RwlockOperation::TrySharedExclusiveLock => "try_shared_exclusive_lock",
            RwlockOperation::TryExclusiveLock => "try_exclusive_lock",
        }
    }
}

impl std::fmt::Display for RwlockOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a wait attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum WaitOutcome {
    Succeeded = 0,
    Failed = 1,
}

impl WaitOutcome {
    pub const COUNT: usize = 2;

    /// Maps a lock return code to an outcome: `0` is success, anything else
    /// (busy, timed out, deadlock) is a failure.
    #[inline]
    pub fn from_rc(rc: i32) -> Self {
        if rc == 0 {
            WaitOutcome::Succeeded
        } else {
            WaitOutcome::Failed
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

// ── Volatility ───────────────────────────────────────────────────

/// How often new instances of a lock class are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Facet)]
#[repr(u8)]
pub enum Volatility {
    #[default]
    Unknown = 0,
    Permanent = 1,
    Provisioning = 2,
    Ddl = 3,
    Cache = 4,
    Session = 5,
    Transaction = 6,
    Query = 7,
    IntraQuery = 8,
}

impl Volatility {
    /// Out-of-range values map to `Unknown`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Volatility::Permanent,
            2 => Volatility::Provisioning,
            3 => Volatility::Ddl,
            4 => Volatility::Cache,
            5 => Volatility::Session,
            6 => Volatility::Transaction,
            7 => Volatility::Query,
            8 => Volatility::IntraQuery,
            _ => Volatility::Unknown,
        }
    }
}

// ── Statistics snapshots ─────────────────────────────────────────

/// Counters for one `(operation, outcome)` bucket. Times are in timer units
/// (nanoseconds with the default timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Facet)]
pub struct WaitStatSnapshot {
    pub count: u64,
    pub sum: u64,
    /// `None` when no timed sample has been recorded.
    pub min: Option<u64>,
    pub max: u64,
}

impl WaitStatSnapshot {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Folds `other` into `self`, as if both sample streams had been recorded
    /// into one bucket.
    pub fn merge(&mut self, other: &WaitStatSnapshot) {
        // The live counters wrap, so folding them must too.
        self.count = self.count.wrapping_add(other.count);
        self.sum = self.sum.wrapping_add(other.sum);
        self.max = self.max.max(other.max);
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn avg(&self) -> Option<u64> {
        (self.count > 0).then(|| self.sum / self.count)
    }
}

/// Both outcome buckets for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct OperationStatSnapshot {
    pub operation: RwlockOperation,
    pub succeeded: WaitStatSnapshot,
    pub failed: WaitStatSnapshot,
}

impl OperationStatSnapshot {
    pub fn empty(operation: RwlockOperation) -> Self {
        Self {
            operation,
            succeeded: WaitStatSnapshot::default(),
            failed: WaitStatSnapshot::default(),
        }
    }

    pub fn bucket(&self, outcome: WaitOutcome) -> &WaitStatSnapshot {
        match outcome {
            WaitOutcome::Succeeded => &self.succeeded,
            WaitOutcome::Failed => &self.failed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }
}

/// Full statistics block for an instance or a class.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct RwlockStatsBlock {
    /// One entry per operation, indexed by the operation's numeric value.
    pub operations: Vec<OperationStatSnapshot>,
    /// Write-side hold times, recorded on unlock.
    pub write_hold: WaitStatSnapshot,
}

impl RwlockStatsBlock {
    pub fn empty() -> Self {
        Self {
            operations: RwlockOperation::ALL
                .iter()
                .map(|&op| OperationStatSnapshot::empty(op))
                .collect(),
            write_hold: WaitStatSnapshot::default(),
        }
    }

    pub fn bucket(&self, operation: RwlockOperation, outcome: WaitOutcome) -> &WaitStatSnapshot {
        self.operations[operation.index()].bucket(outcome)
    }

    pub fn merge(&mut self, other: &RwlockStatsBlock) {
        for (mine, theirs) in self.operations.iter_mut().zip(&other.operations) {
            mine.succeeded.merge(&theirs.succeeded);
            mine.failed.merge(&theirs.failed);
        }
        self.write_hold.merge(&other.write_hold);
    }

    /// Roll-up of every read-side (or write-side) operation for one outcome.
    pub fn side_total(&self, read_side: bool, outcome: WaitOutcome) -> WaitStatSnapshot {
        let mut total = WaitStatSnapshot::default();
        for op in self
            .operations
            .iter()
            .filter(|o| o.operation.is_read_side() == read_side)
        {
            total.merge(op.bucket(outcome));
        }
        total
    }

    pub fn total_waits(&self) -> u64 {
        self.operations
            .iter()
            .map(|o| o.succeeded.count + o.failed.count)
            .sum()
    }
}

/// Snapshot of one live instrumented rwlock.
#[derive(Debug, Clone, Facet)]
pub struct RwlockInstanceSnapshot {
    pub key: RwlockKey,
    pub class_name: String,
    /// Address or handle of the real lock this instance shadows.
    pub identity: u64,
    pub enabled: bool,
    pub readers: u32,
    pub write_locked: bool,
    pub stats: RwlockStatsBlock,
}

/// Snapshot of one registered rwlock class (key).
#[derive(Debug, Clone, Facet)]
pub struct RwlockClassSnapshot {
    pub key: RwlockKey,
    pub name: String,
    pub documentation: Option<String>,
    pub volatility: Volatility,
    pub singleton: bool,
    pub enabled: bool,
    pub timed: bool,
    pub live_instances: u32,
    /// Totals across destroyed and live instances of this key.
    pub stats: RwlockStatsBlock,
}

/// Snapshot of everything the engine tracks.
#[derive(Debug, Clone, Facet)]
pub struct RwlockStatsSnapshot {
    pub interface_version: u32,
    pub classes: Vec<RwlockClassSnapshot>,
    pub instances: Vec<RwlockInstanceSnapshot>,
    pub classes_lost: u64,
    pub instances_lost: u64,
}
