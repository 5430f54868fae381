use std::sync::LazyLock;
use std::time::Instant;

/// Monotonic timer source injected into the engine. Units are up to the
/// host; the default counts nanoseconds.
pub type TimerFn = fn() -> u64;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Nanoseconds since the first call in this process.
pub fn monotonic_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}
