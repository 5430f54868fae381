use bitflags::bitflags;

bitflags! {
    /// Registration flags for an rwlock class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RwlockFlags: u32 {
        /// Exactly one instance of this class is expected to exist. Its
        /// statistics are kept on the class itself.
        const SINGLETON = 1 << 0;
        /// The instrumented object can change identity (rebuilt in place).
        const MUTABLE = 1 << 1;
        /// The class reports progress (stage-like locks).
        const PROGRESS = 1 << 2;
        /// Start with timing switched off: waits are counted, not timed.
        const TIMED_OFF = 1 << 8;
    }
}

bitflags! {
    /// Engine-private bits carried in a locker state between start and end.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct LockerFlags: u32 {
        const WAITING = 1 << 0;
        const TIMED = 1 << 1;
        /// Started through the read-wait entry point.
        const READ_ENTRY = 1 << 2;
    }
}
