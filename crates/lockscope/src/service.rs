//! Versioned service interface.
//!
//! A host binds one interface version and calls through the trait object.
//! A major version bump means an incompatible layout change; callers built
//! against an older version must not be mixed with a newer engine.

use std::panic::Location;

use lockscope_types::{RwlockKey, RwlockOperation};

use crate::engine::Engine;
use crate::instance::RwlockInstance;
use crate::locker::{RwlockLocker, RwlockLockerState};
use crate::registry::RwlockInfo;

pub const INTERFACE_VERSION_1: u32 = 1;
pub const CURRENT_INTERFACE_VERSION: u32 = INTERFACE_VERSION_1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceVersion {
    V1,
}

impl InterfaceVersion {
    pub const CURRENT: InterfaceVersion = InterfaceVersion::V1;

    pub fn from_u32(version: u32) -> Option<Self> {
        match version {
            INTERFACE_VERSION_1 => Some(InterfaceVersion::V1),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            InterfaceVersion::V1 => INTERFACE_VERSION_1,
        }
    }
}

/// The fixed set of entry points a host links against.
pub trait RwlockService: Send + Sync {
    fn version(&self) -> InterfaceVersion;

    fn register(&self, category: &str, infos: &mut [RwlockInfo<'_>]);

    fn create_instance(&self, key: RwlockKey, identity: u64) -> RwlockInstance;

    fn destroy_instance(&self, instance: RwlockInstance);

    fn start_read_wait<'s, 'i>(
        &self,
        state: &'s mut RwlockLockerState<'i>,
        rwlock: &'i RwlockInstance,
        operation: RwlockOperation,
        location: &'static Location<'static>,
    ) -> Option<RwlockLocker<'s, 'i>>;

    fn end_read_wait(&self, locker: RwlockLocker<'_, '_>, rc: i32);

    fn start_write_wait<'s, 'i>(
        &self,
        state: &'s mut RwlockLockerState<'i>,
        rwlock: &'i RwlockInstance,
        operation: RwlockOperation,
        location: &'static Location<'static>,
    ) -> Option<RwlockLocker<'s, 'i>>;

    fn end_write_wait(&self, locker: RwlockLocker<'_, '_>, rc: i32);

    fn notify_unlock(&self, rwlock: &RwlockInstance);
}

/// Version 1 of the interface, backed by an [`Engine`].
#[derive(Debug, Clone)]
pub struct RwlockServiceV1 {
    engine: Engine,
}

impl RwlockServiceV1 {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

impl RwlockService for RwlockServiceV1 {
    fn version(&self) -> InterfaceVersion {
        InterfaceVersion::V1
    }

    fn register(&self, category: &str, infos: &mut [RwlockInfo<'_>]) {
        self.engine.register(category, infos);
    }

    fn create_instance(&self, key: RwlockKey, identity: u64) -> RwlockInstance {
        self.engine.create_instance(key, identity)
    }

    fn destroy_instance(&self, instance: RwlockInstance) {
        self.engine.destroy_instance(instance);
    }

    fn start_read_wait<'s, 'i>(
        &self,
        state: &'s mut RwlockLockerState<'i>,
        rwlock: &'i RwlockInstance,
        operation: RwlockOperation,
        location: &'static Location<'static>,
    ) -> Option<RwlockLocker<'s, 'i>> {
        self.engine
            .start_read_wait(state, rwlock, operation, location)
    }

    fn end_read_wait(&self, locker: RwlockLocker<'_, '_>, rc: i32) {
        self.engine.end_read_wait(locker, rc);
    }

    fn start_write_wait<'s, 'i>(
        &self,
        state: &'s mut RwlockLockerState<'i>,
        rwlock: &'i RwlockInstance,
        operation: RwlockOperation,
        location: &'static Location<'static>,
    ) -> Option<RwlockLocker<'s, 'i>> {
        self.engine
            .start_write_wait(state, rwlock, operation, location)
    }

    fn end_write_wait(&self, locker: RwlockLocker<'_, '_>, rc: i32) {
        self.engine.end_write_wait(locker, rc);
    }

    fn notify_unlock(&self, rwlock: &RwlockInstance) {
        self.engine.notify_unlock(rwlock);
    }
}

impl Engine {
    /// Binds the service for a numeric interface version. Unknown versions
    /// get `None`.
    pub fn bind(&self, version: u32) -> Option<Box<dyn RwlockService>> {
        match InterfaceVersion::from_u32(version) {
            Some(InterfaceVersion::V1) => {
                tracing::debug!(version, "bound rwlock service");
                Some(Box::new(RwlockServiceV1::new(self.clone())))
            }
            None => {
                tracing::warn!(
                    version,
                    current = CURRENT_INTERFACE_VERSION,
                    "unsupported rwlock interface version"
                );
                None
            }
        }
    }
}
