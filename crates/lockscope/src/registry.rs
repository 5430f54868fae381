//! Key registry: maps `(category, name)` pairs to small integer keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use lockscope_types::{DISABLED_KEY, RwlockClassSnapshot, RwlockKey, Volatility};

use crate::flags::RwlockFlags;
use crate::stats::RwlockStats;

pub const NAME_PREFIX: &str = "wait/synch/rwlock";

/// Registration record for one rwlock class.
///
/// `key` is the caller-owned slot the registry writes the assigned key into.
/// It stays `0` when the class could not be registered.
#[derive(Debug, Clone)]
pub struct RwlockInfo<'a> {
    pub key: RwlockKey,
    pub name: &'a str,
    pub flags: RwlockFlags,
    pub volatility: i32,
    pub documentation: Option<&'a str>,
}

impl<'a> RwlockInfo<'a> {
    pub fn new(name: &'a str) -> Self {
        Self {
            key: DISABLED_KEY,
            name,
            flags: RwlockFlags::empty(),
            volatility: 0,
            documentation: None,
        }
    }

    pub fn flags(mut self, flags: RwlockFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn volatility(mut self, volatility: Volatility) -> Self {
        self.volatility = volatility as i32;
        self
    }

    pub fn documentation(mut self, documentation: &'a str) -> Self {
        self.documentation = Some(documentation);
        self
    }
}

/// Runtime record of a registered class, shared by all its instances.
#[derive(Debug)]
pub(crate) struct RwlockClass {
    pub(crate) key: RwlockKey,
    pub(crate) name: String,
    pub(crate) flags: RwlockFlags,
    pub(crate) volatility: Volatility,
    pub(crate) documentation: Option<String>,
    pub(crate) enabled: AtomicBool,
    pub(crate) timed: AtomicBool,
    pub(crate) live_instances: AtomicU32,
    /// Totals of destroyed instances, and the live stats of a singleton.
    pub(crate) stats: RwlockStats,
}

impl RwlockClass {
    #[inline]
    pub(crate) fn is_singleton(&self) -> bool {
        self.flags.contains(RwlockFlags::SINGLETON)
    }

    pub(crate) fn describe(&self) -> RwlockClassSnapshot {
        RwlockClassSnapshot {
            key: self.key,
            name: self.name.clone(),
            documentation: self.documentation.clone(),
            volatility: self.volatility,
            singleton: self.is_singleton(),
            enabled: self.enabled.load(Ordering::Relaxed),
            timed: self.timed.load(Ordering::Relaxed),
            live_instances: self.live_instances.load(Ordering::Relaxed),
            stats: self.stats.snapshot(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct KeyRegistry {
    /// Index `key - 1`.
    classes: Vec<Arc<RwlockClass>>,
    by_name: HashMap<String, RwlockKey>,
    capacity: usize,
    lost: u64,
}

impl KeyRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            classes: Vec::new(),
            by_name: HashMap::new(),
            capacity,
            lost: 0,
        }
    }

    /// Assigns keys to every entry of `infos`, reusing the key of a name that
    /// is already registered.
    pub(crate) fn register(&mut self, category: &str, infos: &mut [RwlockInfo<'_>]) {
        for info in infos.iter_mut() {
            let full_name = format!("{NAME_PREFIX}/{category}/{}", info.name);
            if let Some(&key) = self.by_name.get(&full_name) {
                info.key = key;
                continue;
            }

            if self.classes.len() >= self.capacity {
                self.lost += 1;
                tracing::warn!(
                    name = %full_name,
                    capacity = self.capacity,
                    "rwlock class registry full, instrumentation disabled for this class"
                );
                info.key = DISABLED_KEY;
                continue;
            }

            let key = (self.classes.len() + 1) as RwlockKey;
            let class = RwlockClass {
                key,
                name: full_name.clone(),
                flags: info.flags,
                volatility: Volatility::from_i32(info.volatility),
                documentation: info.documentation.map(str::to_string),
                enabled: AtomicBool::new(true),
                timed: AtomicBool::new(!info.flags.contains(RwlockFlags::TIMED_OFF)),
                live_instances: AtomicU32::new(0),
                stats: RwlockStats::default(),
            };
            tracing::debug!(key, name = %full_name, flags = ?info.flags, "registered rwlock class");
            self.classes.push(Arc::new(class));
            self.by_name.insert(full_name, key);
            info.key = key;
        }
    }

    pub(crate) fn class(&self, key: RwlockKey) -> Option<&Arc<RwlockClass>> {
        let index = (key as usize).checked_sub(1)?;
        self.classes.get(index)
    }

    pub(crate) fn classes(&self) -> &[Arc<RwlockClass>] {
        &self.classes
    }

    pub(crate) fn lost(&self) -> u64 {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infos<'a>(names: &[&'a str]) -> Vec<RwlockInfo<'a>> {
        names.iter().map(|&name| RwlockInfo::new(name)).collect()
    }

    #[test]
    fn keys_are_sequential_and_nonzero() {
        let mut registry = KeyRegistry::new(8);
        let mut batch = infos(&["LOCK_a", "LOCK_b", "LOCK_c"]);
        registry.register("sql", &mut batch);
        let keys: Vec<_> = batch.iter().map(|i| i.key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(
            registry.class(2).map(|c| c.name.as_str()),
            Some("wait/synch/rwlock/sql/LOCK_b")
        );
    }

    #[test]
    fn registering_twice_yields_the_same_key() {
        let mut registry = KeyRegistry::new(8);
        let mut first = infos(&["page_lock"]);
        registry.register("innodb", &mut first);

        let mut second = infos(&["other", "page_lock"]);
        registry.register("innodb", &mut second);

        assert_eq!(second[1].key, first[0].key);
        assert_ne!(second[0].key, first[0].key);
        assert_eq!(registry.classes().len(), 2);
    }

    #[test]
    fn same_name_in_another_category_is_a_new_class() {
        let mut registry = KeyRegistry::new(8);
        let mut a = infos(&["LOCK_status"]);
        let mut b = infos(&["LOCK_status"]);
        registry.register("sql", &mut a);
        registry.register("myisam", &mut b);
        assert_ne!(a[0].key, b[0].key);
    }

    #[test]
    fn exhausted_registry_leaves_key_at_zero() {
        let mut registry = KeyRegistry::new(1);
        let mut batch = infos(&["first", "second"]);
        registry.register("sql", &mut batch);
        assert_eq!(batch[0].key, 1);
        assert_eq!(batch[1].key, DISABLED_KEY);
        assert_eq!(registry.lost(), 1);

        // Already-known names still resolve after the registry is full.
        let mut again = infos(&["first"]);
        registry.register("sql", &mut again);
        assert_eq!(again[0].key, 1);
    }

    #[test]
    fn registration_metadata_is_kept() {
        let mut registry = KeyRegistry::new(8);
        let mut batch = vec![
            RwlockInfo::new("LOCK_global")
                .flags(RwlockFlags::SINGLETON | RwlockFlags::TIMED_OFF)
                .volatility(Volatility::Permanent)
                .documentation("Protects the global state."),
            RwlockInfo {
                volatility: 99,
                ..RwlockInfo::new("LOCK_odd")
            },
        ];
        registry.register("sql", &mut batch);

        let class = registry.class(batch[0].key).unwrap().describe();
        assert!(class.singleton);
        assert!(!class.timed);
        assert!(class.enabled);
        assert_eq!(class.volatility, Volatility::Permanent);
        assert_eq!(
            class.documentation.as_deref(),
            Some("Protects the global state.")
        );

        let odd = registry.class(batch[1].key).unwrap();
        assert_eq!(odd.volatility, Volatility::Unknown);
        assert!(registry.class(0).is_none());
        assert!(registry.class(3).is_none());
    }
}
