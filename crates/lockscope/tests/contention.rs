use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use lockscope::{
    Engine, EngineConfig, InstrumentedRwLock, RwlockFlags, RwlockInfo, RwlockLockerState,
    RwlockOperation, WaitOutcome,
};

const THREADS: usize = 8;
const ITERATIONS: usize = 500;

fn engine_with(names: &[&'static str]) -> (Engine, Vec<u32>) {
    let engine = Engine::new(EngineConfig::default());
    let mut infos: Vec<RwlockInfo<'_>> = names.iter().map(|&name| RwlockInfo::new(name)).collect();
    engine.register("contention", &mut infos);
    let keys = infos.iter().map(|info| info.key).collect();
    (engine, keys)
}

#[test]
fn concurrent_ends_are_all_counted() {
    let (engine, keys) = engine_with(&["LOCK_shared_counter"]);
    let rwlock = engine.create_instance(keys[0], 0x1000);

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let engine = &engine;
            let rwlock = &rwlock;
            s.spawn(move || {
                for i in 0..ITERATIONS {
                    let mut state = RwlockLockerState::new();
                    let (operation, read_side) = if (t + i) % 2 == 0 {
                        (RwlockOperation::ReadLock, true)
                    } else {
                        (RwlockOperation::WriteLock, false)
                    };
                    let locker = if read_side {
                        engine.start_read_wait(&mut state, rwlock, operation, Location::caller())
                    } else {
                        engine.start_write_wait(&mut state, rwlock, operation, Location::caller())
                    };
                    let Some(locker) = locker else {
                        panic!("instrumentation should be on");
                    };
                    let rc = if i % 10 == 0 { 16 } else { 0 };
                    if read_side {
                        engine.end_read_wait(locker, rc);
                    } else {
                        engine.end_write_wait(locker, rc);
                    }
                }
            });
        }
    });

    let snapshot = engine.snapshot_instance(&rwlock).unwrap();
    assert_eq!(snapshot.stats.total_waits() as usize, THREADS * ITERATIONS);

    let failed = snapshot.stats.side_total(true, WaitOutcome::Failed).count
        + snapshot.stats.side_total(false, WaitOutcome::Failed).count;
    assert_eq!(failed as usize, THREADS * (ITERATIONS / 10));

    for op in [RwlockOperation::ReadLock, RwlockOperation::WriteLock] {
        for outcome in [WaitOutcome::Succeeded, WaitOutcome::Failed] {
            let stat = snapshot.stats.bucket(op, outcome);
            if let Some(min) = stat.min {
                assert!(min <= stat.max);
                assert!(stat.max <= stat.sum);
            }
        }
    }
}

#[test]
fn wrapped_lock_under_contention() {
    let (engine, keys) = engine_with(&["LOCK_wrapped"]);
    let lock = Arc::new(InstrumentedRwLock::new(&engine, keys[0], 0u64));

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let lock = &lock;
            s.spawn(move || {
                for _ in 0..ITERATIONS / 10 {
                    if t % 2 == 0 {
                        *lock.write() += 1;
                    } else {
                        let _ = *lock.read();
                    }
                }
            });
        }
    });

    assert_eq!(*lock.read(), (THREADS / 2 * ITERATIONS / 10) as u64);

    let snapshot = engine.snapshot_instance(lock.instance()).unwrap();
    let writes = snapshot
        .stats
        .bucket(RwlockOperation::WriteLock, WaitOutcome::Succeeded);
    assert_eq!(writes.count as usize, THREADS / 2 * ITERATIONS / 10);
    assert_eq!(snapshot.stats.write_hold.count, writes.count);
    assert_eq!(snapshot.readers, 0);
    assert!(!snapshot.write_locked);
}

#[test]
fn try_write_fails_while_readers_hold_the_lock() {
    let (engine, keys) = engine_with(&["LOCK_try"]);
    let lock = InstrumentedRwLock::new(&engine, keys[0], ());

    let reader = lock.read();
    assert!(lock.try_write().is_none());
    assert!(lock.try_write_for(Duration::from_millis(5)).is_none());
    assert_eq!(engine.snapshot_instance(lock.instance()).unwrap().readers, 1);
    drop(reader);

    let snapshot = engine.snapshot_instance(lock.instance()).unwrap();
    let failed = snapshot.stats.side_total(false, WaitOutcome::Failed).count;
    assert_eq!(failed, 2);
    assert_eq!(snapshot.readers, 0);
}

#[test]
fn destroyed_locks_roll_up_into_their_key() {
    let (engine, keys) = engine_with(&["LOCK_buffer", "LOCK_log"]);
    let log = engine.create_instance(keys[1], 0x2000);

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let lock = InstrumentedRwLock::new(&engine, keys[0], Vec::<u8>::new());
                lock.write().push(1);
                lock.read().len()
            });
        }
    });

    let class = engine.snapshot_key(keys[0]).unwrap();
    assert_eq!(class.live_instances, 0);
    assert_eq!(class.stats.total_waits() as usize, THREADS * 2);
    assert_eq!(engine.snapshot_key(keys[1]).unwrap().live_instances, 1);
    drop(log);
}

#[test]
fn singleton_flag_is_reported() {
    let engine = Engine::default();
    let mut infos = [RwlockInfo::new("LOCK_global").flags(RwlockFlags::SINGLETON)];
    engine.register("contention", &mut infos);
    let lock = InstrumentedRwLock::new(&engine, infos[0].key, 1u8);
    drop(lock.read());

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.classes.len(), 1);
    assert!(snapshot.classes[0].singleton);
    assert_eq!(snapshot.classes[0].name, "wait/synch/rwlock/contention/LOCK_global");
    assert_eq!(snapshot.classes[0].stats.total_waits(), 1);
}
