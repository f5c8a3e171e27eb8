//! Locking through transactions of the assembled server

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use warden::{IsolationLevel, LockCategory, LockConfig};

/// Lock `tuple` and its ancestors the way an operation on it should
fn lock_for_tuple(txn: &warden::Transaction, table: u32, tuple: u32, read_only: bool, timeout: Timeout) -> warden::Result<bool> {
    let names = [
        (LockName::database(DB), LockCategory::Database),
        (LockName::table(DB, table), LockCategory::Table),
        (LockName::tuple(DB, table, tuple), LockCategory::Tuple),
    ];
    for (name, category) in names {
        let (mode, duration) = txn.adequate_lock(category, LockCategory::Tuple, read_only, false);
        if !txn.lock(&name, mode, duration, timeout)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[test]
fn test_writer_blocks_committed_reader() {
    let warden = Warden::open(WardenConfig::for_testing()).unwrap();
    let (_, writer) = warden.open_session();
    let (_, reader) = warden.open_session();

    let mut w = writer.lock();
    w.begin(Some(DB), TransactionMode::read_write().with_isolation(IsolationLevel::ReadCommitted))
        .unwrap();
    assert!(lock_for_tuple(&w, 1, 1, false, Timeout::IMMEDIATE).unwrap());
    assert_eq!(w.client().held_mode(&LockName::table(DB, 1)), LockMode::IX);
    assert_eq!(w.client().held_mode(&LockName::tuple(DB, 1, 1)), LockMode::X);

    let mut r = reader.lock();
    r.begin(Some(DB), TransactionMode::read_only().with_isolation(IsolationLevel::ReadCommitted))
        .unwrap();
    // Another tuple of the same table is free
    assert!(lock_for_tuple(&r, 1, 2, true, Timeout::IMMEDIATE).unwrap());
    assert!(!lock_for_tuple(&r, 1, 1, true, Timeout::After(Duration::from_millis(20))).unwrap());

    w.commit().unwrap();
    assert!(lock_for_tuple(&r, 1, 1, true, Timeout::IMMEDIATE).unwrap());
    r.commit().unwrap();
}

#[test]
fn test_serializable_writer_takes_table() {
    let warden = Warden::open(WardenConfig::for_testing()).unwrap();
    let (_, writer) = warden.open_session();
    let (_, other) = warden.open_session();

    let mut w = writer.lock();
    w.begin(Some(DB), TransactionMode::read_write()).unwrap();
    assert!(lock_for_tuple(&w, 1, 1, false, Timeout::IMMEDIATE).unwrap());
    assert_eq!(w.client().held_mode(&LockName::table(DB, 1)), LockMode::X);

    let mut o = other.lock();
    o.begin(Some(DB), TransactionMode::read_write()).unwrap();
    assert!(!lock_for_tuple(&o, 1, 2, false, Timeout::IMMEDIATE).unwrap());
    o.rollback().unwrap();
    w.commit().unwrap();
}

#[test]
fn test_snapshot_reader_ignores_writers() {
    let warden = Warden::open(WardenConfig::for_testing()).unwrap();
    let (_, writer) = warden.open_session();
    let (_, reader) = warden.open_session();

    let mut w = writer.lock();
    w.begin(Some(DB), TransactionMode::read_write().with_isolation(IsolationLevel::ReadCommitted))
        .unwrap();
    assert!(lock_for_tuple(&w, 1, 1, false, Timeout::IMMEDIATE).unwrap());

    let mut r = reader.lock();
    r.begin(Some(DB), TransactionMode::read_only().with_snapshot(true)).unwrap();
    assert!(r.is_versioning());
    assert!(lock_for_tuple(&r, 1, 1, true, Timeout::IMMEDIATE).unwrap());
    assert_eq!(r.client().held_mode(&LockName::database(DB)), LockMode::VS);
    assert_eq!(r.client().held_mode(&LockName::tuple(DB, 1, 1)), LockMode::N);

    r.commit().unwrap();
    w.commit().unwrap();
}

#[test]
fn test_deadlock_between_transactions() {
    init_tracing();
    let warden = Arc::new(Warden::open(WardenConfig::for_testing()).unwrap());
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |own: u32, other: u32| {
        let warden = Arc::clone(&warden);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let (session, shared) = warden.open_session();
            let mut txn = shared.lock();
            txn.begin(Some(DB), TransactionMode::read_write()).unwrap();
            assert!(txn
                .lock(&LockName::table(DB, own), LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
                .unwrap());
            barrier.wait();
            let result = txn.lock(
                &LockName::table(DB, other),
                LockMode::X,
                LockDuration::Middle,
                Timeout::After(Duration::from_secs(10)),
            );
            match &result {
                Ok(_) => txn.commit().unwrap(),
                Err(_) => txn.rollback().unwrap(),
            }
            drop(txn);
            warden.close_session(session);
            result
        })
    };

    let a = spawn(1, 2);
    let b = spawn(2, 1);
    let results = [a.join().unwrap(), b.join().unwrap()];

    let victims = results
        .iter()
        .filter(|r| matches!(r, Err(Error::Deadlock(_))))
        .count();
    let survivors = results.iter().filter(|r| matches!(r, Ok(true))).count();
    assert_eq!(victims, 1, "results: {:?}", results);
    assert_eq!(survivors, 1, "results: {:?}", results);
    assert_eq!(warden.lock_manager().stats().deadlocks, 1);
}

#[test]
fn test_session_locks_outlive_transactions() {
    let warden = Warden::open(WardenConfig::for_testing()).unwrap();
    let (_, shared) = warden.open_session();
    let mut txn = shared.lock();
    let name = LockName::database(DB);

    txn.lock(&name, LockMode::S, LockDuration::Long, Timeout::IMMEDIATE)
        .unwrap();
    txn.begin(Some(DB), TransactionMode::read_write()).unwrap();
    txn.lock(&LockName::table(DB, 1), LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap();
    txn.commit().unwrap();

    assert_eq!(txn.client().held_locks(), vec![(name.clone(), LockMode::S)]);
    txn.unlock(&name, LockMode::S, LockDuration::Long).unwrap();
    assert!(txn.client().held_locks().is_empty());
}

#[test]
fn test_lack_of_parent_when_enabled() {
    let config = WardenConfig::for_testing().with_lock(LockConfig::for_testing().with_lack_of_parent_detection(true));
    let warden = Warden::open(config).unwrap();
    let (_, shared) = warden.open_session();
    let mut txn = shared.lock();
    txn.begin(Some(DB), TransactionMode::read_write()).unwrap();

    let tuple = LockName::tuple(DB, 1, 1);
    let err = txn
        .lock(&tuple, LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap_err();
    assert!(matches!(err, Error::LackOfParent(_)));

    txn.lock(&LockName::database(DB), LockMode::IX, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap();
    txn.lock(&LockName::table(DB, 1), LockMode::IX, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap();
    assert!(txn
        .lock(&tuple, LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap());
    txn.commit().unwrap();
}
