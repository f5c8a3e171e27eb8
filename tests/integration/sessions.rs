//! Server sessions, configuration and cancellation

use crate::common::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use warden::IsolationLevel;

#[test]
fn test_open_dir_uses_config_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(warden::CONFIG_FILE_NAME),
        "log_path = \"logs/system.log\"\n\n[trans]\nisolation_level = \"repeatable_read\"\n",
    )
    .unwrap();

    let warden = Warden::open_dir(dir.path()).unwrap();
    assert_eq!(
        warden.config().log_path,
        Some(dir.path().join("logs/system.log"))
    );
    let (_, shared) = warden.open_session();
    let mut txn = shared.lock();
    txn.begin(Some(DB), TransactionMode::read_write()).unwrap();
    assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
    txn.commit().unwrap();
    drop(txn);

    warden.shutdown().unwrap();
    assert!(dir.path().join("logs/system.log").exists());
}

#[test]
fn test_open_dir_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(warden::CONFIG_FILE_NAME), "[lock]\nwait_slice_ms = 0\n").unwrap();
    assert!(matches!(Warden::open_dir(dir.path()), Err(Error::Config(_))));
}

#[test]
fn test_cancel_blocked_session() {
    init_tracing();
    let warden = Arc::new(Warden::open(WardenConfig::for_testing()).unwrap());
    let name = LockName::table(DB, 1);

    let (_, holder) = warden.open_session();
    let mut h = holder.lock();
    h.begin(Some(DB), TransactionMode::read_write()).unwrap();
    h.lock(&name, LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap();

    let (waiting, waiter) = warden.open_session();
    let handle = {
        let name = name.clone();
        thread::spawn(move || {
            let mut txn = waiter.lock();
            txn.begin(Some(DB), TransactionMode::read_write()).unwrap();
            let result = txn.lock(&name, LockMode::S, LockDuration::Middle, Timeout::Unlimited);
            txn.rollback().unwrap();
            result
        })
    };

    wait_for_waiters(&warden, 1);
    thread::sleep(Duration::from_millis(10));
    assert!(warden.cancel(waiting));
    assert!(matches!(handle.join().unwrap(), Err(Error::Cancelled)));
    h.commit().unwrap();
}

#[test]
fn test_cancel_session_working_in_branch() {
    init_tracing();
    let warden = Arc::new(Warden::open(WardenConfig::for_testing()).unwrap());
    let name = LockName::table(DB, 1);
    let (holder, x1) = (warden.open_session().0, xid("gtrid1", "bq1"));
    let (waiting, x2) = (warden.open_session().0, xid("gtrid2", "bq1"));

    let branches = warden.branches();
    for (session, x) in [(holder, &x1), (waiting, &x2)] {
        branches
            .start(x, Some(DB), session, TransactionMode::read_write(), StartOption::New)
            .unwrap();
    }
    branches
        .with_transaction(&x1, holder, |txn| {
            txn.lock(&name, LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
        })
        .unwrap();

    let handle = {
        let warden = Arc::clone(&warden);
        let (name, x2) = (name.clone(), x2.clone());
        thread::spawn(move || {
            warden.branches().with_transaction(&x2, waiting, |txn| {
                txn.lock(&name, LockMode::S, LockDuration::Middle, Timeout::Unlimited)
            })
        })
    };

    wait_for_waiters(&warden, 1);
    assert_eq!(warden.branches().status(&x2), BranchStatus::Active);
    assert!(warden.cancel(waiting));
    assert!(matches!(handle.join().unwrap(), Err(Error::Cancelled)));

    let branches = warden.branches();
    for (session, x) in [(waiting, &x2), (holder, &x1)] {
        branches.end(x, session, EndOption::Unknown).unwrap();
        branches.rollback(x).unwrap();
    }
    assert!(branches.is_empty());
}

#[test]
fn test_closing_session_releases_its_locks() {
    let warden = Warden::open(WardenConfig::for_testing()).unwrap();
    let name = LockName::table(DB, 1);

    let (first, shared) = warden.open_session();
    {
        let mut txn = shared.lock();
        txn.begin(Some(DB), TransactionMode::read_write()).unwrap();
        txn.lock(&name, LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
            .unwrap();
    }
    drop(shared);
    warden.close_session(first);
    assert_eq!(warden.transactions().session_count(), 0);

    let (_, shared) = warden.open_session();
    let mut txn = shared.lock();
    txn.begin(Some(DB), TransactionMode::read_write()).unwrap();
    assert!(txn
        .lock(&name, LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap());
    txn.commit().unwrap();
}
