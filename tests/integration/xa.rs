//! XA branches through the assembled server, across restarts

use crate::common::*;

/// Start `xid` on a fresh session, log one record in it and end it
fn run_branch(server: &TestServer, x: &Xid) -> SessionId {
    let (session, _) = server.warden.open_session();
    let branches = server.warden.branches();
    branches
        .start(x, Some(DB), session, TransactionMode::read_write(), StartOption::New)
        .unwrap();
    branches
        .with_transaction(x, session, |txn| {
            let id = txn.id().unwrap();
            txn.store_log(LogCategory::Database(DB), &LogRecord::StatementCommit { txn: id })
        })
        .unwrap();
    branches.end(x, session, EndOption::Unknown).unwrap();
    session
}

#[test]
fn test_two_phase_commit() {
    let server = TestServer::new();
    let x = xid("gtrid1", "bq1");
    run_branch(&server, &x);

    let branches = server.warden.branches();
    branches.prepare(&x).unwrap();
    branches.commit(&x, false).unwrap();
    assert_eq!(branches.status(&x), BranchStatus::NonExistent);
    assert!(matches!(
        branches.commit(&x, false),
        Err(Error::XaUnknownIdentifier(_))
    ));

    // Nothing to rebuild
    let server = server.restart();
    assert_eq!(server.warden.recovery_stats().pending, 0);
    assert!(server.warden.branches().is_empty());
}

#[test]
fn test_heuristic_rollback_survives_restart() {
    let server = TestServer::new();
    let x = xid("gtrid1", "bq1");
    run_branch(&server, &x);
    server.warden.branches().prepare(&x).unwrap();

    let server = server.restart();
    let stats = server.warden.recovery_stats();
    assert_eq!(stats.checkpoints, 1);
    assert_eq!(stats.pending, 1);

    let branches = server.warden.branches();
    assert_eq!(branches.status(&x), BranchStatus::HeuristicallyCompleted);
    assert_eq!(branches.heur_completion_info()[0].decision, HeurDecision::Rollback);
    assert!(matches!(branches.rollback(&x), Err(Error::XaHeurRollback(_))));
    assert!(matches!(branches.commit(&x, false), Err(Error::XaHeurRollback(_))));

    branches.forget(&x).unwrap();
    assert!(matches!(branches.forget(&x), Err(Error::XaUnknownIdentifier(_))));

    let server = server.restart();
    assert_eq!(server.warden.recovery_stats().pending, 0);
    assert_eq!(server.warden.branches().status(&x), BranchStatus::NonExistent);
}

#[test]
fn test_heuristic_decision_survives_crash() {
    let server = TestServer::new();
    let x = xid("gtrid1", "bq1");
    run_branch(&server, &x);
    let branches = server.warden.branches();
    branches.prepare(&x).unwrap();
    assert_eq!(branches.decide_heuristically(&x).unwrap(), HeurDecision::Rollback);

    let server = server.crash();
    let stats = server.warden.recovery_stats();
    assert_eq!(stats.checkpoints, 0);
    assert_eq!(stats.heur_decisions, 1);
    assert_eq!(
        server.warden.branches().status(&x),
        BranchStatus::HeuristicallyCompleted
    );
}

#[test]
fn test_shutdown_rolls_back_idle_branches() {
    let server = TestServer::new();
    let idle = xid("idle", "bq1");
    let prepared = xid("prepared", "bq1");
    run_branch(&server, &idle);
    run_branch(&server, &prepared);
    server.warden.branches().prepare(&prepared).unwrap();

    let summary = server.warden.shutdown().unwrap();
    assert_eq!(summary.rolled_back, 1);
    assert_eq!(summary.decided, 1);
    assert_eq!(
        server.warden.branches().ids(None, None),
        vec![prepared.clone()]
    );
}

#[test]
fn test_session_cannot_start_two_branches() {
    let server = TestServer::new();
    let (session, _) = server.warden.open_session();
    let branches = server.warden.branches();
    let a = xid("gtrid1", "bq1");
    let b = xid("gtrid1", "bq2");

    branches
        .start(&a, Some(DB), session, TransactionMode::read_write(), StartOption::New)
        .unwrap();
    assert!(matches!(
        branches.start(&b, Some(DB), session, TransactionMode::read_write(), StartOption::New),
        Err(Error::XaInsideActiveBranch(_))
    ));

    branches.end(&a, session, EndOption::Unknown).unwrap();
    branches
        .start(&b, Some(DB), session, TransactionMode::read_write(), StartOption::New)
        .unwrap();
    assert_eq!(branches.ids(Some(session), None), vec![b.clone()]);
    branches.end(&b, session, EndOption::Unknown).unwrap();
    branches.rollback(&a).unwrap();
    branches.rollback(&b).unwrap();
    assert!(branches.is_empty());
}

#[test]
fn test_branch_locks_released_at_commit() {
    let server = TestServer::new();
    let (session, _) = server.warden.open_session();
    let (_, other) = server.warden.open_session();
    let branches = server.warden.branches();
    let x = xid("gtrid1", "bq1");
    let name = LockName::table(DB, 1);

    branches
        .start(&x, Some(DB), session, TransactionMode::read_write(), StartOption::New)
        .unwrap();
    branches
        .with_transaction(&x, session, |txn| {
            txn.lock(&name, LockMode::X, LockDuration::Middle, Timeout::IMMEDIATE)
        })
        .unwrap();
    branches.end(&x, session, EndOption::Unknown).unwrap();
    branches.prepare(&x).unwrap();

    // Prepared branches keep their locks after the session has left
    let mut txn = other.lock();
    txn.begin(Some(DB), TransactionMode::read_write()).unwrap();
    assert!(!txn
        .lock(&name, LockMode::S, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap());

    branches.commit(&x, false).unwrap();
    assert!(txn
        .lock(&name, LockMode::S, LockDuration::Middle, Timeout::IMMEDIATE)
        .unwrap());
    txn.commit().unwrap();
}
