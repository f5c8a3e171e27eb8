//! XA transaction branch state machine
//!
//! ```text
//! NonExistent -> Active                 start
//! Active -> Idle                        end(Unknown)
//! Active -> Suspended                   end(Suspend)   not supported
//! Active -> SuspendedForMigrate         end(Migrate)   not supported
//! Idle -> Prepared                      prepare
//! Idle -> RollbackOnly                  fail
//! Idle -> NonExistent                   commit(one phase)
//! Prepared -> NonExistent               commit
//! Idle|RollbackOnly|Prepared -> NonExistent   rollback
//! Prepared -> HeuristicallyCompleted    decide heuristically (something logged)
//! Prepared -> NonExistent               decide heuristically (nothing logged)
//! HeuristicallyCompleted -> NonExistent forget
//! ```
//!
//! [`transition`] is the table as a pure function. Checks that depend on
//! the calling session (association, an active branch elsewhere, a
//! transaction already running) are made by the
//! [`BranchManager`](crate::BranchManager) before it consults the table.

use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::fmt;
use warden_core::{Error, HeurDecision, Result, SessionId, Xid};

/// State of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BranchStatus {
    /// No such branch
    #[default]
    NonExistent,
    /// Associated with a session doing work
    Active,
    /// Suspended by its session
    Suspended,
    /// Suspended so that another session can resume it
    SuspendedForMigrate,
    /// Work done, awaiting prepare or commit
    Idle,
    /// Can only be rolled back
    RollbackOnly,
    /// First phase of two-phase commit done
    Prepared,
    /// Resolved without the coordinator; awaiting forget
    HeuristicallyCompleted,
}

impl BranchStatus {
    /// Every status, for table-driven checks
    pub const ALL: [BranchStatus; 8] = [
        BranchStatus::NonExistent,
        BranchStatus::Active,
        BranchStatus::Suspended,
        BranchStatus::SuspendedForMigrate,
        BranchStatus::Idle,
        BranchStatus::RollbackOnly,
        BranchStatus::Prepared,
        BranchStatus::HeuristicallyCompleted,
    ];
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How `start` joins a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOption {
    /// Start a new branch
    #[default]
    New,
    /// Join an existing branch (not supported)
    Join,
    /// Resume a suspended branch (not supported)
    Resume,
}

/// How `end` leaves a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOption {
    /// Dissociate; the branch becomes idle
    #[default]
    Unknown,
    /// Suspend the branch (not supported)
    Suspend,
    /// Suspend for migration to another session (not supported)
    Migrate,
}

/// An operation on a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchVerb {
    /// `start`
    Start,
    /// `end`
    End(EndOption),
    /// `prepare`
    Prepare,
    /// `commit`
    Commit {
        /// Commit without a prepare
        one_phase: bool,
    },
    /// `rollback`
    Rollback,
    /// The branch's work failed; only rollback remains
    Fail,
    /// Resolve a prepared branch without the coordinator
    DecideHeuristically {
        /// The branch wrote log records
        logged: bool,
    },
    /// `forget`
    Forget,
}

fn heuristic_error(xid: &Xid, decision: HeurDecision) -> Error {
    match decision {
        HeurDecision::Commit => Error::XaHeurCommit(xid.clone()),
        HeurDecision::Rollback => Error::XaHeurRollback(xid.clone()),
        HeurDecision::Mix => Error::XaHeurMix(xid.clone()),
        HeurDecision::Unknown => Error::XaProtocolError(xid.clone()),
    }
}

/// Next status of branch `xid` after `verb`
///
/// `decision` is the branch's heuristic decision, reported by commit and
/// rollback on a heuristically completed branch.
pub fn transition(status: BranchStatus, verb: BranchVerb, xid: &Xid, decision: HeurDecision) -> Result<BranchStatus> {
    use BranchStatus::*;

    let protocol = || -> Result<BranchStatus> { Err(Error::XaProtocolError(xid.clone())) };
    let unknown = || -> Result<BranchStatus> { Err(Error::XaUnknownIdentifier(xid.clone())) };

    match verb {
        BranchVerb::Start => match status {
            NonExistent => Ok(Active),
            Active | Suspended | SuspendedForMigrate | Idle => Err(Error::XaDuplicateIdentifier(xid.clone())),
            _ => protocol(),
        },
        BranchVerb::End(option) => match (status, option) {
            (NonExistent, _) => unknown(),
            (_, EndOption::Suspend) => Err(Error::NotSupported("suspending a branch".to_string())),
            (_, EndOption::Migrate) => Err(Error::NotSupported("migrating a branch".to_string())),
            (Active | Suspended | SuspendedForMigrate, EndOption::Unknown) => Ok(Idle),
            _ => protocol(),
        },
        BranchVerb::Prepare => match status {
            Idle => Ok(Prepared),
            NonExistent => unknown(),
            _ => protocol(),
        },
        BranchVerb::Commit { one_phase } => match status {
            NonExistent => unknown(),
            HeuristicallyCompleted => Err(heuristic_error(xid, decision)),
            Prepared => Ok(NonExistent),
            Idle if one_phase => Ok(NonExistent),
            _ => protocol(),
        },
        BranchVerb::Rollback => match status {
            NonExistent => unknown(),
            HeuristicallyCompleted => Err(heuristic_error(xid, decision)),
            Idle | RollbackOnly | Prepared => Ok(NonExistent),
            _ => protocol(),
        },
        BranchVerb::Fail => match status {
            Idle => Ok(RollbackOnly),
            NonExistent => unknown(),
            _ => protocol(),
        },
        BranchVerb::DecideHeuristically { logged } => match status {
            Prepared if logged => Ok(HeuristicallyCompleted),
            Prepared => Ok(NonExistent),
            _ => protocol(),
        },
        BranchVerb::Forget => match status {
            HeuristicallyCompleted => Ok(NonExistent),
            _ => unknown(),
        },
    }
}

/// Protocol state of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchState {
    /// Current status
    pub status: BranchStatus,
    /// Session the branch is associated with; at most one at a time
    pub associated: Option<SessionId>,
    /// Heuristic decision, `Unknown` unless heuristically completed
    pub heur_decision: HeurDecision,
}

/// One XA branch
///
/// The branch runs its work in its own transaction descriptor, which
/// outlives the association with any session.
///
/// The protocol state and the descriptor are locked separately. The state
/// lock is only ever held for a table check and an update, so status
/// queries never wait for work in progress. The descriptor lock is held
/// for the length of the work, which may include lock waits. When both
/// are needed the descriptor is locked first.
pub struct Branch {
    pub(crate) xid: Xid,
    pub(crate) state: Mutex<BranchState>,
    pub(crate) transaction: Mutex<Transaction>,
}

impl BranchState {
    /// Apply `verb` to the status of branch `xid`, or fail without
    /// changing anything
    pub(crate) fn check(&self, xid: &Xid, verb: BranchVerb) -> Result<BranchStatus> {
        transition(self.status, verb, xid, self.heur_decision)
    }
}

impl Branch {
    pub(crate) fn new(xid: Xid, transaction: Transaction) -> Self {
        Branch {
            xid,
            state: Mutex::new(BranchState::default()),
            transaction: Mutex::new(transaction),
        }
    }

    /// Branch identifier
    pub fn xid(&self) -> &Xid {
        &self.xid
    }

    /// Copy of the protocol state
    pub fn state(&self) -> BranchState {
        *self.state.lock()
    }

    /// Current status
    pub fn status(&self) -> BranchStatus {
        self.state.lock().status
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("xid", &self.xid)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BranchStatus::*;

    fn xid() -> Xid {
        Xid::new(1, b"gtrid1".to_vec(), b"bq1".to_vec()).unwrap()
    }

    fn step(status: BranchStatus, verb: BranchVerb) -> Result<BranchStatus> {
        transition(status, verb, &xid(), HeurDecision::Rollback)
    }

    #[test]
    fn test_happy_path() {
        let s = step(NonExistent, BranchVerb::Start).unwrap();
        let s = step(s, BranchVerb::End(EndOption::Unknown)).unwrap();
        let s = step(s, BranchVerb::Prepare).unwrap();
        assert_eq!(s, Prepared);
        assert_eq!(step(s, BranchVerb::Commit { one_phase: false }).unwrap(), NonExistent);
    }

    #[test]
    fn test_heuristic_surfacing() {
        let err = transition(
            HeuristicallyCompleted,
            BranchVerb::Commit { one_phase: false },
            &xid(),
            HeurDecision::Commit,
        )
        .unwrap_err();
        assert!(matches!(err, Error::XaHeurCommit(_)));
        let err = transition(HeuristicallyCompleted, BranchVerb::Rollback, &xid(), HeurDecision::Mix).unwrap_err();
        assert!(matches!(err, Error::XaHeurMix(_)));
    }

    #[test]
    fn test_suspend_not_supported() {
        assert!(matches!(
            step(Active, BranchVerb::End(EndOption::Suspend)),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            step(Active, BranchVerb::End(EndOption::Migrate)),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn test_decide_without_log_ends_branch() {
        assert_eq!(
            step(Prepared, BranchVerb::DecideHeuristically { logged: false }).unwrap(),
            NonExistent
        );
        assert_eq!(
            step(Prepared, BranchVerb::DecideHeuristically { logged: true }).unwrap(),
            HeuristicallyCompleted
        );
    }
}
