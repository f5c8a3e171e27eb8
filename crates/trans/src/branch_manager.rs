//! XA branch table
//!
//! Branches are kept by XID while they exist. A branch that returns to
//! `NonExistent` is dropped from the table, so a later operation on its
//! XID reports `XaUnknownIdentifier`.
//!
//! ## Locking
//!
//! Branches are cloned out of the table before they are locked; only the
//! removal check in `discard_if_gone` locks a branch state under a table
//! entry. Verbs that need both locks of a branch take the descriptor
//! first, and never wait on a lock while holding the state. Queries
//! (`status`, `ids`, `exists_active`, checkpoints) read state only, so a
//! branch blocked in a lock wait does not hold them up.

use crate::branch::{Branch, BranchState, BranchStatus, BranchVerb, EndOption, StartOption};
use crate::manager::TransactionManager;
use crate::transaction::Transaction;
use crate::types::{TransactionKind, TransactionMode};
use dashmap::DashMap;
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::{DatabaseId, Error, HeurDecision, Result, SessionId, Xid};
use warden_durability::{HeurCompletion, LogCategory, LogRecord, Lsn};

/// Session recorded on branches rebuilt from the log
pub(crate) const RECOVERY_SESSION: SessionId = SessionId(0);

/// Outcome of the shutdown sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminationSummary {
    /// Idle or rollback-only branches rolled back
    pub rolled_back: usize,
    /// Prepared branches resolved heuristically
    pub decided: usize,
    /// Branches left active by their session
    pub left_active: usize,
}

/// All XA branches of a server
pub struct BranchManager {
    transactions: Arc<TransactionManager>,
    branches: DashMap<Xid, Arc<Branch>>,
}

impl BranchManager {
    /// Create an empty branch table
    pub fn new(transactions: Arc<TransactionManager>) -> Self {
        let capacity = transactions.config().branch_table_size;
        BranchManager {
            transactions,
            branches: DashMap::with_capacity(capacity),
        }
    }

    /// Transaction manager branch work runs under
    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    fn find(&self, xid: &Xid) -> Result<Arc<Branch>> {
        self.branches
            .get(xid)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| Error::XaUnknownIdentifier(xid.clone()))
    }

    fn find_or_create(&self, xid: &Xid, session: SessionId) -> Arc<Branch> {
        let entry = self.branches.entry(xid.clone()).or_insert_with(|| {
            let transaction = self.transactions.new_descriptor(session);
            Arc::new(Branch::new(xid.clone(), transaction))
        });
        Arc::clone(entry.value())
    }

    fn is_current(&self, branch: &Arc<Branch>) -> bool {
        self.branches
            .get(&branch.xid)
            .map_or(false, |b| Arc::ptr_eq(b.value(), branch))
    }

    /// Drop `xid` from the table if it has returned to `NonExistent`
    ///
    /// Must not be called with the branch's state locked.
    fn discard_if_gone(&self, xid: &Xid) {
        self.branches
            .remove_if(xid, |_, b| b.state.lock().status == BranchStatus::NonExistent);
    }

    /// Branch status of `xid`, `NonExistent` if unknown
    pub fn status(&self, xid: &Xid) -> BranchStatus {
        self.find(xid).map_or(BranchStatus::NonExistent, |b| b.status())
    }

    /// Protocol state of `xid`, if it is in the table
    pub fn state(&self, xid: &Xid) -> Option<BranchState> {
        self.find(xid).ok().map(|b| b.state())
    }

    /// Number of branches in the table
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// True if no branch exists
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    // ========================================================================
    // Protocol verbs
    // ========================================================================

    /// Start branch `xid` on behalf of `session` and associate them
    ///
    /// While associated, [`TransactionManager::cancel`] on `session` reaches
    /// the branch's transaction. Must not be called while holding
    /// `session`'s own descriptor.
    ///
    /// # Errors
    /// - `NotSupported` for `Join` and `Resume`
    /// - `XaInsideActiveBranch` if the session is associated with another
    ///   active branch
    /// - `AlreadyBeginTransaction` if the session runs a transaction of its own
    /// - `XaDuplicateIdentifier` if the branch is in use
    pub fn start(
        &self,
        xid: &Xid,
        database: Option<DatabaseId>,
        session: SessionId,
        mode: TransactionMode,
        option: StartOption,
    ) -> Result<()> {
        match option {
            StartOption::New => {}
            StartOption::Join => return Err(Error::NotSupported("joining a branch".to_string())),
            StartOption::Resume => return Err(Error::NotSupported("resuming a branch".to_string())),
        }
        if let Some(active) = self.active_branch_of(session) {
            return Err(Error::XaInsideActiveBranch(active));
        }
        if let Some(own) = self.transactions.get(session) {
            if own.lock().is_in_progress() {
                return Err(Error::AlreadyBeginTransaction);
            }
        }

        let branch = self.claim(xid, session)?;
        let begun = {
            let mut transaction = branch.transaction.lock();
            transaction.set_session(session);
            let begun = transaction.begin_as(database, mode, TransactionKind::Branch);
            begun.map(|_| transaction.cancel_handle())
        };
        match begun {
            Ok(cancel) => {
                self.transactions.enter_branch(session, cancel);
                debug!(xid = %xid, session = %session, "branch started");
                Ok(())
            }
            Err(e) => {
                *branch.state.lock() = BranchState::default();
                self.discard_if_gone(xid);
                Err(e)
            }
        }
    }

    /// Make `xid` active and associated with `session` before its
    /// transaction begins
    fn claim(&self, xid: &Xid, session: SessionId) -> Result<Arc<Branch>> {
        loop {
            let branch = self.find_or_create(xid, session);
            {
                let mut state = branch.state.lock();
                state.status = state.check(xid, BranchVerb::Start)?;
                state.associated = Some(session);
            }
            if self.is_current(&branch) {
                return Ok(branch);
            }
            // Discarded between lookup and claim
            debug!(xid = %xid, "branch replaced while starting, retrying");
        }
    }

    /// Dissociate `session` from branch `xid`
    ///
    /// Cancellation of `session` goes back to its own descriptor.
    ///
    /// # Errors
    /// - `XaUnknownIdentifier` if the branch does not exist
    /// - `XaProtocolError` if `session` is not the associated session or the
    ///   branch is not active
    /// - `NotSupported` for `Suspend` and `Migrate`
    pub fn end(&self, xid: &Xid, session: SessionId, option: EndOption) -> Result<()> {
        let branch = self.find(xid)?;
        {
            let mut state = branch.state.lock();
            if state.status != BranchStatus::NonExistent && state.associated != Some(session) {
                return Err(Error::XaProtocolError(xid.clone()));
            }
            let next = state.check(xid, BranchVerb::End(option))?;
            state.associated = None;
            state.status = next;
        }
        self.transactions.leave_branch(session);
        debug!(xid = %xid, session = %session, "branch ended");
        Ok(())
    }

    fn check_associated(branch: &Branch, session: SessionId) -> Result<()> {
        let state = branch.state.lock();
        if state.status != BranchStatus::Active || state.associated != Some(session) {
            return Err(Error::XaProtocolError(branch.xid.clone()));
        }
        Ok(())
    }

    /// Run `work` in the branch's transaction
    ///
    /// Only the associated session may work on an active branch. The
    /// branch's state stays readable while `work` runs.
    pub fn with_transaction<R>(
        &self,
        xid: &Xid,
        session: SessionId,
        work: impl FnOnce(&mut Transaction) -> Result<R>,
    ) -> Result<R> {
        let branch = self.find(xid)?;
        Self::check_associated(&branch, session)?;
        let mut transaction = branch.transaction.lock();
        Self::check_associated(&branch, session)?;
        work(&mut *transaction)
    }

    /// Lock the descriptor of `branch` for `verb`, failing first if its
    /// state already rules `verb` out
    fn lock_for(branch: &Branch, verb: BranchVerb) -> Result<MutexGuard<'_, Transaction>> {
        branch.state.lock().check(&branch.xid, verb)?;
        Ok(branch.transaction.lock())
    }

    /// First phase of two-phase commit
    ///
    /// A failing prepare returns the error and leaves the branch idle, so
    /// the coordinator can still roll it back.
    pub fn prepare(&self, xid: &Xid) -> Result<()> {
        let branch = self.find(xid)?;
        let mut transaction = Self::lock_for(&branch, BranchVerb::Prepare)?;
        let mut state = branch.state.lock();
        let next = state.check(xid, BranchVerb::Prepare)?;
        if let Err(e) = transaction.prepare(Some(xid)) {
            warn!(xid = %xid, error = %e, "branch prepare failed");
            return Err(e);
        }
        state.status = next;
        debug!(xid = %xid, "branch prepared");
        Ok(())
    }

    /// Commit branch `xid`; from `Idle` only with `one_phase`
    ///
    /// A failing commit returns the error and leaves the branch in the
    /// status it had.
    ///
    /// # Errors
    /// `XaHeurCommit`, `XaHeurRollback` or `XaHeurMix` if the branch has
    /// been resolved heuristically.
    pub fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()> {
        let verb = BranchVerb::Commit { one_phase };
        let branch = self.find(xid)?;
        {
            let mut transaction = Self::lock_for(&branch, verb)?;
            let mut state = branch.state.lock();
            let next = state.check(xid, verb)?;
            if let Err(e) = transaction.commit() {
                warn!(xid = %xid, error = %e, "branch commit failed");
                return Err(e);
            }
            state.associated = None;
            state.status = next;
            debug!(xid = %xid, one_phase, "branch committed");
        }
        self.discard_if_gone(xid);
        Ok(())
    }

    /// Roll branch `xid` back
    pub fn rollback(&self, xid: &Xid) -> Result<()> {
        let branch = self.find(xid)?;
        {
            let mut transaction = Self::lock_for(&branch, BranchVerb::Rollback)?;
            let mut state = branch.state.lock();
            let next = state.check(xid, BranchVerb::Rollback)?;
            Self::rollback_locked(xid, &mut transaction, &mut state, next);
        }
        self.discard_if_gone(xid);
        Ok(())
    }

    fn rollback_locked(xid: &Xid, transaction: &mut Transaction, state: &mut BranchState, next: BranchStatus) {
        if let Err(e) = transaction.rollback() {
            warn!(xid = %xid, error = %e, "branch rollback failed");
        }
        state.associated = None;
        state.status = next;
        debug!(xid = %xid, "branch rolled back");
    }

    /// Mark an idle branch rollback-only
    pub fn mark_rollback_only(&self, xid: &Xid) -> Result<()> {
        let branch = self.find(xid)?;
        let mut state = branch.state.lock();
        state.status = state.check(xid, BranchVerb::Fail)?;
        Ok(())
    }

    /// Resolve prepared branch `xid` without the coordinator
    ///
    /// A transaction that does not log cannot be undone and is committed;
    /// any other is rolled back. If the branch wrote log records the
    /// decision is logged and the branch waits for `forget`; otherwise it
    /// ends here.
    pub fn decide_heuristically(&self, xid: &Xid) -> Result<HeurDecision> {
        let branch = self.find(xid)?;
        let decision = {
            let mut transaction = Self::lock_for(&branch, BranchVerb::DecideHeuristically { logged: true })?;
            let mut state = branch.state.lock();
            self.decide_locked(xid, &mut transaction, &mut state)?
        };
        self.discard_if_gone(xid);
        Ok(decision)
    }

    fn decide_locked(&self, xid: &Xid, transaction: &mut Transaction, state: &mut BranchState) -> Result<HeurDecision> {
        let logged = transaction.has_log();
        let next = state.check(xid, BranchVerb::DecideHeuristically { logged })?;
        let decision = if transaction.is_no_log() {
            HeurDecision::Commit
        } else {
            HeurDecision::Rollback
        };

        if logged {
            self.transactions.log().store(
                LogCategory::System,
                &LogRecord::BranchHeurDecide {
                    xid: xid.clone(),
                    decision,
                },
            )?;
        }
        let outcome = match decision {
            HeurDecision::Commit => transaction.commit(),
            _ => transaction.rollback(),
        };
        if let Err(e) = outcome {
            warn!(xid = %xid, error = %e, "heuristic completion of transaction failed");
        }

        state.associated = None;
        state.status = next;
        if next == BranchStatus::HeuristicallyCompleted {
            state.heur_decision = decision;
        }
        info!(xid = %xid, ?decision, logged, "branch decided heuristically");
        Ok(decision)
    }

    /// Discard a heuristically completed branch
    ///
    /// # Errors
    /// `XaUnknownIdentifier` unless the branch is heuristically completed.
    pub fn forget(&self, xid: &Xid) -> Result<()> {
        let branch = self.find(xid)?;
        {
            let mut state = branch.state.lock();
            let next = state.check(xid, BranchVerb::Forget)?;
            self.transactions
                .log()
                .store(LogCategory::System, &LogRecord::BranchForget { xid: xid.clone() })?;
            state.status = next;
            state.heur_decision = HeurDecision::Unknown;
            debug!(xid = %xid, "branch forgotten");
        }
        self.discard_if_gone(xid);
        Ok(())
    }

    // ========================================================================
    // Shutdown and checkpoints
    // ========================================================================

    /// Shutdown sweep
    ///
    /// Idle and rollback-only branches are rolled back; prepared branches
    /// are decided heuristically. Heuristically completed branches stay
    /// for recovery to rebuild.
    pub fn prepare_termination(&self) -> TerminationSummary {
        let mut summary = TerminationSummary::default();
        let branches: Vec<Arc<Branch>> = self.branches.iter().map(|e| Arc::clone(e.value())).collect();

        for branch in branches {
            let xid = &branch.xid;
            match branch.status() {
                BranchStatus::HeuristicallyCompleted | BranchStatus::NonExistent => {}
                BranchStatus::Idle | BranchStatus::RollbackOnly | BranchStatus::Prepared => {
                    let mut transaction = branch.transaction.lock();
                    let mut state = branch.state.lock();
                    match state.status {
                        BranchStatus::Idle | BranchStatus::RollbackOnly => {
                            Self::rollback_locked(xid, &mut transaction, &mut state, BranchStatus::NonExistent);
                            summary.rolled_back += 1;
                        }
                        BranchStatus::Prepared => match self.decide_locked(xid, &mut transaction, &mut state) {
                            Ok(_) => summary.decided += 1,
                            Err(e) => warn!(xid = %xid, error = %e, "heuristic decision failed"),
                        },
                        _ => {}
                    }
                }
                status => {
                    warn!(xid = %xid, %status, "branch still associated at shutdown");
                    summary.left_active += 1;
                }
            }
            self.discard_if_gone(xid);
        }
        info!(
            rolled_back = summary.rolled_back,
            decided = summary.decided,
            left_active = summary.left_active,
            "branch shutdown sweep done"
        );
        summary
    }

    /// Checkpoint record listing the heuristically completed branches
    pub fn checkpoint_record(&self) -> LogRecord {
        LogRecord::CheckpointSystem {
            heur_completions: self.heur_completion_info(),
        }
    }

    /// Store [`checkpoint_record`](Self::checkpoint_record) in the system log
    pub fn write_checkpoint(&self) -> Result<Lsn> {
        let record = self.checkpoint_record();
        let lsn = self.transactions.log().store(LogCategory::System, &record)?;
        self.transactions.log().flush()?;
        Ok(lsn)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// XIDs of branches in `status` (any status if `None`) associated with
    /// `session` (any session if `None`), sorted
    pub fn ids(&self, session: Option<SessionId>, status: Option<BranchStatus>) -> Vec<Xid> {
        let mut ids: Vec<Xid> = self
            .snapshot()
            .into_iter()
            .filter(|(_, state)| {
                state.status != BranchStatus::NonExistent
                    && status.map_or(true, |wanted| wanted == state.status)
                    && session.map_or(true, |wanted| Some(wanted) == state.associated)
            })
            .map(|(xid, _)| xid)
            .collect();
        ids.sort();
        ids
    }

    /// Heuristically completed branches with their decisions, sorted by XID
    pub fn heur_completion_info(&self) -> Vec<HeurCompletion> {
        let mut info: Vec<HeurCompletion> = self
            .snapshot()
            .into_iter()
            .filter(|(_, state)| state.status == BranchStatus::HeuristicallyCompleted)
            .map(|(xid, state)| HeurCompletion {
                xid,
                decision: state.heur_decision,
            })
            .collect();
        info.sort_by(|a, b| a.xid.cmp(&b.xid));
        info
    }

    /// True if `session` is associated with an active branch
    pub fn exists_active(&self, session: SessionId) -> bool {
        self.active_branch_of(session).is_some()
    }

    fn active_branch_of(&self, session: SessionId) -> Option<Xid> {
        self.snapshot()
            .into_iter()
            .find(|(_, state)| state.status == BranchStatus::Active && state.associated == Some(session))
            .map(|(xid, _)| xid)
    }

    fn snapshot(&self) -> Vec<(Xid, BranchState)> {
        let branches: Vec<Arc<Branch>> = self.branches.iter().map(|e| Arc::clone(e.value())).collect();
        branches.iter().map(|b| (b.xid.clone(), b.state())).collect()
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Rebuild a heuristically completed branch
    pub(crate) fn redo_heur_decide(&self, xid: &Xid, decision: HeurDecision) {
        let branch = self.find_or_create(xid, RECOVERY_SESSION);
        let mut state = branch.state.lock();
        if state.status != BranchStatus::NonExistent && state.status != BranchStatus::HeuristicallyCompleted {
            warn!(xid = %xid, status = %state.status, "replaying heuristic decision over live branch");
        }
        state.status = BranchStatus::HeuristicallyCompleted;
        state.heur_decision = decision;
    }

    /// Replay a forget
    ///
    /// # Returns
    /// False if the branch was not heuristically completed.
    pub(crate) fn redo_forget(&self, xid: &Xid) -> bool {
        let forgotten = match self.find(xid) {
            Ok(branch) => {
                let mut state = branch.state.lock();
                if state.status == BranchStatus::HeuristicallyCompleted {
                    state.status = BranchStatus::NonExistent;
                    state.heur_decision = HeurDecision::Unknown;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        self.discard_if_gone(xid);
        forgotten
    }
}

impl std::fmt::Debug for BranchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchManager")
            .field("branches", &self.branches.len())
            .finish()
    }
}
