//! Branch recovery
//!
//! Heuristically completed branches must survive a restart until the
//! coordinator forgets them. Recovery rebuilds them from the system log
//! without re-running any transactional work: checkpoints and heuristic
//! decisions create branches, forgets remove them, in log order.

use crate::branch_manager::BranchManager;
use tracing::{info, warn};
use warden_core::Result;
use warden_durability::{LogCategory, LogRecord, LogStore};

/// Counts from one recovery run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Entries read from the log
    pub records_scanned: usize,
    /// Checkpoint records replayed
    pub checkpoints: usize,
    /// Heuristic decisions replayed, including those listed in checkpoints
    pub heur_decisions: usize,
    /// Forget records replayed
    pub forgets: usize,
    /// Forget records for branches that were not heuristically completed
    pub skipped: usize,
    /// Branches awaiting forget after recovery
    pub pending: usize,
}

/// Replays branch records
pub struct BranchRecovery<'a> {
    branches: &'a BranchManager,
}

impl<'a> BranchRecovery<'a> {
    /// Recover into `branches`
    pub fn new(branches: &'a BranchManager) -> Self {
        BranchRecovery { branches }
    }

    /// Replay every branch record of the system log in `log`
    pub fn redo_all(&self, log: &dyn LogStore) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats::default();
        for (lsn, entry) in log.scan()? {
            stats.records_scanned += 1;
            if entry.category != LogCategory::System {
                continue;
            }
            match entry.record {
                LogRecord::CheckpointSystem { heur_completions } => {
                    stats.checkpoints += 1;
                    for completion in heur_completions {
                        self.branches.redo_heur_decide(&completion.xid, completion.decision);
                        stats.heur_decisions += 1;
                    }
                }
                LogRecord::BranchHeurDecide { xid, decision } => {
                    self.branches.redo_heur_decide(&xid, decision);
                    stats.heur_decisions += 1;
                }
                LogRecord::BranchForget { xid } => {
                    if self.branches.redo_forget(&xid) {
                        stats.forgets += 1;
                    } else {
                        warn!(%lsn, xid = %xid, "forget for a branch that is not heuristically completed");
                        stats.skipped += 1;
                    }
                }
                _ => {}
            }
        }
        stats.pending = self.branches.heur_completion_info().len();
        info!(
            records = stats.records_scanned,
            checkpoints = stats.checkpoints,
            heur_decisions = stats.heur_decisions,
            forgets = stats.forgets,
            pending = stats.pending,
            "branch recovery complete"
        );
        Ok(stats)
    }
}
