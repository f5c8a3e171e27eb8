//! Log record types
//!
//! The transaction layer writes facts to the log and reads them back in
//! order during recovery. Every record belongs to a [`LogCategory`]: the
//! system log or one database's log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_core::{DatabaseId, HeurDecision, TransactionId, Xid};

/// Position of a record in a log; strictly increasing per store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}

/// Which log a record is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogCategory {
    /// The system log (branch bookkeeping, checkpoints)
    System,
    /// A database's log
    Database(DatabaseId),
}

/// One heuristically completed branch, as carried by a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeurCompletion {
    /// Branch identifier
    pub xid: Xid,
    /// Heuristic outcome
    pub decision: HeurDecision,
}

/// A logged fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// First record a transaction writes to a log
    TransactionBegin {
        /// Transaction
        txn: TransactionId,
    },
    /// Transaction committed
    TransactionCommit {
        /// Transaction
        txn: TransactionId,
    },
    /// Transaction rolled back
    TransactionRollback {
        /// Transaction
        txn: TransactionId,
    },
    /// Transaction prepared for two-phase commit
    TransactionPrepare {
        /// Transaction
        txn: TransactionId,
        /// Branch the transaction belongs to, if any
        xid: Option<Xid>,
    },
    /// Statement committed
    StatementCommit {
        /// Transaction
        txn: TransactionId,
    },
    /// Statement rolled back
    StatementRollback {
        /// Transaction
        txn: TransactionId,
    },
    /// A prepared branch was heuristically resolved
    BranchHeurDecide {
        /// Branch
        xid: Xid,
        /// Outcome
        decision: HeurDecision,
    },
    /// A heuristically completed branch was forgotten
    BranchForget {
        /// Branch
        xid: Xid,
    },
    /// System checkpoint listing the branches awaiting `forget`
    CheckpointSystem {
        /// Heuristically completed branches
        heur_completions: Vec<HeurCompletion>,
    },
}

impl LogRecord {
    /// Stable tag used by the on-disk framing
    pub fn type_tag(&self) -> u8 {
        match self {
            LogRecord::TransactionBegin { .. } => 1,
            LogRecord::TransactionCommit { .. } => 2,
            LogRecord::TransactionRollback { .. } => 3,
            LogRecord::TransactionPrepare { .. } => 4,
            LogRecord::StatementCommit { .. } => 5,
            LogRecord::StatementRollback { .. } => 6,
            LogRecord::BranchHeurDecide { .. } => 0x10,
            LogRecord::BranchForget { .. } => 0x11,
            LogRecord::CheckpointSystem { .. } => 0x20,
        }
    }

    /// Transaction the record belongs to, if any
    pub fn txn(&self) -> Option<TransactionId> {
        match self {
            LogRecord::TransactionBegin { txn }
            | LogRecord::TransactionCommit { txn }
            | LogRecord::TransactionRollback { txn }
            | LogRecord::TransactionPrepare { txn, .. }
            | LogRecord::StatementCommit { txn }
            | LogRecord::StatementRollback { txn } => Some(*txn),
            _ => None,
        }
    }

    /// True for records replayed by branch recovery
    pub fn is_branch_record(&self) -> bool {
        matches!(
            self,
            LogRecord::BranchHeurDecide { .. }
                | LogRecord::BranchForget { .. }
                | LogRecord::CheckpointSystem { .. }
        )
    }
}

/// A record with its category and write time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log the record belongs to
    pub category: LogCategory,
    /// Wall-clock time of the write
    pub timestamp: DateTime<Utc>,
    /// The fact
    pub record: LogRecord,
}

impl LogEntry {
    /// Stamp `record` with the current time
    pub fn now(category: LogCategory, record: LogRecord) -> Self {
        LogEntry {
            category,
            timestamp: Utc::now(),
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_unique() {
        let xid = Xid::new(1, b"g".to_vec(), b"b".to_vec()).unwrap();
        let txn = TransactionId(1);
        let records = [
            LogRecord::TransactionBegin { txn },
            LogRecord::TransactionCommit { txn },
            LogRecord::TransactionRollback { txn },
            LogRecord::TransactionPrepare { txn, xid: None },
            LogRecord::StatementCommit { txn },
            LogRecord::StatementRollback { txn },
            LogRecord::BranchHeurDecide {
                xid: xid.clone(),
                decision: HeurDecision::Rollback,
            },
            LogRecord::BranchForget { xid },
            LogRecord::CheckpointSystem {
                heur_completions: Vec::new(),
            },
        ];
        let mut tags: Vec<u8> = records.iter().map(LogRecord::type_tag).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), records.len());
    }

    #[test]
    fn test_txn_and_branch_classification() {
        let txn = TransactionId(7);
        assert_eq!(LogRecord::StatementCommit { txn }.txn(), Some(txn));
        let forget = LogRecord::BranchForget {
            xid: Xid::new(1, b"g".to_vec(), Vec::new()).unwrap(),
        };
        assert_eq!(forget.txn(), None);
        assert!(forget.is_branch_record());
        assert!(!LogRecord::TransactionBegin { txn }.is_branch_record());
    }
}
