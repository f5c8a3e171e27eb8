//! Transaction attributes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a transaction descriptor is in its life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionStatus {
    /// No transaction has been started on the descriptor
    #[default]
    NotInProgress,
    /// Started and running
    InProgress,
    /// Writing the prepare record
    Preparing,
    /// Prepared for two-phase commit
    Prepared,
    /// Writing the commit records
    Committing,
    /// Committed
    Committed,
    /// Undoing
    Rollbacking,
    /// Rolled back
    Rollbacked,
    /// A commit failed and the transaction must be rolled back
    Failed,
}

impl TransactionStatus {
    /// True between begin and commit/rollback
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            TransactionStatus::InProgress
                | TransactionStatus::Preparing
                | TransactionStatus::Prepared
                | TransactionStatus::Committing
                | TransactionStatus::Rollbacking
                | TransactionStatus::Failed
        )
    }

    /// True while the descriptor writes its end records; no new locks are needed
    pub fn is_terminating(self) -> bool {
        matches!(
            self,
            TransactionStatus::Preparing | TransactionStatus::Committing | TransactionStatus::Rollbacking
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Read-only or read-write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Only reads
    ReadOnly,
    /// Reads and writes
    #[default]
    ReadWrite,
}

/// SQL isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Treated as `ReadCommitted`
    ReadUncommitted,
    /// Statement-level consistency
    ReadCommitted,
    /// Rows read stay locked until the end of the transaction
    RepeatableRead,
    /// Full isolation
    #[default]
    Serializable,
}

/// How a transaction was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionKind {
    /// By the session itself
    #[default]
    Explicit,
    /// As the work of an XA branch
    Branch,
}

/// Options for starting a transaction
///
/// Unset fields fall back to the descriptor's configured defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionMode {
    /// Read-only or read-write
    pub category: Option<Category>,
    /// Isolation level
    pub isolation: Option<IsolationLevel>,
    /// Read a snapshot instead of locking (read-only transactions only)
    pub snapshot: bool,
    /// Skip locking
    pub no_lock: bool,
    /// Skip logging
    pub no_log: bool,
}

impl TransactionMode {
    /// Read-write transaction with configured defaults
    pub fn read_write() -> Self {
        TransactionMode {
            category: Some(Category::ReadWrite),
            ..Self::default()
        }
    }

    /// Read-only transaction with configured defaults
    pub fn read_only() -> Self {
        TransactionMode {
            category: Some(Category::ReadOnly),
            ..Self::default()
        }
    }

    /// Set isolation level (builder pattern)
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Read a snapshot (builder pattern)
    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Skip locking (builder pattern)
    pub fn with_no_lock(mut self, no_lock: bool) -> Self {
        self.no_lock = no_lock;
        self
    }

    /// Skip logging (builder pattern)
    pub fn with_no_log(mut self, no_log: bool) -> Self {
        self.no_log = no_log;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_states() {
        assert!(!TransactionStatus::NotInProgress.is_in_progress());
        assert!(TransactionStatus::InProgress.is_in_progress());
        assert!(TransactionStatus::Prepared.is_in_progress());
        assert!(!TransactionStatus::Committed.is_in_progress());
        assert!(!TransactionStatus::Rollbacked.is_in_progress());
        assert!(TransactionStatus::Committing.is_terminating());
        assert!(!TransactionStatus::Prepared.is_terminating());
    }

    #[test]
    fn test_mode_builders() {
        let mode = TransactionMode::read_only()
            .with_isolation(IsolationLevel::ReadCommitted)
            .with_snapshot(true);
        assert_eq!(mode.category, Some(Category::ReadOnly));
        assert_eq!(mode.isolation, Some(IsolationLevel::ReadCommitted));
        assert!(mode.snapshot);
        assert!(!mode.no_log);
    }
}
