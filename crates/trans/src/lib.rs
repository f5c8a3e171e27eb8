//! Transactions and XA branches for warden
//!
//! This crate drives the lock manager and the log on behalf of sessions:
//! - Transaction: one descriptor per session; begin/prepare/commit/rollback,
//!   statements, locking and logging
//! - TransactionManager: the descriptor table and unavailable databases
//! - Branch: the XA branch state machine
//! - BranchManager: the XID table, shutdown sweep and queries
//! - BranchRecovery: rebuilding heuristically completed branches at startup

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adequate;
pub mod branch;
pub mod branch_manager;
pub mod config;
pub mod manager;
pub mod recovery;
pub mod transaction;
pub mod types;

pub use branch::{transition, Branch, BranchState, BranchStatus, BranchVerb, EndOption, StartOption};
pub use branch_manager::{BranchManager, TerminationSummary};
pub use config::{TransConfig, TransConfigError};
pub use manager::{SharedTransaction, TransactionManager};
pub use recovery::{BranchRecovery, RecoveryStats};
pub use transaction::Transaction;
pub use types::{Category, IsolationLevel, TransactionKind, TransactionMode, TransactionStatus};
