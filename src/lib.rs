//! Warden - hierarchical two-phase locking with XA transaction branches
//!
//! Warden is the concurrency-control layer of a database server: a lock
//! manager over a database/table/tuple hierarchy with sixteen lock modes
//! and deadlock detection, per-session transactions that lock and log
//! through it, and the XA branch state machine for distributed commit.
//!
//! # Quick Start
//!
//! ```ignore
//! use warden::{Warden, TransactionMode, LockName, LockMode, LockDuration, Timeout, DatabaseId};
//!
//! let warden = Warden::ephemeral()?;
//! let (_session, txn) = warden.open_session();
//! let mut txn = txn.lock();
//!
//! let db = DatabaseId(1);
//! txn.begin(Some(db), TransactionMode::read_write())?;
//! txn.lock(&LockName::table(db, 1), LockMode::IX, LockDuration::Middle, Timeout::Unlimited)?;
//! txn.lock(&LockName::tuple(db, 1, 42), LockMode::X, LockDuration::Middle, Timeout::Unlimited)?;
//! txn.commit()?;
//! ```
//!
//! # Architecture
//!
//! - `warden-core`: names, identifiers and the error type
//! - `warden-lock`: the lock manager
//! - `warden-durability`: log records and log stores
//! - `warden-trans`: transactions, XA branches and branch recovery
//!
//! [`Warden`] assembles them and reads its settings from `warden.toml`.

mod config;
mod server;

pub use config::{WardenConfig, CONFIG_FILE_NAME, LOG_FILE_NAME};
pub use server::Warden;

pub use warden_core::{DatabaseId, Error, HeurDecision, LockCategory, LockName, Result, SessionId, TransactionId, Xid};
pub use warden_durability::{FileLog, LogCategory, LogRecord, LogStore, MemoryLog, SyncMode};
pub use warden_lock::{LockConfig, LockDuration, LockManager, LockMode, LockStatus, Timeout};
pub use warden_trans::{
    BranchManager, BranchStatus, Category, EndOption, IsolationLevel, RecoveryStats, SharedTransaction, StartOption,
    TerminationSummary, TransConfig, Transaction, TransactionMode, TransactionStatus,
};
