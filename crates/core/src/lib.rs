//! Core types for warden
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error type hierarchy shared by the lock and transaction layers
//! - LockName: Hierarchical resource names (database/table/tuple/log/file)
//! - SessionId, DatabaseId, TransactionId: plain identifiers
//! - Xid: XA transaction-branch identifier
//! - HeurDecision: outcome of a heuristic completion

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod name;
pub mod types;

pub use error::{Error, Result};
pub use name::{Ancestors, FileId, LockCategory, LockName, TableId, TupleId};
pub use types::{DatabaseId, HeurDecision, SessionId, TransactionId, Xid, MAX_BQUAL_SIZE, MAX_GTRID_SIZE};
