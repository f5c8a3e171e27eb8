//! Error types for warden
//!
//! This module defines the error taxonomy shared by the lock manager and
//! the transaction layer. We use `thiserror` for automatic `Display` and
//! `Error` trait implementations.
//!
//! The variants fall into a few families:
//! - lock outcomes (`Deadlock`, `LockTimeout`, `LackOfParent`, `LackForChild`)
//! - XA protocol violations (`XaProtocolError`, `XaUnknownIdentifier`, ...)
//! - heuristic outcomes (`XaHeurCommit`, `XaHeurRollback`, `XaHeurMix`)
//! - transaction sequencing (`AlreadyBeginTransaction`, `NotBeginTransaction`)
//! - ambient failures (I/O, serialization, corruption, configuration)

use crate::name::LockName;
use crate::types::{DatabaseId, Xid};
use std::io;
use thiserror::Error;

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for warden
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (log files, configuration files)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Incomplete log entry (torn write at the end of a log file)
    #[error("Incomplete entry at offset {offset}: have {have} bytes, need {needed}")]
    IncompleteEntry {
        /// Offset of the entry
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// The lock request closed a cycle in the wait-for graph and this
    /// client was chosen as the victim
    #[error("Deadlock detected while locking {0}")]
    Deadlock(LockName),

    /// A bounded lock wait expired
    #[error("Lock wait timed out on {0}")]
    LockTimeout(LockName),

    /// The client does not hold a sufficient lock on an ancestor resource
    #[error("Lack of parent lock for {0}")]
    LackOfParent(LockName),

    /// Weakening the lock would leave a descendant resource under-protected
    #[error("Lack of lock for a child of {0}")]
    LackForChild(LockName),

    /// The operation was cancelled while waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation is defined by the protocol but not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A transaction is already in progress on the session
    #[error("Transaction already in progress")]
    AlreadyBeginTransaction,

    /// No transaction is in progress
    #[error("No transaction in progress")]
    NotBeginTransaction,

    /// The XA verb is not allowed in the branch's current state
    #[error("XA protocol error on branch {0}")]
    XaProtocolError(Xid),

    /// No branch with the given identifier exists
    #[error("Unknown XA branch {0}")]
    XaUnknownIdentifier(Xid),

    /// A branch with the given identifier is already in use
    #[error("Duplicate XA branch {0}")]
    XaDuplicateIdentifier(Xid),

    /// The session is already associated with an active branch
    #[error("Session is inside active branch {0}")]
    XaInsideActiveBranch(Xid),

    /// The identifier does not form a valid XID
    #[error("Invalid XA identifier: {0}")]
    XaInvalidIdentifier(String),

    /// The branch was heuristically committed
    #[error("Branch {0} was heuristically committed")]
    XaHeurCommit(Xid),

    /// The branch was heuristically rolled back
    #[error("Branch {0} was heuristically rolled back")]
    XaHeurRollback(Xid),

    /// The branch was heuristically committed in part and rolled back in part
    #[error("Branch {0} was heuristically committed and rolled back")]
    XaHeurMix(Xid),

    /// A compensating action failed and the database was taken offline
    #[error("Database {0} is unavailable")]
    DatabaseUnavailable(DatabaseId),
}

impl Error {
    /// Returns true if retrying the enclosing transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Deadlock(_) | Error::LockTimeout(_))
    }

    /// Returns true for the heuristic-outcome family.
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            Error::XaHeurCommit(_) | Error::XaHeurRollback(_) | Error::XaHeurMix(_)
        )
    }

    /// Returns true for XA protocol sequencing errors.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::XaProtocolError(_)
                | Error::XaUnknownIdentifier(_)
                | Error::XaDuplicateIdentifier(_)
                | Error::XaInsideActiveBranch(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
