//! Outcome of a lock operation

use warden_core::{Error, LockName, Result};

/// Result of `hold`, `release` and `convert`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The operation took effect
    Succeeded,
    /// A bounded wait expired
    Timeout,
    /// The wait closed a cycle and this client was chosen as victim
    Deadlock,
    /// The client lacks a sufficient lock on an ancestor
    LackOfParent,
    /// Weakening the lock would leave a locked descendant under-protected
    LackForChild,
    /// The waiter's cancel flag was set
    Cancelled,
}

impl LockStatus {
    /// True for `Succeeded`
    #[inline]
    pub fn is_succeeded(self) -> bool {
        self == LockStatus::Succeeded
    }

    /// Convert to a `Result`, naming the resource in the error
    pub fn into_result(self, name: &LockName) -> Result<()> {
        match self {
            LockStatus::Succeeded => Ok(()),
            LockStatus::Timeout => Err(Error::LockTimeout(name.clone())),
            LockStatus::Deadlock => Err(Error::Deadlock(name.clone())),
            LockStatus::LackOfParent => Err(Error::LackOfParent(name.clone())),
            LockStatus::LackForChild => Err(Error::LackForChild(name.clone())),
            LockStatus::Cancelled => Err(Error::Cancelled),
        }
    }
}
