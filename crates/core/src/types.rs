//! Identifier types shared by the lock and transaction layers
//!
//! - [`SessionId`]: the session a transaction or branch runs on
//! - [`DatabaseId`]: a database, the root of the lock hierarchy
//! - [`TransactionId`]: a transaction descriptor
//! - [`Xid`]: an XA transaction-branch identifier
//! - [`HeurDecision`]: outcome of a heuristic completion

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of the global transaction id part of an XID
pub const MAX_GTRID_SIZE: usize = 64;

/// Maximum length of the branch qualifier part of an XID
pub const MAX_BQUAL_SIZE: usize = 64;

/// Identifies a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Identifies a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatabaseId(pub u32);

impl DatabaseId {
    /// The system database, owner of the system log
    pub const SYSTEM: DatabaseId = DatabaseId(0);
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db:{}", self.0)
    }
}

/// Identifies a transaction descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// XA transaction-branch identifier
///
/// An XID is the triple (format id, global transaction id, branch
/// qualifier). Two XIDs are the same branch iff all three parts are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Xid {
    format_id: i32,
    gtrid: Vec<u8>,
    bqual: Vec<u8>,
}

impl Xid {
    /// Format id reserved for the null XID
    pub const NULL_FORMAT_ID: i32 = -1;

    /// Create an XID, validating its parts
    ///
    /// # Errors
    /// Returns `Error::XaInvalidIdentifier` if the format id is the null
    /// format id, the global transaction id is empty, or either part
    /// exceeds its maximum size.
    pub fn new(format_id: i32, gtrid: impl Into<Vec<u8>>, bqual: impl Into<Vec<u8>>) -> Result<Self> {
        let gtrid = gtrid.into();
        let bqual = bqual.into();
        if format_id == Self::NULL_FORMAT_ID {
            return Err(Error::XaInvalidIdentifier("null format id".to_string()));
        }
        if gtrid.is_empty() || gtrid.len() > MAX_GTRID_SIZE {
            return Err(Error::XaInvalidIdentifier(format!(
                "global transaction id length {} out of range",
                gtrid.len()
            )));
        }
        if bqual.len() > MAX_BQUAL_SIZE {
            return Err(Error::XaInvalidIdentifier(format!(
                "branch qualifier length {} out of range",
                bqual.len()
            )));
        }
        Ok(Xid {
            format_id,
            gtrid,
            bqual,
        })
    }

    /// Format id
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Global transaction id
    pub fn gtrid(&self) -> &[u8] {
        &self.gtrid
    }

    /// Branch qualifier
    pub fn bqual(&self) -> &[u8] {
        &self.bqual
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}','{}',{}",
            String::from_utf8_lossy(&self.gtrid),
            String::from_utf8_lossy(&self.bqual),
            self.format_id
        )
    }
}

/// Outcome of a heuristic completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HeurDecision {
    /// Not heuristically completed
    #[default]
    Unknown,
    /// Heuristically committed
    Commit,
    /// Heuristically rolled back
    Rollback,
    /// Partly committed, partly rolled back
    Mix,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xid_equality_uses_all_parts() {
        let a = Xid::new(1, b"g".to_vec(), b"b".to_vec()).unwrap();
        let b = Xid::new(1, b"g".to_vec(), b"b".to_vec()).unwrap();
        let c = Xid::new(2, b"g".to_vec(), b"b".to_vec()).unwrap();
        let d = Xid::new(1, b"g".to_vec(), b"other".to_vec()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_xid_rejects_null_format() {
        assert!(matches!(
            Xid::new(Xid::NULL_FORMAT_ID, b"g".to_vec(), Vec::new()),
            Err(Error::XaInvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_xid_rejects_bad_lengths() {
        assert!(Xid::new(0, Vec::new(), Vec::new()).is_err());
        assert!(Xid::new(0, vec![b'a'; MAX_GTRID_SIZE + 1], Vec::new()).is_err());
        assert!(Xid::new(0, b"g".to_vec(), vec![b'b'; MAX_BQUAL_SIZE + 1]).is_err());
        assert!(Xid::new(0, vec![b'a'; MAX_GTRID_SIZE], vec![b'b'; MAX_BQUAL_SIZE]).is_ok());
    }

    #[test]
    fn test_xid_display() {
        let xid = Xid::new(7, b"gtrid1".to_vec(), b"bq1".to_vec()).unwrap();
        assert_eq!(xid.to_string(), "'gtrid1','bq1',7");
    }

    #[test]
    fn test_xid_serde_roundtrip() {
        let xid = Xid::new(7, b"gtrid1".to_vec(), b"bq1".to_vec()).unwrap();
        let json = serde_json::to_string(&xid).unwrap();
        let back: Xid = serde_json::from_str(&json).unwrap();
        assert_eq!(xid, back);
    }

    #[test]
    fn test_heur_decision_default() {
        assert_eq!(HeurDecision::default(), HeurDecision::Unknown);
    }
}
