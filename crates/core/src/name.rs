//! Hierarchical lock resource names
//!
//! Lockable resources form a tree:
//!
//! ```text
//! Database
//! ├── Table
//! │   ├── Tuple
//! │   └── File        (latchable)
//! └── LogicalLog
//! ```
//!
//! A system-wide logical log (`LogicalLog { database: None }`) has no parent.
//! Hierarchy checks in the lock manager walk [`LockName::parent`] and
//! [`LockName::is_descendant`].

use crate::types::DatabaseId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a table inside a database
pub type TableId = u32;

/// Identifies a tuple inside a table
pub type TupleId = u32;

/// Identifies a file belonging to a table
pub type FileId = u32;

/// Category of a lockable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockCategory {
    /// A whole database
    Database,
    /// A table
    Table,
    /// A single tuple
    Tuple,
    /// A logical log
    LogicalLog,
    /// A file backing a table
    File,
}

/// Name of a lockable resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockName {
    /// A whole database
    Database {
        /// Database id
        database: DatabaseId,
    },
    /// A table in a database
    Table {
        /// Database id
        database: DatabaseId,
        /// Table id
        table: TableId,
    },
    /// A tuple in a table
    Tuple {
        /// Database id
        database: DatabaseId,
        /// Table id
        table: TableId,
        /// Tuple id
        tuple: TupleId,
    },
    /// A logical log, per database or system-wide
    LogicalLog {
        /// Owning database, `None` for the system log
        database: Option<DatabaseId>,
    },
    /// A file of a table
    File {
        /// Database id
        database: DatabaseId,
        /// Table id
        table: TableId,
        /// File id
        file: FileId,
    },
}

impl LockName {
    /// Name of a database
    pub fn database(database: DatabaseId) -> Self {
        LockName::Database { database }
    }

    /// Name of a table
    pub fn table(database: DatabaseId, table: TableId) -> Self {
        LockName::Table { database, table }
    }

    /// Name of a tuple
    pub fn tuple(database: DatabaseId, table: TableId, tuple: TupleId) -> Self {
        LockName::Tuple {
            database,
            table,
            tuple,
        }
    }

    /// Name of a database's logical log
    pub fn logical_log(database: DatabaseId) -> Self {
        LockName::LogicalLog {
            database: Some(database),
        }
    }

    /// Name of the system logical log
    pub fn system_log() -> Self {
        LockName::LogicalLog { database: None }
    }

    /// Name of a table's file
    pub fn file(database: DatabaseId, table: TableId, file: FileId) -> Self {
        LockName::File {
            database,
            table,
            file,
        }
    }

    /// Category of this resource
    pub fn category(&self) -> LockCategory {
        match self {
            LockName::Database { .. } => LockCategory::Database,
            LockName::Table { .. } => LockCategory::Table,
            LockName::Tuple { .. } => LockCategory::Tuple,
            LockName::LogicalLog { .. } => LockCategory::LogicalLog,
            LockName::File { .. } => LockCategory::File,
        }
    }

    /// Database this resource belongs to, if any
    pub fn database_id(&self) -> Option<DatabaseId> {
        match self {
            LockName::Database { database }
            | LockName::Table { database, .. }
            | LockName::Tuple { database, .. }
            | LockName::File { database, .. } => Some(*database),
            LockName::LogicalLog { database } => *database,
        }
    }

    /// Immediate ancestor in the hierarchy
    pub fn parent(&self) -> Option<LockName> {
        match self {
            LockName::Database { .. } => None,
            LockName::Table { database, .. } => Some(LockName::database(*database)),
            LockName::Tuple {
                database, table, ..
            }
            | LockName::File {
                database, table, ..
            } => Some(LockName::table(*database, *table)),
            LockName::LogicalLog { database } => database.map(LockName::database),
        }
    }

    /// Iterate over ancestors, nearest first
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }

    /// True if `self` lies strictly below `ancestor`
    pub fn is_descendant(&self, ancestor: &LockName) -> bool {
        self.ancestors().any(|a| &a == ancestor)
    }

    /// True if the resource supports latching
    pub fn is_latchable(&self) -> bool {
        matches!(self, LockName::File { .. })
    }
}

/// Iterator over the ancestors of a [`LockName`]
pub struct Ancestors {
    next: Option<LockName>,
}

impl Iterator for Ancestors {
    type Item = LockName;

    fn next(&mut self) -> Option<LockName> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockName::Database { database } => write!(f, "database({})", database.0),
            LockName::Table { database, table } => write!(f, "table({}/{})", database.0, table),
            LockName::Tuple {
                database,
                table,
                tuple,
            } => write!(f, "tuple({}/{}/{})", database.0, table, tuple),
            LockName::LogicalLog { database: Some(db) } => write!(f, "log({})", db.0),
            LockName::LogicalLog { database: None } => write!(f, "log(system)"),
            LockName::File {
                database,
                table,
                file,
            } => write!(f, "file({}/{}/{})", database.0, table, file),
        }
    }
}
