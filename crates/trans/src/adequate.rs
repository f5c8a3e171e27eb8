//! Adequate lock tables
//!
//! For an operation on an object of one category (the *manipulated*
//! category), these tables give the mode and duration to lock each
//! enclosing object with (the *locked* category), per isolation level.
//! `N` means the object need not be locked.
//!
//! Snapshot (versioning) readers only lock the database, and only against
//! schema changes.

use crate::types::IsolationLevel;
use warden_core::LockCategory;
use warden_lock::LockDuration::{self, Instant, Middle, Short, Statement};
use warden_lock::LockMode::{self, IS, IX, N, S, VS, X};

type Slot = (LockMode, LockDuration);

/// One slot per locked category: other, database, table, tuple, logical log
type Row = [Slot; 5];

/// One row per isolation level, `ReadUncommitted` first
type Grid = [Row; 4];

const NI: Slot = (N, Instant);
const N_MID: Slot = (N, Middle);
const IS_STMT: Slot = (IS, Statement);
const IS_MID: Slot = (IS, Middle);
const IX_STMT: Slot = (IX, Statement);
const IX_MID: Slot = (IX, Middle);
const S_STMT: Slot = (S, Statement);
const S_SHORT: Slot = (S, Short);
const S_MID: Slot = (S, Middle);
const X_STMT: Slot = (X, Statement);
const X_MID: Slot = (X, Middle);
const VS_STMT: Slot = (VS, Statement);
const VS_MID: Slot = (VS, Middle);

const fn uniform(row: Row) -> Grid {
    [row, row, row, row]
}

const VERSIONING: Grid = [
    [NI, NI, NI, NI, NI],
    [NI, VS_STMT, NI, NI, NI],
    [NI, VS_MID, NI, NI, NI],
    [NI, VS_MID, NI, NI, NI],
];

/// Read-write operations, one grid per manipulated category
const READ_WRITE: [Grid; 5] = [
    uniform([NI, NI, NI, NI, IX_STMT]),
    uniform([NI, X_MID, NI, NI, IX_STMT]),
    [
        [NI, IX_MID, X_MID, NI, IX_STMT],
        [NI, IX_MID, X_MID, NI, IX_STMT],
        [NI, IX_MID, X_MID, NI, IX_STMT],
        [NI, X_MID, NI, NI, IX_STMT],
    ],
    [
        [NI, IX_MID, IX_MID, X_MID, IX_STMT],
        [NI, IX_MID, IX_MID, X_MID, IX_STMT],
        [NI, IX_MID, IX_MID, X_MID, IX_STMT],
        [NI, IX_MID, X_MID, NI, IX_STMT],
    ],
    uniform([NI, NI, NI, NI, X_STMT]),
];

/// Read-only operations of transactions that do not read snapshots
const READ_ONLY: [Grid; 5] = [
    uniform([NI, NI, NI, NI, IS_STMT]),
    [
        [NI, NI, NI, NI, IS_STMT],
        [NI, S_SHORT, NI, NI, IS_STMT],
        [NI, S_MID, NI, NI, IS_STMT],
        [NI, S_MID, NI, NI, IS_STMT],
    ],
    [
        [NI, IS_MID, NI, NI, IS_STMT],
        [NI, IS_MID, S_SHORT, NI, IS_STMT],
        [NI, IS_MID, S_MID, NI, IS_STMT],
        [NI, S_MID, NI, NI, IS_STMT],
    ],
    [
        [NI, IS_MID, IS_MID, NI, IS_STMT],
        [NI, IS_MID, IS_MID, S_SHORT, IS_STMT],
        [NI, IS_MID, IS_MID, S_MID, IS_STMT],
        [NI, IS_MID, S_MID, NI, IS_STMT],
    ],
    uniform([NI, NI, NI, NI, S_STMT]),
];

/// Batch-mode writes: the database is locked exclusively
const BATCH: [Grid; 5] = [
    uniform([NI, NI, NI, NI, IX_STMT]),
    uniform([NI, X_MID, NI, NI, IX_STMT]),
    uniform([NI, X_MID, N_MID, NI, IX_STMT]),
    uniform([NI, X_MID, N_MID, N_MID, IX_STMT]),
    uniform([NI, NI, NI, NI, X_STMT]),
];

fn category_index(category: LockCategory) -> usize {
    match category {
        LockCategory::File => 0,
        LockCategory::Database => 1,
        LockCategory::Table => 2,
        LockCategory::Tuple => 3,
        LockCategory::LogicalLog => 4,
    }
}

fn isolation_index(isolation: IsolationLevel) -> usize {
    match isolation {
        IsolationLevel::ReadUncommitted => 0,
        IsolationLevel::ReadCommitted => 1,
        IsolationLevel::RepeatableRead => 2,
        IsolationLevel::Serializable => 3,
    }
}

/// What a transaction operating at `isolation` should lock
///
/// * `locked` - category of the object about to be locked
/// * `manipulated` - category of the object the operation works on
/// * `versioning` - the transaction reads snapshots
pub fn lookup(
    isolation: IsolationLevel,
    versioning: bool,
    locked: LockCategory,
    manipulated: LockCategory,
    read_only: bool,
    batch: bool,
) -> (LockMode, LockDuration) {
    let iso = isolation_index(isolation);
    let col = category_index(locked);
    if versioning && read_only {
        return VERSIONING[iso][col];
    }
    let grids = if read_only {
        &READ_ONLY
    } else if batch {
        &BATCH
    } else {
        &READ_WRITE
    };
    grids[category_index(manipulated)][iso][col]
}
