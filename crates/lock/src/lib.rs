//! Hierarchical two-phase lock manager for warden
//!
//! This crate implements multi-granularity locking with:
//! - LockMode: sixteen modes forming a least-upper-bound lattice
//! - LockCount: per-mode hold counts with an effective mode
//! - LockItem: a lockable resource, optionally latchable
//! - LockClient: a requester (one per transaction)
//! - Deadlock detection over the wait-for graph with a pluggable victim policy
//! - Bounded descriptor pools for items and requests
//!
//! # Architecture
//!
//! All state of one [`LockManager`] sits behind a single latch. The only
//! blocking point is a client's lock wait, which parks on a per-client
//! condition variable with the latch released and wakes up at least once
//! per configured wait slice.
//!
//! Hierarchy checks (ancestor intent locks, descendant coverage) are
//! configuration switches and are off by default; callers are expected to
//! lock top-down.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod count;
pub mod deadlock;
pub mod duration;
pub mod item;
mod latch;
pub mod manager;
pub mod mode;
mod pool;
pub mod request;
pub mod status;

pub use client::{ClientId, LockClient};
pub use config::{LockConfig, LockConfigError};
pub use count::LockCount;
pub use deadlock::{DetectorIsVictim, VictimPolicy, YoungestIsVictim};
pub use duration::{LockDuration, Timeout};
pub use item::LockItem;
pub use manager::{LockManager, LockStats};
pub use mode::{LockMode, ModeSet, MODE_COUNT};
pub use request::RequestCondition;
pub use status::LockStatus;
