//! Integration Tests
//!
//! Cross-layer tests through the assembled server:
//! - XA: two-phase commit, heuristic completion, restart and recovery
//! - Locking: hierarchy, deadlocks and session locks through transactions
//! - Sessions: configuration, cancellation, closing sessions

#[path = "../common/mod.rs"]
mod common;

mod locking;
mod sessions;
mod xa;
