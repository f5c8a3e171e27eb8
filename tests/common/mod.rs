//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, Instant};

pub use warden::{
    BranchStatus, DatabaseId, EndOption, Error, HeurDecision, LockDuration, LockMode, LockName, LogCategory,
    LogRecord, SessionId, StartOption, SyncMode, Timeout, TransactionMode, Warden, WardenConfig, Xid,
};
use tempfile::TempDir;

static INIT_TRACING: Once = Once::new();

/// Route tracing output to the test harness once per binary.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

pub const DB: DatabaseId = DatabaseId(1);

/// XID with format id 1
pub fn xid(gtrid: &str, bqual: &str) -> Xid {
    Xid::new(1, gtrid.as_bytes().to_vec(), bqual.as_bytes().to_vec()).unwrap()
}

// ============================================================================
// TestServer - a server kept in a temporary directory
// ============================================================================

/// Server over a file log in a temp dir, reopenable to simulate a restart.
pub struct TestServer {
    pub warden: Warden,
    pub dir: TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let warden = Warden::open(Self::config(dir.path())).unwrap();
        TestServer { warden, dir }
    }

    fn config(dir: &Path) -> WardenConfig {
        WardenConfig::for_testing()
            .with_log_path(dir.join("warden.log"))
            .with_sync_mode(SyncMode::Strict)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("warden.log")
    }

    /// Shut down cleanly and open again over the same log.
    pub fn restart(self) -> Self {
        let TestServer { warden, dir } = self;
        warden.shutdown().unwrap();
        drop(warden);
        let warden = Warden::open(Self::config(dir.path())).unwrap();
        TestServer { warden, dir }
    }

    /// Open again without shutting down, as after a crash.
    pub fn crash(self) -> Self {
        let TestServer { warden, dir } = self;
        drop(warden);
        let warden = Warden::open(Self::config(dir.path())).unwrap();
        TestServer { warden, dir }
    }
}

/// Wait until `n` clients are blocked in the lock manager.
pub fn wait_for_waiters(warden: &Warden, n: usize) {
    let start = Instant::now();
    while warden.lock_manager().stats().waiting_clients < n {
        assert!(start.elapsed() < Duration::from_secs(5), "waiters never blocked");
        std::thread::sleep(Duration::from_millis(2));
    }
}
