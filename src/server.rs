//! The assembled server
//!
//! [`Warden`] wires one lock manager, one log, the transaction manager and
//! the XA branch table together. Opening a server replays the branch
//! records of its log; shutting it down sweeps the branch table and
//! writes a checkpoint.

use crate::config::{WardenConfig, CONFIG_FILE_NAME, LOG_FILE_NAME};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use warden_core::{Error, Result, SessionId};
use warden_durability::{FileLog, LogStore, MemoryLog};
use warden_lock::LockManager;
use warden_trans::{
    BranchManager, BranchRecovery, RecoveryStats, SharedTransaction, TerminationSummary, TransactionManager,
};

/// Lock manager, log, transactions and XA branches of one server
pub struct Warden {
    config: parking_lot::RwLock<WardenConfig>,
    locks: Arc<LockManager>,
    log: Arc<dyn LogStore>,
    transactions: Arc<TransactionManager>,
    branches: BranchManager,
    next_session: AtomicU32,
    recovery: RecoveryStats,
}

impl Warden {
    /// Open a server with an in-memory log and default settings.
    pub fn ephemeral() -> Result<Self> {
        Self::open(WardenConfig::default())
    }

    /// Open the server kept in `dir`
    ///
    /// Writes a default `warden.toml` on first open. Without a `log_path`
    /// the log is `warden.log` in `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        WardenConfig::write_default_if_missing(&config_path)?;
        let mut config = WardenConfig::from_file(&config_path)?;
        config.log_path = Some(match config.log_path.take() {
            Some(path) if path.is_relative() => dir.join(path),
            Some(path) => path,
            None => dir.join(LOG_FILE_NAME),
        });
        Self::open(config)
    }

    /// Open a server from `config`
    ///
    /// Heuristically completed branches found in the log are rebuilt
    /// before this returns.
    pub fn open(config: WardenConfig) -> Result<Self> {
        config.validate()?;
        let log: Arc<dyn LogStore> = match &config.log_path {
            Some(path) => Arc::new(FileLog::open(path, config.sync_mode)?),
            None => Arc::new(MemoryLog::new()),
        };

        let locks = Arc::new(LockManager::new(config.lock.clone()));
        let transactions = Arc::new(
            TransactionManager::new(Arc::clone(&locks), Arc::clone(&log), config.trans.clone())
                .map_err(|e| Error::Config(format!("[trans] {}", e)))?,
        );
        let branches = BranchManager::new(Arc::clone(&transactions));
        let recovery = BranchRecovery::new(&branches).redo_all(&*log)?;

        info!(
            log = ?config.log_path,
            pending_branches = recovery.pending,
            "warden opened"
        );
        Ok(Warden {
            config: parking_lot::RwLock::new(config),
            locks,
            log,
            transactions,
            branches,
            next_session: AtomicU32::new(1),
            recovery,
        })
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Open a session and return its descriptor
    pub fn open_session(&self) -> (SessionId, SharedTransaction) {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst));
        debug!(session = %session, "session opened");
        (session, self.transactions.attach(session))
    }

    /// Descriptor of an open session
    pub fn session(&self, session: SessionId) -> Option<SharedTransaction> {
        self.transactions.get(session)
    }

    /// Close a session; a transaction still running on it is rolled back
    pub fn close_session(&self, session: SessionId) {
        if self.transactions.detach(session).is_some() {
            debug!(session = %session, "session closed");
        }
    }

    /// Cancel the lock waits of a session's transaction
    pub fn cancel(&self, session: SessionId) -> bool {
        self.transactions.cancel(session)
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// The lock manager
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// The log
    pub fn log(&self) -> &Arc<dyn LogStore> {
        &self.log
    }

    /// The transaction manager
    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// The XA branch table
    pub fn branches(&self) -> &BranchManager {
        &self.branches
    }

    /// What recovery found when the server was opened
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.recovery
    }

    /// Current configuration
    pub fn config(&self) -> WardenConfig {
        self.config.read().clone()
    }

    /// Apply new `[lock]` and `[trans]` settings
    ///
    /// Log settings are kept until the next open.
    pub fn reload_config(&self, config: WardenConfig) -> Result<()> {
        config.validate()?;
        self.locks
            .reload_config(config.lock.clone())
            .map_err(|e| Error::Config(format!("[lock] {}", e)))?;
        self.transactions
            .reload_config(config.trans.clone())
            .map_err(|e| Error::Config(format!("[trans] {}", e)))?;

        let mut current = self.config.write();
        current.lock = config.lock;
        current.trans = config.trans;
        info!("configuration reloaded");
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Resolve idle and prepared branches and checkpoint the survivors
    pub fn shutdown(&self) -> Result<TerminationSummary> {
        let summary = self.branches.prepare_termination();
        let lsn = self.branches.write_checkpoint()?;
        info!(%lsn, pending_branches = self.branches.heur_completion_info().len(), "warden shut down");
        Ok(summary)
    }
}

impl std::fmt::Debug for Warden {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warden")
            .field("sessions", &self.transactions.session_count())
            .field("branches", &self.branches.len())
            .finish()
    }
}
