//! Transaction manager
//!
//! Keeps one [`Transaction`] descriptor per session and the registry of
//! databases taken offline after a failed compensating action.

use crate::config::{TransConfig, TransConfigError};
use crate::transaction::Transaction;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use warden_core::{DatabaseId, SessionId, TransactionId};
use warden_durability::LogStore;
use warden_lock::LockManager;

/// State shared by the manager and every descriptor it creates
pub(crate) struct TransContext {
    pub(crate) lock_manager: Arc<LockManager>,
    pub(crate) log: Arc<dyn LogStore>,
    pub(crate) config: RwLock<TransConfig>,
    unavailable: DashSet<DatabaseId>,
    next_id: AtomicU64,
}

impl TransContext {
    pub(crate) fn assign_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn is_available(&self, db: DatabaseId) -> bool {
        !self.unavailable.contains(&db)
    }

    pub(crate) fn mark_unavailable(&self, db: DatabaseId) {
        if self.unavailable.insert(db) {
            error!(database = %db, "database marked unavailable");
        }
    }
}

/// Shared handle to a session's descriptor
pub type SharedTransaction = Arc<Mutex<Transaction>>;

/// Per-session transaction descriptors
pub struct TransactionManager {
    context: Arc<TransContext>,
    sessions: DashMap<SessionId, SharedTransaction>,
    /// Cancel flags, reachable while a descriptor is locked by its session
    cancels: DashMap<SessionId, Arc<AtomicBool>>,
    /// Cancel flags of the branch descriptors sessions are associated with
    branch_cancels: DashMap<SessionId, Arc<AtomicBool>>,
}

impl TransactionManager {
    /// Create a manager over `lock_manager` writing to `log`
    pub fn new(
        lock_manager: Arc<LockManager>,
        log: Arc<dyn LogStore>,
        config: TransConfig,
    ) -> Result<Self, TransConfigError> {
        config.validate()?;
        let sessions = DashMap::with_capacity(config.trans_table_size);
        Ok(TransactionManager {
            context: Arc::new(TransContext {
                lock_manager,
                log,
                config: RwLock::new(config),
                unavailable: DashSet::new(),
                next_id: AtomicU64::new(1),
            }),
            sessions,
            cancels: DashMap::new(),
            branch_cancels: DashMap::new(),
        })
    }

    /// Descriptor of `session`, created on first use
    pub fn attach(&self, session: SessionId) -> SharedTransaction {
        self.sessions
            .entry(session)
            .or_insert_with(|| {
                debug!(session = %session, "transaction descriptor created");
                let transaction = Transaction::new(Arc::clone(&self.context), session);
                self.cancels.insert(session, transaction.cancel_handle());
                Arc::new(Mutex::new(transaction))
            })
            .clone()
    }

    /// A descriptor outside the session table, for XA branches
    pub(crate) fn new_descriptor(&self, session: SessionId) -> Transaction {
        Transaction::new(Arc::clone(&self.context), session)
    }

    /// Route cancellation of `session` to the branch descriptor it works in
    pub(crate) fn enter_branch(&self, session: SessionId, cancel: Arc<AtomicBool>) {
        self.branch_cancels.insert(session, cancel);
    }

    /// Route cancellation of `session` back to its own descriptor
    pub(crate) fn leave_branch(&self, session: SessionId) {
        self.branch_cancels.remove(&session);
    }

    /// Descriptor of `session` if it has one
    pub fn get(&self, session: SessionId) -> Option<SharedTransaction> {
        self.sessions.get(&session).map(|t| t.clone())
    }

    /// Forget the descriptor of a session that is going away
    ///
    /// A transaction still in progress is rolled back when the last handle
    /// to the descriptor is dropped.
    pub fn detach(&self, session: SessionId) -> Option<SharedTransaction> {
        self.cancels.remove(&session);
        self.branch_cancels.remove(&session);
        self.sessions.remove(&session).map(|(_, t)| t)
    }

    /// Cancel the lock waits of `session`'s running transaction
    ///
    /// Reaches the session's own descriptor and the branch it is associated
    /// with, if any. Does not need either descriptor, so it works while the
    /// session is blocked holding one.
    ///
    /// # Returns
    /// False if the session has neither.
    pub fn cancel(&self, session: SessionId) -> bool {
        let mut found = false;
        for flags in [&self.branch_cancels, &self.cancels] {
            if let Some(flag) = flags.get(&session) {
                flag.store(true, Ordering::SeqCst);
                found = true;
            }
        }
        if found {
            debug!(session = %session, "transaction cancelled");
        }
        found
    }

    /// Number of sessions with a descriptor
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions whose transaction is in progress
    pub fn in_progress(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| e.value().lock().is_in_progress())
            .map(|e| *e.key())
            .collect();
        sessions.sort();
        sessions
    }

    /// False once `db` has been marked unavailable
    pub fn is_available(&self, db: DatabaseId) -> bool {
        self.context.is_available(db)
    }

    /// Take `db` offline
    pub fn mark_unavailable(&self, db: DatabaseId) {
        self.context.mark_unavailable(db);
    }

    /// Bring `db` back online
    pub fn clear_unavailable(&self, db: DatabaseId) -> bool {
        self.context.unavailable.remove(&db).is_some()
    }

    /// Databases currently offline, sorted
    pub fn unavailable_databases(&self) -> Vec<DatabaseId> {
        let mut dbs: Vec<DatabaseId> = self.context.unavailable.iter().map(|d| *d).collect();
        dbs.sort();
        dbs
    }

    /// Lock manager transactions lock through
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.context.lock_manager
    }

    /// Log transactions write to
    pub fn log(&self) -> &Arc<dyn LogStore> {
        &self.context.log
    }

    /// Current configuration
    pub fn config(&self) -> TransConfig {
        self.context.config.read().clone()
    }

    /// Replace the configuration; descriptors pick it up on their next begin
    pub fn reload_config(&self, config: TransConfig) -> Result<(), TransConfigError> {
        config.validate()?;
        *self.context.config.write() = config;
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
