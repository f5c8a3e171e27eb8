//! Transaction descriptor
//!
//! A [`Transaction`] belongs to one session and outlives the transactions
//! run on it. It owns the session's [`LockClient`], so locks held with
//! `Long` duration survive from one transaction to the next.
//!
//! ## Logging
//!
//! Records go to the system log or to the log of the database the
//! transaction works on. The first record stored in a log is preceded by a
//! `TransactionBegin` record; prepare, commit and rollback write their
//! record to every log the transaction has touched. A `no_log` transaction
//! stores nothing.
//!
//! ## Lock waits
//!
//! Every wait passes the descriptor's cancel flag to the lock manager. The
//! request stays queued until it is granted, times out, loses a deadlock or
//! the flag is set.

use crate::adequate;
use crate::manager::TransContext;
use crate::types::{Category, IsolationLevel, TransactionKind, TransactionMode, TransactionStatus};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use warden_core::{DatabaseId, Error, LockCategory, LockName, Result, SessionId, TransactionId, Xid};
use warden_durability::{LogCategory, LogRecord, Lsn};
use warden_lock::{LockClient, LockDuration, LockMode, LockStatus, Timeout};

/// Transaction descriptor of one session
pub struct Transaction {
    context: Arc<TransContext>,
    session: SessionId,
    client: LockClient,
    id: Option<TransactionId>,
    status: TransactionStatus,
    kind: TransactionKind,
    category: Category,
    isolation: IsolationLevel,
    no_lock: bool,
    no_log: bool,
    versioning: bool,
    database: Option<DatabaseId>,
    /// Logs a `TransactionBegin` record has been written to
    logged: SmallVec<[LogCategory; 2]>,
    in_statement: bool,
    cancel: Arc<AtomicBool>,
}

impl Transaction {
    pub(crate) fn new(context: Arc<TransContext>, session: SessionId) -> Self {
        let client = context.lock_manager.client();
        let config = context.config.read().clone();
        Transaction {
            context,
            session,
            client,
            id: None,
            status: TransactionStatus::NotInProgress,
            kind: TransactionKind::Explicit,
            category: config.category,
            isolation: config.isolation_level,
            no_lock: config.no_lock,
            no_log: config.no_log,
            versioning: false,
            database: None,
            logged: SmallVec::new(),
            in_statement: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    // ========================================================================
    // Life cycle
    // ========================================================================

    /// Start a transaction on `database` (or on no particular database)
    ///
    /// # Errors
    /// - `AlreadyBeginTransaction` if a transaction is in progress
    /// - `DatabaseUnavailable` if `database` has been taken offline
    pub fn begin(&mut self, database: Option<DatabaseId>, mode: TransactionMode) -> Result<TransactionId> {
        self.begin_as(database, mode, TransactionKind::Explicit)
    }

    pub(crate) fn begin_as(
        &mut self,
        database: Option<DatabaseId>,
        mode: TransactionMode,
        kind: TransactionKind,
    ) -> Result<TransactionId> {
        if self.is_in_progress() {
            return Err(Error::AlreadyBeginTransaction);
        }
        if let Some(db) = database {
            if !self.context.is_available(db) {
                return Err(Error::DatabaseUnavailable(db));
            }
        }

        let config = self.context.config.read().clone();
        self.category = mode.category.unwrap_or(config.category);
        self.no_lock = mode.no_lock || config.no_lock;
        self.no_log = mode.no_log || config.no_log;
        self.versioning = !config.no_version
            && self.category == Category::ReadOnly
            && mode.snapshot
            && database.is_some();
        self.isolation = mode.isolation.unwrap_or(config.isolation_level);
        if self.versioning {
            self.isolation = IsolationLevel::Serializable;
        } else if self.isolation == IsolationLevel::ReadUncommitted {
            self.isolation = IsolationLevel::ReadCommitted;
        }

        let id = self.context.assign_id();
        self.id = Some(id);
        self.kind = kind;
        self.database = database;
        self.logged.clear();
        self.in_statement = false;
        self.cancel.store(false, Ordering::SeqCst);
        self.status = TransactionStatus::InProgress;

        debug!(
            session = %self.session,
            txn = %id,
            category = ?self.category,
            isolation = ?self.isolation,
            versioning = self.versioning,
            "transaction started"
        );
        Ok(id)
    }

    /// First phase of two-phase commit
    ///
    /// Writes a `TransactionPrepare` record to every log the transaction
    /// has written to.
    pub fn prepare(&mut self, xid: Option<&Xid>) -> Result<()> {
        if self.status != TransactionStatus::InProgress {
            return Err(Error::NotBeginTransaction);
        }
        let txn = self.require_id()?;
        self.status = TransactionStatus::Preparing;
        let record = LogRecord::TransactionPrepare {
            txn,
            xid: xid.cloned(),
        };
        if let Err(e) = self.store_to_touched(&record) {
            self.status = TransactionStatus::Failed;
            return Err(e);
        }
        self.status = TransactionStatus::Prepared;
        debug!(session = %self.session, txn = %txn, "transaction prepared");
        Ok(())
    }

    /// Commit the transaction and end it
    ///
    /// If a commit record cannot be written, a compensating rollback
    /// record is attempted. When that fails too, the database is marked
    /// unavailable. Either way the commit error is returned and the
    /// transaction is left `Failed` for the caller to roll back.
    pub fn commit(&mut self) -> Result<()> {
        if !matches!(
            self.status,
            TransactionStatus::InProgress | TransactionStatus::Prepared
        ) {
            return Err(Error::NotBeginTransaction);
        }
        let txn = self.require_id()?;
        self.status = TransactionStatus::Committing;

        if let Err(e) = self.store_to_touched(&LogRecord::TransactionCommit { txn }) {
            self.recover_failed_commit(txn);
            self.status = TransactionStatus::Failed;
            return Err(e);
        }

        self.status = TransactionStatus::Committed;
        self.end();
        debug!(session = %self.session, txn = %txn, "transaction committed");
        Ok(())
    }

    /// Roll the transaction back and end it
    ///
    /// Failing to write the rollback record marks the database
    /// unavailable; the rollback still completes.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.is_in_progress() {
            return Err(Error::NotBeginTransaction);
        }
        let txn = self.require_id()?;
        self.status = TransactionStatus::Rollbacking;
        self.client.unlatch_all();

        let record = LogRecord::TransactionRollback { txn };
        for category in self.logged.clone() {
            if let Err(e) = self.context.log.store(category, &record) {
                error!(txn = %txn, ?category, error = %e, "failed to log rollback");
                self.mark_unavailable(category);
            }
        }

        self.status = TransactionStatus::Rollbacked;
        self.end();
        debug!(session = %self.session, txn = %txn, "transaction rolled back");
        Ok(())
    }

    /// Compensate for a commit record that could not be written
    fn recover_failed_commit(&mut self, txn: TransactionId) {
        let record = LogRecord::TransactionRollback { txn };
        for category in self.logged.clone() {
            if let Err(e) = self.context.log.store(category, &record) {
                error!(txn = %txn, ?category, error = %e, "recovery failed");
                self.mark_unavailable(category);
            }
        }
    }

    fn mark_unavailable(&self, category: LogCategory) {
        let db = match category {
            LogCategory::Database(db) => Some(db),
            LogCategory::System => self.database,
        };
        if let Some(db) = db {
            self.context.mark_unavailable(db);
        }
    }

    /// Release transaction-scoped locks and leave all latches
    fn end(&mut self) {
        self.client.unlatch_all();
        self.client.release_stack_requests(LockDuration::Statement, true);
        self.client.release_all(LockDuration::Middle);
        self.logged.clear();
        self.in_statement = false;
    }

    fn require_id(&self) -> Result<TransactionId> {
        self.id.ok_or(Error::NotBeginTransaction)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Open a statement
    pub fn begin_statement(&mut self) -> Result<()> {
        if self.status != TransactionStatus::InProgress {
            return Err(Error::NotBeginTransaction);
        }
        self.in_statement = true;
        Ok(())
    }

    /// Close the current statement successfully
    ///
    /// Statement-duration locks are released; longer locks taken during
    /// the statement are kept.
    pub fn commit_statement(&mut self) -> Result<()> {
        let txn = self.require_id()?;
        let result = self.store_to_touched(&LogRecord::StatementCommit { txn });
        self.client.release_stack_requests(LockDuration::Statement, true);
        self.in_statement = false;
        result
    }

    /// Close the current statement as failed
    ///
    /// Every lock taken during the statement is released.
    pub fn rollback_statement(&mut self) -> Result<()> {
        let txn = self.require_id()?;
        self.client.unlatch_all();
        let result = self.store_to_touched(&LogRecord::StatementRollback { txn });
        self.client.release_stack_requests(LockDuration::Statement, false);
        self.in_statement = false;
        result
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Lock `name` in `mode`
    ///
    /// # Returns
    /// `Ok(false)` if a bounded wait expired.
    ///
    /// # Errors
    /// - `NotBeginTransaction` for a non-`Long` lock outside a transaction
    /// - `Cancelled` if the transaction was cancelled while waiting
    /// - `Deadlock`, `LackOfParent`
    pub fn lock(&self, name: &LockName, mode: LockMode, duration: LockDuration, timeout: Timeout) -> Result<bool> {
        if self.no_lock || mode == LockMode::N {
            return Ok(true);
        }
        if !self.is_in_progress() && duration != LockDuration::Long {
            return Err(Error::NotBeginTransaction);
        }
        let status = self.hold_cancellable(name, mode, duration, timeout)?;
        match status {
            LockStatus::Timeout => Ok(false),
            other => other.into_result(name).map(|_| true),
        }
    }

    fn hold_cancellable(
        &self,
        name: &LockName,
        mode: LockMode,
        duration: LockDuration,
        timeout: Timeout,
    ) -> Result<LockStatus> {
        let status = self.client.hold_cancellable(name, mode, duration, timeout, &self.cancel);
        if status == LockStatus::Cancelled {
            debug!(session = %self.session, name = %name, "lock wait cancelled");
            return Err(Error::Cancelled);
        }
        Ok(status)
    }

    /// Release one hold of `mode` on `name`
    pub fn unlock(&self, name: &LockName, mode: LockMode, duration: LockDuration) -> Result<()> {
        if self.no_lock || mode == LockMode::N {
            return Ok(());
        }
        self.client.release(name, mode, duration).into_result(name)
    }

    /// Lock `name` in `to`, then release `from`
    ///
    /// # Returns
    /// `Ok(false)` if a bounded wait expired; `from` is still held then.
    pub fn convert_lock(
        &self,
        name: &LockName,
        from: LockMode,
        to: LockMode,
        duration: LockDuration,
        timeout: Timeout,
    ) -> Result<bool> {
        if self.no_lock {
            return Ok(true);
        }
        if !self.lock(name, to, duration, timeout)? {
            return Ok(false);
        }
        self.unlock(name, from, duration)?;
        Ok(true)
    }

    /// Enter the latch of `name`
    pub fn latch(&self, name: &LockName) -> Result<()> {
        if self.no_lock {
            return Ok(());
        }
        self.context
            .lock_manager
            .attach(name.clone())
            .latch(&self.client)
    }

    /// Leave the latch of `name`
    pub fn unlatch(&self, name: &LockName) -> Result<()> {
        if self.no_lock {
            return Ok(());
        }
        self.context
            .lock_manager
            .attach(name.clone())
            .unlatch(&self.client)
    }

    /// Mode and duration to lock an object of category `locked` with when
    /// operating on an object of category `manipulated`
    ///
    /// Returns `N` when no lock is needed.
    pub fn adequate_lock(
        &self,
        locked: LockCategory,
        manipulated: LockCategory,
        read_only: bool,
        batch: bool,
    ) -> (LockMode, LockDuration) {
        if self.no_lock || self.status.is_terminating() {
            return (LockMode::N, LockDuration::Instant);
        }
        adequate::lookup(self.isolation, self.versioning, locked, manipulated, read_only, batch)
    }

    // ========================================================================
    // Logging
    // ========================================================================

    /// Store `record` in the log of `category`
    ///
    /// # Returns
    /// `None` if the transaction does not log.
    pub fn store_log(&mut self, category: LogCategory, record: &LogRecord) -> Result<Option<Lsn>> {
        if !self.is_in_progress() {
            return Err(Error::NotBeginTransaction);
        }
        if self.no_log {
            return Ok(None);
        }
        if let LogCategory::Database(db) = category {
            if !self.context.is_available(db) {
                return Err(Error::DatabaseUnavailable(db));
            }
        }
        if !self.logged.contains(&category) {
            let txn = self.require_id()?;
            self.context
                .log
                .store(category, &LogRecord::TransactionBegin { txn })?;
            self.logged.push(category);
        }
        self.context.log.store(category, record).map(Some)
    }

    fn store_to_touched(&self, record: &LogRecord) -> Result<()> {
        if self.no_log {
            return Ok(());
        }
        for category in &self.logged {
            self.context.log.store(*category, record)?;
        }
        Ok(())
    }

    /// True if anything has been logged to `category` in this transaction
    pub fn is_log_stored(&self, category: LogCategory) -> bool {
        self.logged.contains(&category)
    }

    /// True if anything has been logged in this transaction
    pub fn has_log(&self) -> bool {
        !self.logged.is_empty()
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Ask the running transaction to stop waiting for locks
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Shared flag that cancels this transaction when set
    ///
    /// Lets another thread cancel a transaction blocked in a lock wait.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// True once cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Session owning the descriptor
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub(crate) fn set_session(&mut self, session: SessionId) {
        self.session = session;
    }

    /// Id of the current (or last) transaction
    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// True between begin and commit/rollback
    pub fn is_in_progress(&self) -> bool {
        self.status.is_in_progress()
    }

    /// How the transaction was started
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Read-only or read-write
    pub fn category(&self) -> Category {
        self.category
    }

    /// Effective isolation level
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// True if the transaction does not lock
    pub fn is_no_lock(&self) -> bool {
        self.no_lock
    }

    /// True if the transaction does not log
    pub fn is_no_log(&self) -> bool {
        self.no_log
    }

    /// True if the transaction reads snapshots
    pub fn is_versioning(&self) -> bool {
        self.versioning
    }

    /// True inside `begin_statement` .. `commit/rollback_statement`
    pub fn in_statement(&self) -> bool {
        self.in_statement
    }

    /// Database the transaction works on
    pub fn database(&self) -> Option<DatabaseId> {
        self.database
    }

    /// Lock client of the session
    pub fn client(&self) -> &LockClient {
        &self.client
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_in_progress() {
            warn!(session = %self.session, "dropping descriptor with a transaction in progress");
            if let Err(e) = self.rollback() {
                warn!(session = %self.session, error = %e, "rollback on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("session", &self.session)
            .field("id", &self.id)
            .field("status", &self.status)
            .field("kind", &self.kind)
            .finish()
    }
}
