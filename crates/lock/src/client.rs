//! Lock clients: one per transaction
//!
//! A client owns its requests (one per item it holds or waits for), the
//! list of latches it is inside, and its wait state. Waiting is the only
//! place the lock manager blocks: the client parks on its own condition
//! variable with the manager latch released, in bounded slices.

use crate::duration::{LockDuration, Timeout};
use crate::manager::{LockManager, LockTable};
use crate::mode::LockMode;
use crate::request::{RequestCondition, RequestEntry};
use crate::status::LockStatus;
use parking_lot::{Condvar, MutexGuard};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{trace, warn};
use warden_core::LockName;

/// Identifies a lock client within its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

/// What a waiting client is waiting for
#[derive(Debug, Clone)]
pub(crate) struct WaitTarget {
    pub(crate) name: LockName,
    pub(crate) mode: LockMode,
    pub(crate) duration: LockDuration,
}

/// Per-client state in the lock table
#[derive(Debug, Default)]
pub(crate) struct ClientEntry {
    pub(crate) requests: FxHashMap<LockName, Box<RequestEntry>>,
    pub(crate) waiting: Option<WaitTarget>,
    pub(crate) signal: Arc<Condvar>,
    pub(crate) mark: u64,
    pub(crate) latched: SmallVec<[LockName; 4]>,
}

// =============================================================================
// Waiting
// =============================================================================

impl LockTable {
    fn condition_of(&self, client: ClientId, name: &LockName) -> RequestCondition {
        self.clients
            .get(&client)
            .and_then(|c| c.requests.get(name))
            .map(|r| r.condition)
            .unwrap_or_default()
    }

    /// Drop `client`'s pending wait on `name` without granting it
    pub(crate) fn abandon_wait(&mut self, client: ClientId, name: &LockName) {
        if let Some(entry) = self.clients.get_mut(&client) {
            entry.waiting = None;
            if let Some(request) = entry.requests.get_mut(name) {
                request.condition = RequestCondition::Granted;
            }
        }
    }

    /// Wake `victim` out of its wait with a deadlock
    pub(crate) fn mark_deadlocked(&mut self, victim: ClientId) {
        let Some(entry) = self.clients.get_mut(&victim) else {
            return;
        };
        let Some(target) = entry.waiting.take() else {
            return;
        };
        if let Some(request) = entry.requests.get_mut(&target.name) {
            request.condition = RequestCondition::Deadlocked;
        }
        entry.signal.notify_one();
    }
}

impl LockManager {
    /// Block `client` until its pending hold on `name` is granted, it is
    /// chosen as a deadlock victim, `timeout` expires or `cancel` is set
    ///
    /// Runs deadlock detection once before blocking. The request stays
    /// queued for the whole wait; the client wakes every `wait_slice_ms`
    /// to re-check it and the cancel flag.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn proceed_to_wait(
        &self,
        table: &mut MutexGuard<'_, LockTable>,
        client: ClientId,
        name: &LockName,
        mode: LockMode,
        duration: LockDuration,
        timeout: Timeout,
        cancel: Option<&AtomicBool>,
    ) -> LockStatus {
        let signal = {
            let Some(entry) = table.clients.get_mut(&client) else {
                warn!(client = %client, item = %name, "wait requested by unregistered client");
                return LockStatus::Timeout;
            };
            entry.waiting = Some(WaitTarget {
                name: name.clone(),
                mode,
                duration,
            });
            if let Some(request) = entry.requests.get_mut(name) {
                request.condition = if request.is_granted() {
                    RequestCondition::Converting
                } else {
                    RequestCondition::Waiting
                };
            }
            Arc::clone(&entry.signal)
        };
        trace!(client = %client, item = %name, mode = %mode, "waiting for lock");

        if self.detect_deadlock(table, client) == Some(client) {
            table.abandon_wait(client, name);
            return LockStatus::Deadlock;
        }

        let deadline = match timeout {
            Timeout::After(limit) => Some(Instant::now() + limit),
            Timeout::Unlimited => None,
        };
        let cancelled = || cancel.is_some_and(|flag| flag.load(Ordering::Acquire));
        loop {
            if cancelled() {
                table.abandon_wait(client, name);
                trace!(client = %client, item = %name, "lock wait cancelled");
                return LockStatus::Cancelled;
            }
            let slice = table.config.wait_slice();
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        table.abandon_wait(client, name);
                        trace!(client = %client, item = %name, "lock wait timed out");
                        return LockStatus::Timeout;
                    }
                    (deadline - now).min(slice)
                }
                None => slice,
            };
            signal.wait_for(table, wait);

            match table.condition_of(client, name) {
                RequestCondition::Granted => return LockStatus::Succeeded,
                RequestCondition::Deadlocked => {
                    table.abandon_wait(client, name);
                    return LockStatus::Deadlock;
                }
                RequestCondition::Waiting | RequestCondition::Converting => {
                    if table.try_grant(client, name) {
                        return LockStatus::Succeeded;
                    }
                }
            }
        }
    }
}

// =============================================================================
// Bulk release
// =============================================================================

impl LockTable {
    fn request_names(&self, client: ClientId) -> SmallVec<[LockName; 16]> {
        self.clients
            .get(&client)
            .map(|e| e.requests.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Release every hold of `client` whose duration is at most `duration`
    pub(crate) fn release_all(&mut self, client: ClientId, duration: LockDuration) {
        for name in self.request_names(client) {
            let mut held: SmallVec<[(LockDuration, LockMode, u32); 8]> = SmallVec::new();
            if let Some(request) = self.clients.get(&client).and_then(|e| e.requests.get(&name)) {
                for d in LockDuration::RECORDED.into_iter().filter(|d| *d <= duration) {
                    let Some(slot) = d.slot() else { continue };
                    held.extend(request.durations[slot].iter().map(|(m, n)| (d, m, n)));
                }
            }
            if held.is_empty() {
                continue;
            }
            for (d, m, n) in held {
                self.unrecord(client, &name, m, d, n);
            }
            self.check_compatible(&name);
            self.settle_request(client, &name);
        }
    }

    /// Close the current statement for `client`
    ///
    /// Holds taken during the statement with a duration at most `duration`
    /// are released. Longer holds are released too if the statement
    /// failed, and kept otherwise. The statement stack is cleared.
    pub(crate) fn release_stack_requests(&mut self, client: ClientId, duration: LockDuration, succeeded: bool) {
        for name in self.request_names(client) {
            let mut stacked: SmallVec<[(LockDuration, LockMode, u32); 8]> = SmallVec::new();
            if let Some(request) = self.clients.get(&client).and_then(|e| e.requests.get(&name)) {
                for d in LockDuration::RECORDED {
                    if d > duration && succeeded {
                        continue;
                    }
                    let Some(slot) = d.slot() else { continue };
                    stacked.extend(request.stack[slot].iter().map(|(m, n)| (d, m, n)));
                }
            }
            for (d, m, n) in stacked.iter().copied() {
                self.unrecord(client, &name, m, d, n);
            }
            if let Some(request) = self
                .clients
                .get_mut(&client)
                .and_then(|e| e.requests.get_mut(&name))
            {
                request.stack.iter_mut().for_each(|s| s.clear());
            }
            if !stacked.is_empty() {
                self.check_compatible(&name);
            }
            self.settle_request(client, &name);
        }
    }

    /// Leave every latch `client` is inside, most recent first
    pub(crate) fn unlatch_all(&mut self, client: ClientId) {
        while let Some(name) = self.clients.get(&client).and_then(|e| e.latched.last().cloned()) {
            if !self.unlatch(client, &name) {
                break;
            }
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// A lock requester, one per transaction
///
/// Dropping the client leaves all its latches and releases all its holds.
pub struct LockClient {
    manager: Arc<LockManager>,
    id: ClientId,
}

impl LockClient {
    pub(crate) fn new(manager: Arc<LockManager>, id: ClientId) -> Self {
        LockClient { manager, id }
    }

    /// Client id
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Manager this client belongs to
    pub fn manager(&self) -> &Arc<LockManager> {
        &self.manager
    }

    /// Attach to `name` and hold `mode` on it
    pub fn hold(&self, name: &LockName, mode: LockMode, duration: LockDuration, timeout: Timeout) -> LockStatus {
        self.manager.attach(name.clone()).hold(self, mode, duration, timeout)
    }

    /// Like [`hold`](Self::hold), but give up with `Cancelled` once `cancel`
    /// is set
    ///
    /// The flag is checked before blocking and on every wake-up, so a
    /// cancelled waiter leaves within one `wait_slice_ms`.
    pub fn hold_cancellable(
        &self,
        name: &LockName,
        mode: LockMode,
        duration: LockDuration,
        timeout: Timeout,
        cancel: &AtomicBool,
    ) -> LockStatus {
        self.manager
            .attach(name.clone())
            .hold_cancellable(self, mode, duration, timeout, cancel)
    }

    /// Release one hold of `mode` on `name`
    pub fn release(&self, name: &LockName, mode: LockMode, duration: LockDuration) -> LockStatus {
        self.manager.release(self.id, name, mode, duration)
    }

    /// Effective mode this client holds on `name`
    pub fn held_mode(&self, name: &LockName) -> LockMode {
        self.manager
            .lock_table()
            .clients
            .get(&self.id)
            .and_then(|e| e.requests.get(name))
            .map(|r| r.granted())
            .unwrap_or_default()
    }

    /// Every resource this client holds something on, with its effective mode
    pub fn held_locks(&self) -> Vec<(LockName, LockMode)> {
        let table = self.manager.lock_table();
        let mut held: Vec<_> = table
            .clients
            .get(&self.id)
            .map(|e| {
                e.requests
                    .iter()
                    .filter(|(_, r)| r.is_granted())
                    .map(|(n, r)| (n.clone(), r.granted()))
                    .collect()
            })
            .unwrap_or_default();
        held.sort();
        held
    }

    /// True while blocked in a lock wait
    pub fn is_waiting(&self) -> bool {
        self.manager
            .lock_table()
            .clients
            .get(&self.id)
            .map_or(false, |e| e.waiting.is_some())
    }

    /// Number of latch levels this client is inside
    pub fn latched_count(&self) -> usize {
        self.manager
            .lock_table()
            .clients
            .get(&self.id)
            .map_or(0, |e| e.latched.len())
    }

    /// Close the current statement
    ///
    /// Holds taken during the statement with a duration at most `duration`
    /// are always released; longer ones only if `succeeded` is false.
    pub fn release_stack_requests(&self, duration: LockDuration, succeeded: bool) {
        self.manager
            .lock_table()
            .release_stack_requests(self.id, duration, succeeded);
    }

    /// Release every hold whose duration is at most `duration`
    pub fn release_all(&self, duration: LockDuration) {
        self.manager.lock_table().release_all(self.id, duration);
    }

    /// Leave every latch, most recent first
    pub fn unlatch_all(&self) {
        self.manager.lock_table().unlatch_all(self.id);
    }
}

impl Drop for LockClient {
    fn drop(&mut self) {
        let mut table = self.manager.lock_table();
        table.unlatch_all(self.id);
        table.release_all(self.id, LockDuration::Long);
        table.clients.remove(&self.id);
    }
}

impl fmt::Debug for LockClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockClient").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use std::time::Duration;
    use warden_core::DatabaseId;
    use LockMode::*;

    const DB: DatabaseId = DatabaseId(2);
    const SHORT: Timeout = Timeout::After(Duration::from_millis(30));

    fn manager() -> Arc<LockManager> {
        Arc::new(LockManager::new(LockConfig::for_testing()))
    }

    #[test]
    fn test_release_all_by_duration() {
        let manager = manager();
        let a = manager.client();
        let t1 = LockName::table(DB, 1);
        let t2 = LockName::table(DB, 2);
        let t3 = LockName::table(DB, 3);
        a.hold(&t1, S, LockDuration::Statement, SHORT);
        a.hold(&t2, S, LockDuration::Middle, SHORT);
        a.hold(&t3, S, LockDuration::Long, SHORT);

        a.release_all(LockDuration::Statement);
        assert_eq!(a.held_mode(&t1), N);
        assert_eq!(a.held_mode(&t2), S);

        a.release_all(LockDuration::Middle);
        assert_eq!(a.held_mode(&t2), N);
        assert_eq!(a.held_mode(&t3), S);

        a.release_all(LockDuration::Long);
        assert!(a.held_locks().is_empty());
        assert_eq!(manager.stats().items, 0);
    }

    #[test]
    fn test_statement_success_keeps_long_holds() {
        let manager = manager();
        let a = manager.client();
        let t1 = LockName::table(DB, 1);
        let t2 = LockName::table(DB, 2);
        a.hold(&t1, IX, LockDuration::Middle, SHORT);
        a.hold(&t2, S, LockDuration::Inside, SHORT);

        a.release_stack_requests(LockDuration::Inside, true);
        assert_eq!(a.held_mode(&t1), IX);
        assert_eq!(a.held_mode(&t2), N);

        // The stack was cleared, so a failing next statement keeps t1
        a.release_stack_requests(LockDuration::Inside, false);
        assert_eq!(a.held_mode(&t1), IX);
    }

    #[test]
    fn test_statement_failure_releases_statement_holds() {
        let manager = manager();
        let a = manager.client();
        let before = LockName::table(DB, 1);
        let during = LockName::table(DB, 2);
        a.hold(&before, IS, LockDuration::Middle, SHORT);
        a.release_stack_requests(LockDuration::Inside, true);

        a.hold(&during, X, LockDuration::Middle, SHORT);
        a.hold(&before, IX, LockDuration::Middle, SHORT);
        assert_eq!(a.held_mode(&before), IX);

        a.release_stack_requests(LockDuration::Inside, false);
        assert_eq!(a.held_mode(&during), N);
        assert_eq!(a.held_mode(&before), IS);
    }

    #[test]
    fn test_release_all_wakes_waiter() {
        let manager = manager();
        let a = manager.client();
        let b = manager.client();
        let name = LockName::tuple(DB, 1, 1);
        a.hold(&name, X, LockDuration::Middle, SHORT);

        let handle = {
            let manager = Arc::clone(&manager);
            let name = name.clone();
            std::thread::spawn(move || {
                let b2 = manager.client();
                let status = b2.hold(&name, X, LockDuration::Middle, Timeout::After(Duration::from_secs(5)));
                (status, b2.held_mode(&name))
            })
        };
        while manager.stats().waiting_clients == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        a.release_all(LockDuration::Middle);
        let (status, mode) = handle.join().unwrap();
        assert_eq!(status, LockStatus::Succeeded);
        assert_eq!(mode, X);
        drop(b);
    }

    #[test]
    fn test_drop_releases_everything() {
        let manager = manager();
        let name = LockName::table(DB, 1);
        {
            let a = manager.client();
            a.hold(&name, X, LockDuration::Long, SHORT);
            manager.attach(LockName::file(DB, 1, 0)).latch(&a).unwrap();
            assert_eq!(a.latched_count(), 1);
        }
        let b = manager.client();
        assert!(b.hold(&name, X, LockDuration::Middle, SHORT).is_succeeded());
        assert_eq!(manager.stats().clients, 1);
    }

    #[test]
    fn test_unlatch_all_most_recent_first() {
        let manager = manager();
        let a = manager.client();
        let f1 = manager.attach(LockName::file(DB, 1, 0));
        let f2 = manager.attach(LockName::file(DB, 1, 1));
        f1.latch(&a).unwrap();
        f2.latch(&a).unwrap();
        f1.latch(&a).unwrap();
        assert_eq!(a.latched_count(), 3);
        a.unlatch_all();
        assert_eq!(a.latched_count(), 0);

        let b = manager.client();
        f1.latch(&b).unwrap();
        f2.latch(&b).unwrap();
        b.unlatch_all();
    }

    #[test]
    fn test_unlimited_wait_polls_in_slices() {
        let manager = manager();
        let a = manager.client();
        let name = LockName::table(DB, 1);
        a.hold(&name, X, LockDuration::Middle, SHORT);

        let handle = {
            let manager = Arc::clone(&manager);
            let name = name.clone();
            std::thread::spawn(move || {
                let b = manager.client();
                b.hold(&name, S, LockDuration::Middle, Timeout::Unlimited)
            })
        };
        // Several wait slices pass before the release
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(manager.stats().waiting_clients, 1);
        a.release(&name, X, LockDuration::Middle);
        assert_eq!(handle.join().unwrap(), LockStatus::Succeeded);
    }

    #[test]
    fn test_cancel_flag_ends_queued_wait() {
        let manager = manager();
        let a = manager.client();
        let name = LockName::table(DB, 1);
        a.hold(&name, X, LockDuration::Middle, SHORT);

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = {
            let manager = Arc::clone(&manager);
            let name = name.clone();
            let cancel = Arc::clone(&cancel);
            std::thread::spawn(move || {
                let b = manager.client();
                let status = b.hold_cancellable(&name, S, LockDuration::Middle, Timeout::Unlimited, &cancel);
                (status, b.held_mode(&name), b.is_waiting())
            })
        };
        while manager.stats().waiting_clients == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        // The request stays queued across wake-ups
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(manager.stats().waiting_clients, 1);

        cancel.store(true, Ordering::Release);
        let (status, mode, waiting) = handle.join().unwrap();
        assert_eq!(status, LockStatus::Cancelled);
        assert_eq!(mode, N);
        assert!(!waiting);
        assert_eq!(manager.stats().waiting_clients, 0);
        assert_eq!(a.held_mode(&name), X);
    }

    #[test]
    fn test_cancellable_hold_granted_on_release() {
        let manager = manager();
        let a = manager.client();
        let name = LockName::table(DB, 1);
        a.hold(&name, X, LockDuration::Middle, SHORT);

        let handle = {
            let manager = Arc::clone(&manager);
            let name = name.clone();
            std::thread::spawn(move || {
                let b = manager.client();
                let cancel = AtomicBool::new(false);
                b.hold_cancellable(&name, S, LockDuration::Middle, Timeout::Unlimited, &cancel)
            })
        };
        while manager.stats().waiting_clients == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        a.release(&name, X, LockDuration::Middle);
        assert_eq!(handle.join().unwrap(), LockStatus::Succeeded);
    }

    #[test]
    fn test_preset_cancel_only_matters_when_blocking() {
        let manager = manager();
        let a = manager.client();
        let b = manager.client();
        let name = LockName::table(DB, 1);
        let cancel = AtomicBool::new(true);

        // Compatible: granted without waiting
        assert!(a
            .hold_cancellable(&name, S, LockDuration::Middle, Timeout::Unlimited, &cancel)
            .is_succeeded());
        assert_eq!(
            b.hold_cancellable(&name, X, LockDuration::Middle, Timeout::Unlimited, &cancel),
            LockStatus::Cancelled
        );
        assert_eq!(b.held_mode(&name), N);
        assert_eq!(manager.stats().waiting_clients, 0);
    }
}
