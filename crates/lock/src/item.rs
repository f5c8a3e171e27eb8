//! Lock items: one lockable resource
//!
//! An item keeps the aggregate [`LockCount`] of every holder, the queue of
//! clients with a request on it, and a cached effective mode. Items whose
//! name is latchable (files) also carry a [`Latch`].
//!
//! [`LockItem`] is the caller-facing handle; it pins the item while alive.

use crate::client::LockClient;
use crate::count::LockCount;
use crate::duration::{LockDuration, Timeout};
use crate::latch::Latch;
use crate::manager::{LockManager, LockTable};
use crate::mode::LockMode;
use crate::pool::Recycle;
use crate::request::RequestCondition;
use crate::status::LockStatus;
use crate::ClientId;
use smallvec::SmallVec;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::trace;
use warden_core::{Error, LockName, Result};

/// Shared state of one item
#[derive(Debug, Default)]
pub(crate) struct ItemEntry {
    pub(crate) count: LockCount,
    pub(crate) granted: LockMode,
    pub(crate) queue: Vec<ClientId>,
    pub(crate) ref_count: usize,
    pub(crate) latch: Option<Arc<Latch>>,
}

impl Recycle for ItemEntry {
    fn recycle(&mut self) {
        self.count.clear();
        self.granted = LockMode::N;
        self.queue.clear();
        self.ref_count = 0;
        self.latch = None;
    }
}

impl ItemEntry {
    /// Set up a fresh or recycled entry for `name`
    pub(crate) fn prepare(&mut self, name: &LockName) {
        if name.is_latchable() && self.latch.is_none() {
            self.latch = Some(Arc::new(Latch::new()));
        }
    }

    fn refresh_granted(&mut self, downgrade: bool, added: LockMode) {
        self.granted = if self.count.is_empty() {
            LockMode::N
        } else if downgrade {
            self.count.lub()
        } else {
            self.granted.lub(added)
        };
    }
}

// =============================================================================
// Count bookkeeping
// =============================================================================

impl LockTable {
    /// Record one hold of `mode` by `client` on `name`
    pub(crate) fn record(&mut self, client: ClientId, name: &LockName, mode: LockMode, duration: LockDuration) {
        if !duration.is_recorded() || mode == LockMode::N {
            return;
        }
        let downgrade = self.config.enable_downgrade;
        if let Some(request) = self
            .clients
            .get_mut(&client)
            .and_then(|c| c.requests.get_mut(name))
        {
            request.record(mode, duration);
        }
        if let Some(item) = self.items.get_mut(name) {
            item.count.up(mode, 1);
            item.refresh_granted(downgrade, mode);
        }
    }

    /// Remove up to `n` holds of `mode` recorded by `client` on `name`
    pub(crate) fn unrecord(
        &mut self,
        client: ClientId,
        name: &LockName,
        mode: LockMode,
        duration: LockDuration,
        n: u32,
    ) -> u32 {
        let downgrade = self.config.enable_downgrade;
        let removed = match self
            .clients
            .get_mut(&client)
            .and_then(|c| c.requests.get_mut(name))
        {
            Some(request) => request.unrecord(mode, duration, n),
            None => 0,
        };
        if removed > 0 {
            if let Some(item) = self.items.get_mut(name) {
                let mut m = removed;
                item.count.down(mode, &mut m);
                item.refresh_granted(downgrade, LockMode::N);
            }
        }
        removed
    }

    /// `client`'s current grant on `name` and the counts of every other
    /// holder
    pub(crate) fn split_counts(&self, client: ClientId, name: &LockName) -> (LockMode, LockCount) {
        let own = self
            .clients
            .get(&client)
            .and_then(|c| c.requests.get(name))
            .map(|r| r.total)
            .unwrap_or_default();
        let others = self
            .items
            .get(name)
            .map(|i| i.count.without(&own))
            .unwrap_or_default();
        (own.lub(), others)
    }

    /// Grant `client`'s pending wait on `name` if it is now compatible
    ///
    /// On success the pending hold is recorded, the wait state is cleared
    /// and the request returns to `Granted`. The caller signals the client.
    pub(crate) fn try_grant(&mut self, client: ClientId, name: &LockName) -> bool {
        let Some(target) = self
            .clients
            .get(&client)
            .and_then(|c| c.waiting.clone())
            .filter(|w| &w.name == name)
        else {
            return false;
        };
        let (own, others) = self.split_counts(client, name);
        if !others.bitmap().is_compatible(own.lub(target.mode)) {
            return false;
        }
        if let Some(entry) = self.clients.get_mut(&client) {
            entry.waiting = None;
            if let Some(request) = entry.requests.get_mut(name) {
                request.condition = RequestCondition::Granted;
            }
        }
        self.record(client, name, target.mode, target.duration);
        true
    }

    /// Wake every waiter on `name` that is now compatible
    ///
    /// No ordering among waiters is guaranteed.
    pub(crate) fn check_compatible(&mut self, name: &LockName) {
        let waiters: SmallVec<[ClientId; 8]> = match self.items.get(name) {
            Some(item) => item
                .queue
                .iter()
                .copied()
                .filter(|c| {
                    self.clients
                        .get(c)
                        .and_then(|e| e.waiting.as_ref())
                        .map_or(false, |w| &w.name == name)
                })
                .collect(),
            None => return,
        };
        for waiter in waiters {
            if self.try_grant(waiter, name) {
                trace!(client = %waiter, item = %name, "lock granted to waiter");
                if let Some(entry) = self.clients.get(&waiter) {
                    entry.signal.notify_one();
                }
            }
        }
    }
}

// =============================================================================
// Hold / release
// =============================================================================

impl LockManager {
    pub(crate) fn hold(
        &self,
        client: ClientId,
        name: &LockName,
        mode: LockMode,
        duration: LockDuration,
        timeout: Timeout,
        cancel: Option<&AtomicBool>,
    ) -> LockStatus {
        if mode == LockMode::N {
            return LockStatus::Succeeded;
        }
        let mut table = self.lock_table();
        table.ensure_request(client, name);

        let (own, others) = table.split_counts(client, name);
        let wanted = own.lub(mode);
        if wanted != own {
            if table.config.lack_of_parent_detection && !table.is_allowable_child(client, name, mode) {
                table.settle_request(client, name);
                return LockStatus::LackOfParent;
            }
            if !others.bitmap().is_compatible(wanted) {
                let status = self.proceed_to_wait(&mut table, client, name, mode, duration, timeout, cancel);
                table.settle_request(client, name);
                return status;
            }
        }

        table.record(client, name, mode, duration);
        table.settle_request(client, name);
        LockStatus::Succeeded
    }

    pub(crate) fn release(
        &self,
        client: ClientId,
        name: &LockName,
        mode: LockMode,
        duration: LockDuration,
    ) -> LockStatus {
        let Some(slot) = duration.slot() else {
            return LockStatus::Succeeded;
        };
        let mut table = self.lock_table();
        let Some(request) = table.clients.get(&client).and_then(|c| c.requests.get(name)) else {
            return LockStatus::Succeeded;
        };
        if request.durations[slot].get(mode) == 0 {
            return LockStatus::Succeeded;
        }

        if table.config.lack_for_child_detection {
            let before = request.granted();
            let mut after = request.total;
            let mut n = 1;
            after.down(mode, &mut n);
            if after.lub() != before && !table.is_allowable_parent(client, name, after.lub()) {
                return LockStatus::LackForChild;
            }
        }

        table.unrecord(client, name, mode, duration, 1);
        table.check_compatible(name);
        table.settle_request(client, name);
        LockStatus::Succeeded
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a lockable resource
///
/// Holding a handle keeps the item in the manager's table. Holds granted
/// through it outlive the handle; they belong to the client.
pub struct LockItem {
    manager: Arc<LockManager>,
    name: LockName,
}

impl LockItem {
    pub(crate) fn new(manager: Arc<LockManager>, name: LockName) -> Self {
        LockItem { manager, name }
    }

    /// Resource name
    pub fn name(&self) -> &LockName {
        &self.name
    }

    /// True if the item supports [`latch`](Self::latch)
    pub fn is_latchable(&self) -> bool {
        self.name.is_latchable()
    }

    /// Effective mode over every holder
    pub fn granted_mode(&self) -> LockMode {
        self.manager
            .lock_table()
            .items
            .get(&self.name)
            .map(|i| i.granted)
            .unwrap_or_default()
    }

    /// Acquire `mode` on behalf of `client`
    ///
    /// Waits while another client holds an incompatible mode. An `Instant`
    /// hold only checks that the mode could be granted.
    ///
    /// # Returns
    /// `Succeeded`, `Timeout`, `Deadlock` or `LackOfParent`.
    pub fn hold(&self, client: &LockClient, mode: LockMode, duration: LockDuration, timeout: Timeout) -> LockStatus {
        self.manager.hold(client.id(), &self.name, mode, duration, timeout, None)
    }

    /// [`hold`](Self::hold) that also returns `Cancelled` once `cancel` is
    /// set while waiting
    pub fn hold_cancellable(
        &self,
        client: &LockClient,
        mode: LockMode,
        duration: LockDuration,
        timeout: Timeout,
        cancel: &AtomicBool,
    ) -> LockStatus {
        self.manager
            .hold(client.id(), &self.name, mode, duration, timeout, Some(cancel))
    }

    /// Give back one hold of `mode` acquired for `duration`
    ///
    /// Releasing something not held is a no-op.
    ///
    /// # Returns
    /// `Succeeded` or `LackForChild`.
    pub fn release(&self, client: &LockClient, mode: LockMode, duration: LockDuration) -> LockStatus {
        self.manager.release(client.id(), &self.name, mode, duration)
    }

    /// Hold `to`, then release `from`
    ///
    /// Not atomic: if holding `to` fails, `from` is still held.
    pub fn convert(
        &self,
        client: &LockClient,
        from: LockMode,
        to: LockMode,
        duration: LockDuration,
        timeout: Timeout,
    ) -> LockStatus {
        let status = self.hold(client, to, duration, timeout);
        if !status.is_succeeded() {
            return status;
        }
        self.release(client, from, duration)
    }

    /// Enter the item's latch on behalf of `client`
    ///
    /// Blocks while another client holds the latch. The latch is
    /// re-entrant for the same client.
    ///
    /// # Errors
    /// `Error::InvalidOperation` if the item is not latchable.
    pub fn latch(&self, client: &LockClient) -> Result<()> {
        let latch = {
            let mut table = self.manager.lock_table();
            let item = table
                .items
                .get_mut(&self.name)
                .ok_or_else(|| Error::InvalidOperation(format!("{} is not attached", self.name)))?;
            let latch = item
                .latch
                .clone()
                .ok_or_else(|| Error::InvalidOperation(format!("{} is not latchable", self.name)))?;
            item.ref_count += 1;
            latch
        };
        latch.acquire(client.id());
        let mut table = self.manager.lock_table();
        if let Some(entry) = table.clients.get_mut(&client.id()) {
            entry.latched.push(self.name.clone());
        }
        Ok(())
    }

    /// Leave the item's latch
    ///
    /// # Errors
    /// `Error::InvalidOperation` if `client` has not latched the item.
    pub fn unlatch(&self, client: &LockClient) -> Result<()> {
        let mut table = self.manager.lock_table();
        if table.unlatch(client.id(), &self.name) {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "{} is not latched by {}",
                self.name,
                client.id()
            )))
        }
    }
}

impl Drop for LockItem {
    fn drop(&mut self) {
        self.manager.lock_table().detach_item(&self.name);
    }
}

impl std::fmt::Debug for LockItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockItem").field("name", &self.name).finish()
    }
}

impl LockTable {
    /// Release one latch level `client` holds on `name`
    pub(crate) fn unlatch(&mut self, client: ClientId, name: &LockName) -> bool {
        let Some(entry) = self.clients.get_mut(&client) else {
            return false;
        };
        let Some(pos) = entry.latched.iter().rposition(|n| n == name) else {
            return false;
        };
        entry.latched.remove(pos);
        if let Some(latch) = self.items.get(name).and_then(|i| i.latch.clone()) {
            latch.release(client);
        }
        self.detach_item(name);
        true
    }
}
