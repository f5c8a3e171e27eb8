//! Lock manager: the shared lock table and its latch
//!
//! All lock state (items, requests, per-client wait state, descriptor
//! pools) lives in one [`LockTable`] behind a single mutex. Compatibility
//! checks, count updates and deadlock detection all run while holding it,
//! so the wait-for graph is always observed as a consistent snapshot.
//!
//! A process may run any number of independent managers; nothing here is
//! global.

use crate::client::{ClientEntry, LockClient};
use crate::config::{LockConfig, LockConfigError};
use crate::deadlock::{DetectorIsVictim, VictimPolicy};
use crate::item::{ItemEntry, LockItem};
use crate::pool::DescriptorPool;
use crate::request::RequestEntry;
use crate::ClientId;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use warden_core::LockName;

/// Snapshot of lock manager occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Items currently in the table
    pub items: usize,
    /// Requests across all clients
    pub requests: usize,
    /// Registered clients
    pub clients: usize,
    /// Clients blocked in a lock wait
    pub waiting_clients: usize,
    /// Item descriptors kept for reuse
    pub pooled_items: usize,
    /// Request descriptors kept for reuse
    pub pooled_requests: usize,
    /// Deadlocks detected since creation
    pub deadlocks: u64,
}

/// Shared lock state, guarded by the manager latch
pub(crate) struct LockTable {
    pub(crate) config: LockConfig,
    pub(crate) items: FxHashMap<LockName, ItemEntry>,
    pub(crate) clients: FxHashMap<ClientId, ClientEntry>,
    pub(crate) item_pool: DescriptorPool<ItemEntry>,
    pub(crate) request_pool: DescriptorPool<Box<RequestEntry>>,
    pub(crate) generation: u64,
    pub(crate) deadlocks: u64,
}

impl LockTable {
    fn new(config: LockConfig) -> Self {
        let mut items = FxHashMap::default();
        items.reserve(config.hash_size);
        let mut clients = FxHashMap::default();
        clients.reserve(config.count_table_size);
        LockTable {
            item_pool: DescriptorPool::new(config.item_instance_cache_size),
            request_pool: DescriptorPool::new(config.request_instance_cache_size),
            items,
            clients,
            config,
            generation: 0,
            deadlocks: 0,
        }
    }

    /// Find or create the item for `name` and pin it
    pub(crate) fn attach_item(&mut self, name: &LockName) {
        if !self.items.contains_key(name) {
            let mut entry = self.item_pool.take().unwrap_or_default();
            entry.prepare(name);
            self.items.insert(name.clone(), entry);
        }
        if let Some(entry) = self.items.get_mut(name) {
            entry.ref_count += 1;
        }
    }

    /// Unpin the item for `name`, freeing it once nothing references it
    pub(crate) fn detach_item(&mut self, name: &LockName) {
        let free = match self.items.get_mut(name) {
            Some(entry) => {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                entry.ref_count == 0
            }
            None => false,
        };
        if free {
            if let Some(entry) = self.items.remove(name) {
                self.item_pool.put(entry);
            }
        }
    }

    /// Find or create `client`'s request on `name`
    ///
    /// The item must already be attached.
    pub(crate) fn ensure_request(&mut self, client: ClientId, name: &LockName) {
        let Some(entry) = self.clients.get_mut(&client) else {
            return;
        };
        if entry.requests.contains_key(name) {
            return;
        }
        let request = self.request_pool.take().unwrap_or_default();
        entry.requests.insert(name.clone(), request);
        if let Some(item) = self.items.get_mut(name) {
            item.queue.push(client);
            item.ref_count += 1;
        }
    }

    /// Discard `client`'s request on `name` if it holds nothing and is not
    /// waiting
    pub(crate) fn settle_request(&mut self, client: ClientId, name: &LockName) {
        let Some(entry) = self.clients.get_mut(&client) else {
            return;
        };
        let idle = entry.requests.get(name).map_or(false, |r| r.is_idle());
        if !idle {
            return;
        }
        if let Some(request) = entry.requests.remove(name) {
            self.request_pool.put(request);
        }
        if let Some(item) = self.items.get_mut(name) {
            item.queue.retain(|c| *c != client);
        }
        self.detach_item(name);
    }

    /// Next deadlock-detection generation
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn stats(&self) -> LockStats {
        LockStats {
            items: self.items.len(),
            requests: self.clients.values().map(|c| c.requests.len()).sum(),
            clients: self.clients.len(),
            waiting_clients: self.clients.values().filter(|c| c.waiting.is_some()).count(),
            pooled_items: self.item_pool.len(),
            pooled_requests: self.request_pool.len(),
            deadlocks: self.deadlocks,
        }
    }
}

/// Hierarchical lock manager
///
/// Hand out [`LockClient`]s (one per transaction) and [`LockItem`]s (one
/// per resource being locked) from an `Arc<LockManager>`.
///
/// # Example
///
/// ```ignore
/// let manager = Arc::new(LockManager::new(LockConfig::default()));
/// let client = manager.client();
/// let item = manager.attach(LockName::table(db, 1));
/// item.hold(&client, LockMode::S, LockDuration::Middle, Timeout::Unlimited);
/// ```
pub struct LockManager {
    table: Mutex<LockTable>,
    victim_policy: Box<dyn VictimPolicy>,
    next_client: AtomicU64,
}

impl LockManager {
    /// Create a manager with the reference victim policy (the client that
    /// detects a deadlock is the victim)
    pub fn new(config: LockConfig) -> Self {
        Self::with_victim_policy(config, DetectorIsVictim)
    }

    /// Create a manager with a custom victim policy
    pub fn with_victim_policy(config: LockConfig, policy: impl VictimPolicy + 'static) -> Self {
        LockManager {
            table: Mutex::new(LockTable::new(config)),
            victim_policy: Box::new(policy),
            next_client: AtomicU64::new(1),
        }
    }

    /// Register a new client
    pub fn client(self: &Arc<Self>) -> LockClient {
        let id = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let mut table = self.table.lock();
        let mut entry = ClientEntry::default();
        entry.requests.reserve(8);
        table.clients.insert(id, entry);
        LockClient::new(Arc::clone(self), id)
    }

    /// Attach to the item named `name`, creating it if needed
    ///
    /// The item stays in the table while any handle, request or latch
    /// references it.
    pub fn attach(self: &Arc<Self>, name: LockName) -> LockItem {
        self.table.lock().attach_item(&name);
        LockItem::new(Arc::clone(self), name)
    }

    /// Current configuration
    pub fn config(&self) -> LockConfig {
        self.table.lock().config.clone()
    }

    /// Replace the configuration
    ///
    /// Later operations observe the new values; holds already granted are
    /// not re-checked.
    pub fn reload_config(&self, config: LockConfig) -> Result<(), LockConfigError> {
        config.validate()?;
        let mut table = self.table.lock();
        table.item_pool.set_limit(config.item_instance_cache_size);
        table.request_pool.set_limit(config.request_instance_cache_size);
        debug!(
            lack_of_parent = config.lack_of_parent_detection,
            lack_for_child = config.lack_for_child_detection,
            downgrade = config.enable_downgrade,
            "lock configuration reloaded"
        );
        table.config = config;
        Ok(())
    }

    /// Restore the default configuration
    pub fn reset_config(&self) {
        let config = LockConfig::default();
        debug_assert!(config.validate().is_ok());
        self.table.lock().config = config;
        debug!("lock configuration reset");
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> LockStats {
        self.table.lock().stats()
    }

    pub(crate) fn lock_table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock()
    }

    pub(crate) fn victim_policy(&self) -> &dyn VictimPolicy {
        self.victim_policy.as_ref()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("stats", &self.stats())
            .finish()
    }
}
