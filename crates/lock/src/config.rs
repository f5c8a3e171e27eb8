//! Lock manager configuration.
//!
//! Loaded as the `[lock]` table of `warden.toml` and reloadable at runtime
//! through [`LockManager::reload_config`](crate::LockManager::reload_config).

use crate::duration::Timeout;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lock manager configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Initial capacity of the client registry (default: 1024).
    ///
    /// Lock counts are stored inline in items and requests, so this only
    /// sizes the table of per-client state.
    pub count_table_size: usize,

    /// Initial capacity of the lock item table (default: 4096).
    pub hash_size: usize,

    /// Maximum number of released item descriptors kept for reuse
    /// (default: 1000).
    pub item_instance_cache_size: usize,

    /// Maximum number of released request descriptors kept for reuse
    /// (default: 1000).
    pub request_instance_cache_size: usize,

    /// Require a sufficient ancestor lock before granting a lock
    /// (default: false).
    pub lack_of_parent_detection: bool,

    /// Let an item's effective mode weaken as holders release
    /// (default: true).
    ///
    /// When false the effective mode only grows until every holder has
    /// released.
    pub enable_downgrade: bool,

    /// Refuse to weaken an ancestor lock below what locked descendants
    /// need (default: false).
    pub lack_for_child_detection: bool,

    /// Default lock wait bound in milliseconds, `None` for unlimited
    /// (default: unlimited).
    pub timeout_ms: Option<u64>,

    /// Length of one wait slice in milliseconds (default: 1000).
    ///
    /// Waiters wake up at least this often to re-check their request and
    /// their cancel flag.
    pub wait_slice_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            count_table_size: 1024,
            hash_size: 4096,
            item_instance_cache_size: 1000,
            request_instance_cache_size: 1000,
            lack_of_parent_detection: false,
            enable_downgrade: true,
            lack_for_child_detection: false,
            timeout_ms: None,
            wait_slice_ms: 1000,
        }
    }
}

impl LockConfig {
    /// Create a new lock configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set item table capacity (builder pattern).
    pub fn with_hash_size(mut self, size: usize) -> Self {
        self.hash_size = size;
        self
    }

    /// Set the item descriptor cache size (builder pattern).
    pub fn with_item_instance_cache_size(mut self, size: usize) -> Self {
        self.item_instance_cache_size = size;
        self
    }

    /// Set the request descriptor cache size (builder pattern).
    pub fn with_request_instance_cache_size(mut self, size: usize) -> Self {
        self.request_instance_cache_size = size;
        self
    }

    /// Enable or disable the ancestor check on hold (builder pattern).
    pub fn with_lack_of_parent_detection(mut self, enabled: bool) -> Self {
        self.lack_of_parent_detection = enabled;
        self
    }

    /// Enable or disable the descendant check on release (builder pattern).
    pub fn with_lack_for_child_detection(mut self, enabled: bool) -> Self {
        self.lack_for_child_detection = enabled;
        self
    }

    /// Enable or disable downgrade of the effective mode (builder pattern).
    pub fn with_enable_downgrade(mut self, enabled: bool) -> Self {
        self.enable_downgrade = enabled;
        self
    }

    /// Set the default wait bound (builder pattern).
    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the unlimited-wait slice (builder pattern).
    pub fn with_wait_slice_ms(mut self, ms: u64) -> Self {
        self.wait_slice_ms = ms;
        self
    }

    /// Default wait bound for callers that do not pass one.
    pub fn default_timeout(&self) -> Timeout {
        Timeout::from_millis(self.timeout_ms)
    }

    /// Length of one wait slice.
    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), LockConfigError> {
        if self.hash_size == 0 {
            return Err(LockConfigError::ZeroHashSize);
        }
        if self.wait_slice_ms == 0 {
            return Err(LockConfigError::ZeroWaitSlice);
        }
        Ok(())
    }

    /// Create a configuration suited to tests (short wait slices, small caches).
    pub fn for_testing() -> Self {
        LockConfig {
            count_table_size: 16,
            hash_size: 64,
            item_instance_cache_size: 4,
            request_instance_cache_size: 4,
            wait_slice_ms: 50,
            ..Self::default()
        }
    }
}

/// Lock configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockConfigError {
    /// The item table must have a non-zero capacity.
    #[error("hash_size must be greater than zero")]
    ZeroHashSize,

    /// Unlimited waits need a non-zero slice.
    #[error("wait_slice_ms must be greater than zero")]
    ZeroWaitSlice,
}
