//! Server configuration via `warden.toml`
//!
//! On first open of a data directory a commented default `warden.toml` is
//! written. The `[lock]` and `[trans]` tables can be reloaded at runtime
//! with [`Warden::reload_config`](crate::Warden::reload_config); the log
//! settings only take effect on the next open.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use warden_core::{Error, Result};
use warden_durability::SyncMode;
use warden_lock::LockConfig;
use warden_trans::TransConfig;

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "warden.toml";

/// Log file name used when a data directory is opened without `log_path`.
pub const LOG_FILE_NAME: &str = "warden.log";

/// Configuration loaded from `warden.toml`.
///
/// # Example
///
/// ```toml
/// sync_mode = "strict"
///
/// [lock]
/// timeout_ms = 5000
///
/// [trans]
/// isolation_level = "read_committed"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Log file; `None` keeps the log in memory.
    ///
    /// A relative path is resolved against the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// When the log file is forced to disk: `"buffered"` or `"strict"`.
    pub sync_mode: SyncMode,
    /// Lock manager settings.
    pub lock: LockConfig,
    /// Transaction layer settings.
    pub trans: TransConfig,
}

impl WardenConfig {
    /// Keep the log in `path`.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Force the log to disk on every store or only on flush.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Replace the lock manager settings.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Replace the transaction layer settings.
    pub fn with_trans(mut self, trans: TransConfig) -> Self {
        self.trans = trans;
        self
    }

    /// Check both tables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the table that failed.
    pub fn validate(&self) -> Result<()> {
        self.lock
            .validate()
            .map_err(|e| Error::Config(format!("[lock] {}", e)))?;
        self.trans
            .validate()
            .map_err(|e| Error::Config(format!("[trans] {}", e)))?;
        Ok(())
    }

    /// Small tables and short wait slices, in-memory log.
    pub fn for_testing() -> Self {
        WardenConfig {
            log_path: None,
            sync_mode: SyncMode::Buffered,
            lock: LockConfig::for_testing(),
            trans: TransConfig::for_testing(),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Warden configuration
#
# Log file, relative to the data directory (default: warden.log)
# log_path = "warden.log"

# When the log is forced to disk: "buffered" (default) or "strict"
#   "buffered" = on flush and checkpoint only
#   "strict"   = after every record
sync_mode = "buffered"

[lock]
# Initial table capacities
count_table_size = 1024
hash_size = 4096

# Released descriptors kept for reuse
item_instance_cache_size = 1000
request_instance_cache_size = 1000

# Hierarchy checks (off: callers lock top-down)
lack_of_parent_detection = false
lack_for_child_detection = false

# Let an item's mode weaken as holders release
enable_downgrade = true

# Default lock wait bound in milliseconds; omit for unlimited waits
# timeout_ms = 5000

# Lock waiters wake up this often to re-check their request and cancellation
wait_slice_ms = 1000

[trans]
trans_table_size = 256
branch_table_size = 64

# Defaults for transactions that do not say otherwise
# category: "read_write" or "read_only"
category = "read_write"
# isolation_level: "read_uncommitted", "read_committed",
#                  "repeatable_read" or "serializable"
isolation_level = "serializable"
no_lock = false
no_log = false

# Never read snapshots
no_version = false
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or parsed, or
    /// holds invalid settings.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: WardenConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
