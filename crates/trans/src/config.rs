//! Transaction layer configuration.
//!
//! Loaded as the `[trans]` table of `warden.toml`.

use crate::types::{Category, IsolationLevel};
use serde::{Deserialize, Serialize};

/// Transaction layer configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransConfig {
    /// Initial capacity of the per-session descriptor table (default: 256).
    pub trans_table_size: usize,

    /// Initial capacity of the XA branch table (default: 64).
    pub branch_table_size: usize,

    /// Category used when a transaction does not name one
    /// (default: read-write).
    pub category: Category,

    /// Isolation level used when a transaction does not name one
    /// (default: serializable).
    pub isolation_level: IsolationLevel,

    /// Start every transaction without locking (default: false).
    pub no_lock: bool,

    /// Start every transaction without logging (default: false).
    pub no_log: bool,

    /// Never read snapshots, even when a read-only transaction asks for
    /// one (default: false).
    pub no_version: bool,
}

impl Default for TransConfig {
    fn default() -> Self {
        TransConfig {
            trans_table_size: 256,
            branch_table_size: 64,
            category: Category::ReadWrite,
            isolation_level: IsolationLevel::Serializable,
            no_lock: false,
            no_log: false,
            no_version: false,
        }
    }
}

impl TransConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set default category (builder pattern).
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Set default isolation level (builder pattern).
    pub fn with_isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    /// Disable locking for all transactions (builder pattern).
    pub fn with_no_lock(mut self, no_lock: bool) -> Self {
        self.no_lock = no_lock;
        self
    }

    /// Disable logging for all transactions (builder pattern).
    pub fn with_no_log(mut self, no_log: bool) -> Self {
        self.no_log = no_log;
        self
    }

    /// Disable snapshot reads (builder pattern).
    pub fn with_no_version(mut self, no_version: bool) -> Self {
        self.no_version = no_version;
        self
    }

    /// Set table capacities (builder pattern).
    pub fn with_table_sizes(mut self, trans_table_size: usize, branch_table_size: usize) -> Self {
        self.trans_table_size = trans_table_size;
        self.branch_table_size = branch_table_size;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), TransConfigError> {
        if self.trans_table_size == 0 || self.branch_table_size == 0 {
            return Err(TransConfigError::ZeroTableSize);
        }
        Ok(())
    }

    /// Create a configuration suited to tests (small tables).
    pub fn for_testing() -> Self {
        TransConfig {
            trans_table_size: 16,
            branch_table_size: 16,
            ..Self::default()
        }
    }
}

/// Transaction configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransConfigError {
    /// Descriptor and branch tables need room for at least one entry.
    #[error("trans_table_size and branch_table_size must be greater than zero")]
    ZeroTableSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransConfig::default();
        assert_eq!(config.category, Category::ReadWrite);
        assert_eq!(config.isolation_level, IsolationLevel::Serializable);
        assert!(!config.no_lock);
        assert!(!config.no_log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_table_rejected() {
        let config = TransConfig::new().with_table_sizes(0, 16);
        assert_eq!(config.validate(), Err(TransConfigError::ZeroTableSize));
        assert!(TransConfig::new().with_table_sizes(4, 4).validate().is_ok());
    }
}
