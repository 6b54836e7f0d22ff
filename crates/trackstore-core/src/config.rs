//! Storage layer configuration

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Storage layer configuration
///
/// Durations are stored in milliseconds so the structure round-trips through
/// JSON unchanged. Missing keys fall back to [`StoreConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database name
    pub database_name: String,
    /// Schema version requested on first open
    pub version: u32,
    /// Maximum pooled connections
    pub max_connections: usize,
    /// Fixed lifetime of a pooled connection
    pub connection_timeout_ms: u64,
    /// Interval of the stale-connection janitor
    pub stale_check_interval_ms: u64,
    /// Default transaction budget
    pub transaction_timeout_ms: u64,
    /// Budget for bulk call sites (restore, sample data)
    pub long_transaction_timeout_ms: u64,
    /// Attempts per queued transaction
    pub max_retries: u32,
    /// Base delay of the queue's linear backoff
    pub retry_delay_ms: u64,
    /// Attempts to initialize the database
    pub init_attempts: u32,
    /// Base delay between initialization attempts
    pub init_retry_delay_ms: u64,
    /// Attempts to delete a blocked database
    pub delete_attempts: u32,
    /// Delay between delete attempts
    pub delete_retry_delay_ms: u64,
}

impl StoreConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With database name
    #[inline]
    #[must_use]
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// With schema version
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// With max pooled connections
    #[inline]
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// With pooled connection lifetime
    #[inline]
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = duration_ms(timeout);
        self
    }

    /// With default transaction budget
    #[inline]
    #[must_use]
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout_ms = duration_ms(timeout);
        self
    }

    /// With queue retry policy
    #[inline]
    #[must_use]
    pub fn with_retry_policy(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    /// With initialization retry policy
    #[inline]
    #[must_use]
    pub fn with_init_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.init_attempts = attempts;
        self.init_retry_delay_ms = duration_ms(delay);
        self
    }

    /// With blocked-delete retry policy
    #[inline]
    #[must_use]
    pub fn with_delete_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.delete_attempts = attempts;
        self.delete_retry_delay_ms = duration_ms(delay);
        self
    }

    /// Pooled connection lifetime
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Janitor interval
    #[must_use]
    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_millis(self.stale_check_interval_ms)
    }

    /// Default transaction budget
    #[must_use]
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    /// Bulk transaction budget
    #[must_use]
    pub fn long_transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.long_transaction_timeout_ms)
    }

    /// Queue backoff base delay
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Initialization backoff base delay
    #[must_use]
    pub fn init_retry_delay(&self) -> Duration {
        Duration::from_millis(self.init_retry_delay_ms)
    }

    /// Delay between delete attempts
    #[must_use]
    pub fn delete_retry_delay(&self) -> Duration {
        Duration::from_millis(self.delete_retry_delay_ms)
    }

    /// Check invariants
    ///
    /// # Errors
    /// [`StorageError::Config`] naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(StorageError::Config("database_name must not be empty".into()));
        }
        if self.version == 0 {
            return Err(StorageError::Config("version must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(StorageError::Config("max_connections must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(StorageError::Config("max_retries must be at least 1".into()));
        }
        if self.init_attempts == 0 {
            return Err(StorageError::Config("init_attempts must be at least 1".into()));
        }
        if self.delete_attempts == 0 {
            return Err(StorageError::Config("delete_attempts must be at least 1".into()));
        }
        if self.transaction_timeout_ms == 0 || self.long_transaction_timeout_ms == 0 {
            return Err(StorageError::Config("transaction timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    ///
    /// # Errors
    /// [`StorageError::Config`] on malformed JSON or invalid values
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StorageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    ///
    /// # Errors
    /// [`StorageError::Config`] if the file cannot be read or is invalid
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_name: "ProjectTrackerDB".to_string(),
            version: 1,
            max_connections: 5,
            connection_timeout_ms: 30_000,
            stale_check_interval_ms: 60_000,
            transaction_timeout_ms: 10_000,
            long_transaction_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            init_attempts: 3,
            init_retry_delay_ms: 1_000,
            delete_attempts: 3,
            delete_retry_delay_ms: 500,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
