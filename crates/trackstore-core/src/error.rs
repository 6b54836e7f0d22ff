//! Error types for the storage layer
//!
//! Every failure surfaced to callers is a [`StorageError`]. Backend errors
//! ([`EngineError`]) are converted at the connection manager and transaction
//! executor boundaries so callers never branch on where a failure came from.

use std::fmt;
use trackstore_engine::EngineError;

/// Result alias used across the storage layer
pub type Result<T> = std::result::Result<T, StorageError>;

/// Main storage error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Backend refused to open the database
    #[error("failed to open database `{name}`: {source}")]
    Open {
        /// Database name
        name: String,
        /// Backend error
        #[source]
        source: EngineError,
    },

    /// Backend refused to delete the database
    #[error("failed to delete database `{name}`: {source}")]
    Delete {
        /// Database name
        name: String,
        /// Backend error
        #[source]
        source: EngineError,
    },

    /// Another connection kept the database open
    #[error("database `{name}` is blocked by another connection after {attempts} attempt(s)")]
    Blocked {
        /// Database name
        name: String,
        /// Attempts made
        attempts: u32,
    },

    /// Initialization gave up
    #[error("database initialization failed after {attempts} attempt(s): {message}")]
    InitializationFailed {
        /// Attempts made
        attempts: u32,
        /// Last failure
        message: String,
    },

    /// Operation needs an initialized database
    #[error("database is not initialized")]
    NotInitialized,

    /// Schema upgrade rejected
    #[error("schema upgrade failed: {0}")]
    Upgrade(String),

    /// Transaction, abort or request failure
    #[error("transaction on `{store}` failed ({origin}): {message}")]
    Transaction {
        /// Store name
        store: String,
        /// Which failure channel reported the error
        origin: FailureOrigin,
        /// Backend message
        message: String,
    },

    /// Transaction exceeded its wall-clock budget
    #[error("transaction on `{store}` timed out after {timeout_ms} ms")]
    Timeout {
        /// Store name
        store: String,
        /// Budget in milliseconds
        timeout_ms: u64,
    },

    /// Connection pool is full of live connections
    #[error("connection pool exhausted (max: {max})")]
    CapacityExceeded {
        /// Configured maximum
        max: usize,
    },

    /// Record does not exist
    #[error("record `{id}` not found in `{store}`")]
    NotFound {
        /// Store name
        store: String,
        /// Record id
        id: String,
    },

    /// Input rejected before touching storage
    #[error("{0}")]
    Validation(String),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Queued transaction failed every attempt
    #[error("transaction dropped after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: Box<StorageError>,
    },

    /// Queue was cleared before the transaction ran
    #[error("transaction queue was cleared")]
    QueueCleared,
}

/// Failure channel of a transaction error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureOrigin {
    /// Transaction could not be created or committed
    Transaction,
    /// Transaction was aborted
    Abort,
    /// The request itself failed
    Request,
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction => f.write_str("transaction error"),
            Self::Abort => f.write_str("transaction aborted"),
            Self::Request => f.write_str("request error"),
        }
    }
}

/// Error classification used for notices and retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Open, blocked, version change, initialization
    Connection,
    /// Per-operation failure, abort or timeout
    Transaction,
    /// Pool exhausted
    Capacity,
    /// Bad input, missing record, bad configuration
    Validation,
    /// Dropped or cleared queued work
    Queue,
}

impl StorageError {
    /// Human-readable message
    #[inline]
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Classify the error
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Open { .. }
            | Self::Delete { .. }
            | Self::Blocked { .. }
            | Self::InitializationFailed { .. }
            | Self::NotInitialized
            | Self::Upgrade(_) => ErrorCategory::Connection,
            Self::Transaction { .. } | Self::Timeout { .. } => ErrorCategory::Transaction,
            Self::CapacityExceeded { .. } => ErrorCategory::Capacity,
            Self::NotFound { .. }
            | Self::Validation(_)
            | Self::Serialization(_)
            | Self::Config(_) => ErrorCategory::Validation,
            Self::RetriesExhausted { .. } | Self::QueueCleared => ErrorCategory::Queue,
        }
    }

    /// Check if retrying the same operation may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transaction { .. }
                | Self::Timeout { .. }
                | Self::CapacityExceeded { .. }
                | Self::NotInitialized
                | Self::Blocked { .. }
        )
    }

    /// Check if the storage state is unknown and the user should reload
    #[inline]
    #[must_use]
    pub fn requires_reload(&self) -> bool {
        matches!(
            self,
            Self::Open { .. }
                | Self::Delete { .. }
                | Self::Blocked { .. }
                | Self::InitializationFailed { .. }
                | Self::Upgrade(_)
        )
    }

    /// Short title for a user-facing notice
    #[must_use]
    pub fn notice_title(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Connection => "Database Connection Error",
            ErrorCategory::Transaction => "Database Operation Failed",
            ErrorCategory::Capacity => "Database Busy",
            ErrorCategory::Validation => "Invalid Data",
            ErrorCategory::Queue => "Pending Operation Failed",
        }
    }

    /// Build a not-found error
    #[inline]
    pub fn not_found(store: impl fmt::Display, id: impl Into<String>) -> Self {
        Self::NotFound {
            store: store.to_string(),
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
