//! Error types for storage backends

/// Errors raised by a storage backend
///
/// These mirror the failure modes of an embedded key-value database: version
/// conflicts, blocked deletes, missing stores and failed or aborted
/// transactions. Higher layers convert them into their own error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Requested version is older than the stored database
    #[error("requested version {requested} is lower than the stored version {current}")]
    VersionError {
        /// Version passed to `open`
        requested: u32,
        /// Version currently stored
        current: u32,
    },

    /// Version zero is never valid
    #[error("invalid database version: {0}")]
    InvalidVersion(u32),

    /// Other handles are still open
    #[error("database `{name}` is blocked by {open_handles} open connection(s)")]
    Blocked {
        /// Database name
        name: String,
        /// Number of handles that did not close
        open_handles: usize,
    },

    /// Object store does not exist
    #[error("object store not found: {0}")]
    StoreNotFound(String),

    /// Object store already exists
    #[error("object store already exists: {0}")]
    StoreExists(String),

    /// Handle or transaction is no longer usable
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Write attempted inside a read-only transaction
    #[error("read-only transaction cannot write to `{0}`")]
    ReadOnly(String),

    /// Record could not be stored
    #[error("data error: {0}")]
    DataError(String),

    /// Transaction was aborted before it committed
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// A single request failed
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Response shape did not match the request
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl EngineError {
    /// Check if the error is caused by other open handles
    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Check if the error is an abort
    #[inline]
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::TransactionAborted(_))
    }
}
