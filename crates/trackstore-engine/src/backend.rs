//! Backend traits
//!
//! Implement [`StorageBackend`] to plug a different embedded database under
//! the storage layer. The in-memory implementation lives in
//! [`crate::memory`].

use crate::error::EngineError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxMode {
    /// Reads only
    ReadOnly,
    /// Reads and writes
    ReadWrite,
}

impl TxMode {
    /// Check if writes are allowed
    #[inline]
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

impl fmt::Display for TxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("readonly"),
            Self::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// A single request against one object store
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Read one record by id
    Get(String),
    /// Read every record, ordered by id
    GetAll,
    /// Insert or replace a record keyed by its `id` field
    Put(Value),
    /// Remove a record; missing ids are not an error
    Delete(String),
    /// Remove every record
    Clear,
    /// Count records
    Count,
}

impl Request {
    /// Check if the request writes
    #[inline]
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Put(_) | Self::Delete(_) | Self::Clear)
    }
}

/// Result of a [`Request`]
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Result of `Get`
    Record(Option<Value>),
    /// Result of `GetAll`
    Records(Vec<Value>),
    /// Key written by `Put`
    Key(String),
    /// Result of `Count`
    Count(usize),
    /// `Delete` and `Clear` completed
    Done,
}

/// Notification sent to open handles when another party upgrades or deletes
/// the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    /// Version the handle was opened at
    pub old_version: u32,
    /// Target version, `None` when the database is being deleted
    pub new_version: Option<u32>,
}

/// Schema operations available inside an upgrade callback
pub trait SchemaUpgrade {
    /// Version before the upgrade (0 for a new database)
    fn old_version(&self) -> u32;

    /// Version being opened
    fn new_version(&self) -> u32;

    /// Names of existing stores
    fn store_names(&self) -> Vec<String>;

    /// Create an empty store
    ///
    /// # Errors
    /// [`EngineError::StoreExists`] if the store is already present
    fn create_store(&mut self, name: &str) -> Result<(), EngineError>;

    /// Delete a store and its records
    ///
    /// # Errors
    /// [`EngineError::StoreNotFound`] if the store does not exist
    fn delete_store(&mut self, name: &str) -> Result<(), EngineError>;
}

/// Upgrade callback passed to [`StorageBackend::open`]
pub type UpgradeFn<'a> = dyn FnMut(&mut dyn SchemaUpgrade) -> Result<(), EngineError> + Send + 'a;

/// An embedded database engine
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Open a database, running `upgrade` when `version` is newer than the
    /// stored one (or the database does not exist yet)
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> Result<Arc<dyn BackendConnection>, EngineError>;

    /// Delete a database; deleting a missing database succeeds
    async fn delete_database(&self, name: &str) -> Result<(), EngineError>;

    /// Stored version of a database, if it exists
    async fn database_version(&self, name: &str) -> Option<u32>;
}

/// An open handle to a database
pub trait BackendConnection: Send + Sync + fmt::Debug {
    /// Database name
    fn name(&self) -> &str;

    /// Version the handle was opened at
    fn version(&self) -> u32;

    /// Stores visible to this handle
    fn store_names(&self) -> Vec<String>;

    /// Start a transaction over one store
    ///
    /// # Errors
    /// - [`EngineError::InvalidState`] if the handle is closed or outdated
    /// - [`EngineError::StoreNotFound`] if the store does not exist
    fn transaction(
        &self,
        store: &str,
        mode: TxMode,
    ) -> Result<Arc<dyn BackendTransaction>, EngineError>;

    /// Close the handle; closing twice is a no-op
    fn close(&self);

    /// Check if the handle is closed
    fn is_closed(&self) -> bool;

    /// Take the receiver for version-change events
    ///
    /// Returns `None` after the first call.
    fn take_version_changes(&self) -> Option<mpsc::UnboundedReceiver<VersionChange>>;
}

/// A transaction over a single store
#[async_trait::async_trait]
pub trait BackendTransaction: Send + Sync {
    /// Store this transaction covers
    fn store(&self) -> &str;

    /// Transaction mode
    fn mode(&self) -> TxMode;

    /// Issue a request
    async fn request(&self, request: Request) -> Result<Response, EngineError>;

    /// Commit staged writes
    async fn commit(&self) -> Result<(), EngineError>;

    /// Discard staged writes; later requests fail
    fn abort(&self);
}
