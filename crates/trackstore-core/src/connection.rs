//! Connection manager
//!
//! Opens handles on the storage backend, keeps a registry of every live
//! handle for bulk close, and reacts to version-change events: the handle is
//! closed and the user is told to reload.

use crate::error::{Result, StorageError};
use crate::notify::{Notice, Notifier};
use crate::schema::StoreName;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use trackstore_engine::{
    BackendConnection, BackendTransaction, EngineError, StorageBackend, TxMode, UpgradeFn,
    VersionChange,
};
use ulid::Ulid;

/// Unique connection identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub Ulid);

impl ConnectionId {
    /// Generate new connection ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open/closed state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Usable
    Open,
    /// Closed locally or by a version change
    Closed,
}

/// An open handle to the database
pub struct Connection {
    id: ConnectionId,
    handle: Arc<dyn BackendConnection>,
    opened_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    fn new(handle: Arc<dyn BackendConnection>) -> Self {
        Self {
            id: ConnectionId::new(),
            handle,
            opened_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            watcher: Mutex::new(None),
        }
    }

    /// Connection ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Database name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Schema version the handle was opened at
    #[inline]
    #[must_use]
    pub fn version(&self) -> u32 {
        self.handle.version()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.handle.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    /// Check if closed
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// When the handle was opened
    #[inline]
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Time since the last transaction started
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Record activity
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Stores visible through this handle
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.handle.store_names()
    }

    /// Start a backend transaction over one store
    ///
    /// # Errors
    /// Backend error if the handle is closed or the store is missing
    pub fn transaction(
        &self,
        store: StoreName,
        mode: TxMode,
    ) -> std::result::Result<Arc<dyn BackendTransaction>, EngineError> {
        self.touch();
        self.handle.transaction(store.as_str(), mode)
    }

    /// Liveness probe: open and abort a read-only transaction
    #[must_use]
    pub fn probe(&self, store: StoreName) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.handle.transaction(store.as_str(), TxMode::ReadOnly) {
            Ok(tx) => {
                tx.abort();
                true
            }
            Err(_) => false,
        }
    }

    fn close(&self) {
        self.handle.close();
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("version", &self.version())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Opens and tracks backend handles
pub struct ConnectionManager {
    backend: Arc<dyn StorageBackend>,
    live: DashMap<ConnectionId, Arc<Connection>>,
    notifier: Arc<dyn Notifier>,
}

impl ConnectionManager {
    /// Create a manager over a backend
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            backend,
            live: DashMap::new(),
            notifier,
        }
    }

    /// Underlying backend
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Open a handle and register it
    ///
    /// A task watches the handle for version-change events for as long as it
    /// stays open.
    ///
    /// # Errors
    /// [`StorageError::Open`] if the backend refuses
    pub async fn open(
        self: &Arc<Self>,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> Result<Arc<Connection>> {
        let handle = self
            .backend
            .open(name, version, upgrade)
            .await
            .map_err(|source| StorageError::Open {
                name: name.to_string(),
                source,
            })?;

        let events = handle.take_version_changes();
        let connection = Arc::new(Connection::new(handle));
        self.live.insert(connection.id(), Arc::clone(&connection));

        if let Some(events) = events {
            let watcher = tokio::spawn(watch_version_changes(
                Arc::downgrade(self),
                connection.id(),
                events,
            ));
            *connection.watcher.lock() = Some(watcher);
        }

        tracing::debug!(
            connection_id = %connection.id(),
            database = name,
            version,
            "connection opened"
        );
        Ok(connection)
    }

    /// Close a handle; unknown ids are ignored
    pub fn close(&self, id: ConnectionId) -> bool {
        match self.live.remove(&id) {
            Some((_, connection)) => {
                connection.close();
                tracing::debug!(connection_id = %id, "connection closed");
                true
            }
            None => false,
        }
    }

    /// Close every live handle
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.live.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.close(*id)).count()
    }

    /// Look up a live handle
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.live.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live handles
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn on_version_change(&self, id: ConnectionId, change: VersionChange) {
        tracing::warn!(
            connection_id = %id,
            old_version = change.old_version,
            new_version = ?change.new_version,
            "database changed by another connection"
        );
        self.notifier.notify(Notice::warning(
            "Database Updated",
            "The database was changed in another window. Please reload the page.",
        ));
        self.close(id);
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("backend", &self.backend)
            .field("live", &self.live.len())
            .finish_non_exhaustive()
    }
}

async fn watch_version_changes(
    manager: Weak<ConnectionManager>,
    id: ConnectionId,
    mut events: mpsc::UnboundedReceiver<VersionChange>,
) {
    if let Some(change) = events.recv().await {
        if let Some(manager) = manager.upgrade() {
            manager.on_version_change(id, change);
        }
    }
}
