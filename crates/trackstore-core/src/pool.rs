//! Connection pool
//!
//! Bounds the number of open handles, hands out live connections keyed by
//! database name and version, and evicts dead ones:
//! - lazily on acquire (probe transaction against [`StoreName::PROBE`])
//! - on a timer (`stale_check_interval`)
//! - after `connection_timeout` from acquisition

use crate::config::StoreConfig;
use crate::connection::{Connection, ConnectionId, ConnectionManager};
use crate::error::{Result, StorageError};
use crate::schema::StoreName;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use trackstore_engine::UpgradeFn;

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened
    pub opened: usize,
    /// Acquisitions served by an existing connection
    pub reused: usize,
    /// Connections removed because they were stale
    pub evicted: usize,
    /// Connections released explicitly or on expiry
    pub released: usize,
    /// Connections currently pooled
    pub active: usize,
}

impl PoolStats {
    /// Fraction of acquisitions served by reuse
    #[must_use]
    pub fn reuse_rate(&self) -> f64 {
        let total = self.opened + self.reused;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.reused as f64 / total as f64;
            rate
        }
    }
}

struct PooledEntry {
    connection: Arc<Connection>,
    expiry: Option<JoinHandle<()>>,
}

struct PoolInner {
    manager: Arc<ConnectionManager>,
    max_connections: usize,
    connection_timeout: Duration,
    entries: DashMap<ConnectionId, PooledEntry>,
    acquire_lock: tokio::sync::Mutex<()>,
    stats: Mutex<PoolStats>,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl PoolInner {
    fn is_stale(connection: &Connection) -> bool {
        !connection.probe(StoreName::PROBE)
    }

    fn remove(&self, id: ConnectionId) -> bool {
        let Some((_, entry)) = self.entries.remove(&id) else {
            return false;
        };
        if let Some(expiry) = entry.expiry {
            expiry.abort();
        }
        self.manager.close(id);
        self.stats.lock().active = self.entries.len();
        true
    }

    fn release(&self, id: ConnectionId) -> bool {
        let removed = self.remove(id);
        if removed {
            self.stats.lock().released += 1;
            tracing::debug!(connection_id = %id, "connection released");
        }
        removed
    }

    fn evict(&self, id: ConnectionId) -> bool {
        let removed = self.remove(id);
        if removed {
            self.stats.lock().evicted += 1;
            tracing::debug!(connection_id = %id, "stale connection evicted");
        }
        removed
    }

    fn cleanup_stale(&self) -> usize {
        let stale: Vec<ConnectionId> = self
            .entries
            .iter()
            .filter(|entry| Self::is_stale(&entry.value().connection))
            .map(|entry| *entry.key())
            .collect();
        stale.into_iter().filter(|id| self.evict(*id)).count()
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(janitor) = self.janitor.get_mut().take() {
            janitor.abort();
        }
        for entry in self.entries.iter() {
            if let Some(expiry) = &entry.value().expiry {
                expiry.abort();
            }
        }
    }
}

/// Bounded pool of database connections
///
/// Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager>,
        max_connections: usize,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                manager,
                max_connections,
                connection_timeout,
                entries: DashMap::new(),
                acquire_lock: tokio::sync::Mutex::new(()),
                stats: Mutex::new(PoolStats::default()),
                janitor: Mutex::new(None),
            }),
        }
    }

    /// Create a pool from configuration
    #[must_use]
    pub fn from_config(manager: Arc<ConnectionManager>, config: &StoreConfig) -> Self {
        Self::new(manager, config.max_connections, config.connection_timeout())
    }

    /// Connection manager behind the pool
    #[inline]
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.inner.manager
    }

    /// Configured capacity
    #[inline]
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Acquire a connection (reuse or open)
    ///
    /// # Arguments
    /// * `name` - Database name
    /// * `version` - Schema version
    /// * `upgrade` - Schema callback, run only when a new handle triggers an upgrade
    ///
    /// # Errors
    /// - [`StorageError::CapacityExceeded`] if every slot holds a live connection
    /// - [`StorageError::Open`] if the backend refuses
    pub async fn acquire_connection(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> Result<Arc<Connection>> {
        let _guard = self.inner.acquire_lock.lock().await;

        let candidates: Vec<Arc<Connection>> = self
            .inner
            .entries
            .iter()
            .filter(|entry| {
                let conn = &entry.value().connection;
                conn.name() == name && conn.version() == version
            })
            .map(|entry| Arc::clone(&entry.value().connection))
            .collect();

        for connection in candidates {
            if PoolInner::is_stale(&connection) {
                self.inner.evict(connection.id());
                continue;
            }
            connection.touch();
            self.inner.stats.lock().reused += 1;
            return Ok(connection);
        }

        if self.inner.entries.len() >= self.inner.max_connections {
            let evicted = self.inner.cleanup_stale();
            tracing::debug!(evicted, "pool full, evicted stale connections");
            if self.inner.entries.len() >= self.inner.max_connections {
                tracing::warn!(max = self.inner.max_connections, "connection pool exhausted");
                return Err(StorageError::CapacityExceeded {
                    max: self.inner.max_connections,
                });
            }
        }

        let connection = self.inner.manager.open(name, version, upgrade).await?;
        let expiry = self.schedule_expiry(connection.id());
        self.inner.entries.insert(
            connection.id(),
            PooledEntry {
                connection: Arc::clone(&connection),
                expiry,
            },
        );

        {
            let mut stats = self.inner.stats.lock();
            stats.opened += 1;
            stats.active = self.inner.entries.len();
        }

        Ok(connection)
    }

    fn schedule_expiry(&self, id: ConnectionId) -> Option<JoinHandle<()>> {
        if self.inner.connection_timeout.is_zero() {
            return None;
        }
        let timeout = self.inner.connection_timeout;
        let pool: Weak<PoolInner> = Arc::downgrade(&self.inner);
        Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pool) = pool.upgrade() {
                // Detach our own handle first so releasing does not abort this task mid-way.
                if let Some(mut entry) = pool.entries.get_mut(&id) {
                    entry.expiry = None;
                }
                pool.release(id);
            }
        }))
    }

    /// Close a pooled connection; unknown ids are ignored
    pub fn release_connection(&self, id: ConnectionId) -> bool {
        self.inner.release(id)
    }

    /// Release every pooled connection and close any handle the manager still tracks
    pub fn close_all_connections(&self) -> usize {
        let ids: Vec<ConnectionId> = self.inner.entries.iter().map(|entry| *entry.key()).collect();
        let released = ids.into_iter().filter(|id| self.inner.release(*id)).count();
        self.inner.manager.close_all();
        tracing::debug!(released, "closed all pooled connections");
        released
    }

    /// Evict connections whose probe fails
    pub fn cleanup_stale(&self) -> usize {
        self.inner.cleanup_stale()
    }

    /// Run [`cleanup_stale`](Self::cleanup_stale) periodically
    ///
    /// Replaces any janitor already running. The task stops when the pool is dropped.
    pub fn start_janitor(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let pool: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                let evicted = pool.cleanup_stale();
                if evicted > 0 {
                    tracing::debug!(evicted, "janitor evicted stale connections");
                }
            }
        });
        if let Some(previous) = self.inner.janitor.lock().replace(task) {
            previous.abort();
        }
    }

    /// Number of pooled connections
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.entries.len()
    }

    /// Get pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = *self.inner.stats.lock();
        stats.active = self.inner.entries.len();
        stats
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_connections", &self.inner.max_connections)
            .field("size", &self.inner.entries.len())
            .finish_non_exhaustive()
    }
}
