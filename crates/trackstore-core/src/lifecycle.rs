//! Database lifecycle and version manager
//!
//! Owns the current connection and drives the database through
//! `Uninitialized -> Initializing -> Initialized`, with `Error` reachable
//! from `Initializing`. Initialization, clears and upgrades are serialized by
//! a single async mutex; concurrent `init` callers share one attempt.

use crate::config::StoreConfig;
use crate::connection::Connection;
use crate::error::{Result, StorageError};
use crate::notify::{Notice, Notifier};
use crate::pool::ConnectionPool;
use crate::queue::TransactionQueue;
use crate::schema::StoreName;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use trackstore_engine::{EngineError, SchemaUpgrade};

/// Lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// `init` not called yet, or closed
    Uninitialized,
    /// Opening, upgrading or clearing
    Initializing,
    /// Ready for transactions
    Initialized,
    /// Last attempt failed
    Error(String),
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Initializing => f.write_str("initializing"),
            Self::Initialized => f.write_str("initialized"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Callback run after a successful clear
pub type ResetHook = Box<dyn Fn() + Send + Sync>;

/// Create every missing store; with `recreate`, drop existing stores first
///
/// # Errors
/// Backend schema error
pub fn apply_schema(upgrade: &mut dyn SchemaUpgrade, recreate: bool) -> std::result::Result<(), EngineError> {
    if recreate {
        for store in upgrade.store_names() {
            upgrade.delete_store(&store)?;
        }
    }
    let missing = StoreName::missing_from(&upgrade.store_names());
    for store in &missing {
        upgrade.create_store(store.as_str())?;
    }
    tracing::debug!(
        old_version = upgrade.old_version(),
        new_version = upgrade.new_version(),
        created = missing.len(),
        recreate,
        "schema applied"
    );
    Ok(())
}

type InitFuture = Shared<BoxFuture<'static, Result<Arc<Connection>>>>;

struct LifecycleInner {
    config: StoreConfig,
    pool: ConnectionPool,
    queue: TransactionQueue,
    notifier: Arc<dyn Notifier>,
    state: Mutex<LifecycleState>,
    current: Mutex<Option<Arc<Connection>>>,
    target_version: AtomicU32,
    in_flight: Mutex<Option<InitFuture>>,
    upgrade_lock: tokio::sync::Mutex<()>,
    reset_hooks: Mutex<Vec<ResetHook>>,
}

impl LifecycleInner {
    fn set_state(&self, state: LifecycleState) {
        tracing::debug!(state = %state, "lifecycle state changed");
        *self.state.lock() = state;
    }

    fn ready_connection(&self) -> Option<Arc<Connection>> {
        if *self.state.lock() != LifecycleState::Initialized {
            return None;
        }
        self.current
            .lock()
            .as_ref()
            .filter(|conn| !conn.is_closed())
            .map(Arc::clone)
    }

    fn drop_current(&self) {
        if let Some(conn) = self.current.lock().take() {
            self.pool.release_connection(conn.id());
        }
    }

    /// Open the database at the target version, adopting a newer stored
    /// version and bumping once if stores are missing
    async fn open_current(&self, recreate: bool) -> Result<Arc<Connection>> {
        let name = self.config.database_name.as_str();
        let mut version = self.target_version.load(Ordering::SeqCst);

        if let Some(stored) = self.pool.manager().backend().database_version(name).await {
            if stored > version {
                tracing::info!(stored, requested = version, "adopting newer stored version");
                version = stored;
            }
        }

        let mut upgrade = move |u: &mut dyn SchemaUpgrade| -> std::result::Result<(), EngineError> {
            apply_schema(u, recreate)
        };
        let mut connection = self.pool.acquire_connection(name, version, &mut upgrade).await?;

        let missing = StoreName::missing_from(&connection.store_names());
        if !missing.is_empty() {
            tracing::warn!(version, missing = missing.len(), "stores missing, bumping version");
            self.pool.close_all_connections();
            version = version.checked_add(1).ok_or_else(|| {
                StorageError::Upgrade(format!("cannot bump past version {version}"))
            })?;
            connection = self.pool.acquire_connection(name, version, &mut upgrade).await?;
        }

        self.target_version.store(version, Ordering::SeqCst);
        *self.current.lock() = Some(Arc::clone(&connection));
        Ok(connection)
    }

    async fn run_init(self: Arc<Self>) -> Result<Arc<Connection>> {
        let outcome = self.init_with_retry().await;
        self.in_flight.lock().take();
        outcome
    }

    async fn init_with_retry(&self) -> Result<Arc<Connection>> {
        let _guard = self.upgrade_lock.lock().await;
        if let Some(conn) = self.ready_connection() {
            return Ok(conn);
        }

        self.set_state(LifecycleState::Initializing);
        let attempts = self.config.init_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.open_current(false).await {
                Ok(conn) => {
                    self.set_state(LifecycleState::Initialized);
                    self.queue.set_initialized(true);
                    tracing::info!(
                        database = %self.config.database_name,
                        version = conn.version(),
                        attempt,
                        "database initialized"
                    );
                    return Ok(conn);
                }
                Err(error) => {
                    tracing::warn!(attempt, attempts, %error, "database initialization attempt failed");
                    last_error = Some(error);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.init_retry_delay() * attempt).await;
                    }
                }
            }
        }

        let message = last_error.map(|e| e.message()).unwrap_or_default();
        self.set_state(LifecycleState::Error(message.clone()));
        let error = StorageError::InitializationFailed { attempts, message };
        tracing::error!(%error, "database initialization failed");
        self.queue.fail_pending(&error);
        self.notifier.notify(Notice::from_error(&error));
        Err(error)
    }

    async fn delete_with_retry(&self) -> Result<()> {
        let name = self.config.database_name.as_str();
        let backend = self.pool.manager().backend();
        let attempts = self.config.delete_attempts.max(1);

        for attempt in 1..=attempts {
            match backend.delete_database(name).await {
                Ok(()) => {
                    tracing::info!(database = name, attempt, "database deleted");
                    return Ok(());
                }
                Err(source) if source.is_blocked() => {
                    tracing::warn!(database = name, attempt, attempts, "database delete blocked");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.delete_retry_delay() * attempt).await;
                    }
                }
                Err(source) => {
                    return Err(StorageError::Delete {
                        name: name.to_string(),
                        source,
                    })
                }
            }
        }

        Err(StorageError::Blocked {
            name: name.to_string(),
            attempts,
        })
    }

    async fn recreate(&self) -> Result<()> {
        let name = self.config.database_name.as_str();
        let stored = self.pool.manager().backend().database_version(name).await.unwrap_or(0);
        let previous = self.target_version.load(Ordering::SeqCst).max(stored);

        self.drop_current();
        self.pool.close_all_connections();
        self.delete_with_retry().await?;

        let next = previous
            .checked_add(1)
            .ok_or_else(|| StorageError::Upgrade(format!("cannot bump past version {previous}")))?
            .max(self.config.version);
        self.target_version.store(next, Ordering::SeqCst);
        self.open_current(true).await?;

        for hook in self.reset_hooks.lock().iter() {
            hook();
        }
        self.set_state(LifecycleState::Initialized);
        self.queue.set_initialized(true);
        tracing::info!(database = name, previous, version = next, "database cleared");
        Ok(())
    }

    fn fail(&self, error: &StorageError, action: &str) {
        self.set_state(LifecycleState::Error(error.message()));
        tracing::error!(%error, action, "database lifecycle operation failed");
        self.notifier.notify(Notice::from_error(error));
    }
}

/// Database lifecycle manager
///
/// Cloning is cheap and shares the manager.
#[derive(Clone)]
pub struct DatabaseLifecycle {
    inner: Arc<LifecycleInner>,
}

impl DatabaseLifecycle {
    /// Create a manager; nothing is opened until [`init`](Self::init)
    #[must_use]
    pub fn new(
        config: StoreConfig,
        pool: ConnectionPool,
        queue: TransactionQueue,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let version = config.version;
        Self {
            inner: Arc::new(LifecycleInner {
                config,
                pool,
                queue,
                notifier,
                state: Mutex::new(LifecycleState::Uninitialized),
                current: Mutex::new(None),
                target_version: AtomicU32::new(version),
                in_flight: Mutex::new(None),
                upgrade_lock: tokio::sync::Mutex::new(()),
                reset_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Open the database, creating or upgrading the schema
    ///
    /// Idempotent: returns immediately when ready, and concurrent callers
    /// share one attempt.
    ///
    /// # Errors
    /// [`StorageError::InitializationFailed`] after `init_attempts` failures
    pub async fn init(&self) -> Result<()> {
        if self.inner.ready_connection().is_some() {
            return Ok(());
        }

        let attempt = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(shared) => shared.clone(),
                None => {
                    let shared = Arc::clone(&self.inner).run_init().boxed().shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        attempt.await.map(|_| ())
    }

    /// Current connection, reopened if it expired or was closed
    ///
    /// # Errors
    /// - [`StorageError::NotInitialized`] before a successful `init`
    /// - open failures while reacquiring
    pub async fn connection(&self) -> Result<Arc<Connection>> {
        if let Some(conn) = self.inner.ready_connection() {
            return Ok(conn);
        }
        if !self.is_initialized() {
            return Err(StorageError::NotInitialized);
        }

        let _guard = self.inner.upgrade_lock.lock().await;
        if let Some(conn) = self.inner.ready_connection() {
            return Ok(conn);
        }
        if !self.is_initialized() {
            return Err(StorageError::NotInitialized);
        }
        tracing::debug!("current connection closed, reacquiring");
        self.inner.open_current(false).await
    }

    /// Delete and recreate the database with empty stores
    ///
    /// Pending queued work is dropped. The version after a clear is strictly
    /// greater than before.
    ///
    /// # Errors
    /// - [`StorageError::Blocked`] if other connections keep the database open
    /// - [`StorageError::Delete`] or [`StorageError::Open`] on backend failure
    pub async fn clear_database(&self) -> Result<()> {
        let _guard = self.inner.upgrade_lock.lock().await;
        tracing::info!(database = %self.inner.config.database_name, "clearing database");

        self.inner.queue.set_initialized(false);
        self.inner.queue.clear_queue();
        self.inner.set_state(LifecycleState::Initializing);

        match self.inner.recreate().await {
            Ok(()) => {
                self.inner.notifier.notify(Notice::info(
                    "Database Cleared",
                    "All data has been removed.",
                ));
                Ok(())
            }
            Err(error) => {
                self.inner.fail(&error, "clear");
                Err(error)
            }
        }
    }

    /// Reopen at a strictly higher version, creating missing stores
    ///
    /// # Errors
    /// - [`StorageError::Upgrade`] if `version` is not newer
    /// - open failures
    pub async fn upgrade(&self, version: u32) -> Result<()> {
        let _guard = self.inner.upgrade_lock.lock().await;
        let current = self.version();
        if version <= current {
            return Err(StorageError::Upgrade(format!(
                "version {version} is not newer than {current}"
            )));
        }

        self.inner.queue.set_initialized(false);
        self.inner.set_state(LifecycleState::Initializing);
        self.inner.drop_current();
        self.inner.pool.close_all_connections();
        self.inner.target_version.store(version, Ordering::SeqCst);

        match self.inner.open_current(false).await {
            Ok(conn) => {
                self.inner.set_state(LifecycleState::Initialized);
                self.inner.queue.set_initialized(true);
                tracing::info!(from = current, to = conn.version(), "database upgraded");
                Ok(())
            }
            Err(error) => {
                self.inner.fail(&error, "upgrade");
                Err(error)
            }
        }
    }

    /// Register a callback run after every successful clear
    pub fn on_reset(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.reset_hooks.lock().push(Box::new(hook));
    }

    /// Close every connection and return to `Uninitialized`
    pub async fn close(&self) {
        let _guard = self.inner.upgrade_lock.lock().await;
        self.inner.queue.set_initialized(false);
        self.inner.current.lock().take();
        self.inner.pool.close_all_connections();
        self.inner.set_state(LifecycleState::Uninitialized);
        tracing::info!("database closed");
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state.lock().clone()
    }

    /// Check if ready for transactions
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        *self.inner.state.lock() == LifecycleState::Initialized
    }

    /// Schema version currently targeted
    #[must_use]
    pub fn version(&self) -> u32 {
        self.inner.target_version.load(Ordering::SeqCst)
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Connection pool
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Transaction queue
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &TransactionQueue {
        &self.inner.queue
    }
}

impl fmt::Debug for DatabaseLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseLifecycle")
            .field("database", &self.inner.config.database_name)
            .field("version", &self.version())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::notify::{NoticeBuffer, NoticeLevel};
    use std::time::Duration;
    use trackstore_engine::{BackendConnection, BackendTransaction, MemoryBackend, StorageBackend, TxMode};

    fn config() -> StoreConfig {
        StoreConfig::default()
            .with_database_name("tracker")
            .with_connection_timeout(Duration::ZERO)
            .with_init_policy(3, Duration::from_millis(10))
            .with_delete_policy(3, Duration::from_millis(10))
    }

    fn lifecycle_with(backend: &MemoryBackend, notices: &Arc<NoticeBuffer>, config: StoreConfig) -> DatabaseLifecycle {
        let notifier: Arc<dyn Notifier> = Arc::clone(notices) as Arc<dyn Notifier>;
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(backend.clone()),
            Arc::clone(&notifier),
        ));
        let pool = ConnectionPool::from_config(manager, &config);
        let queue = TransactionQueue::from_config(&config, Arc::clone(&notifier));
        DatabaseLifecycle::new(config, pool, queue, notifier)
    }

    async fn foreign_handle(backend: &MemoryBackend, version: u32) -> Arc<dyn BackendConnection> {
        let mut upgrade = |u: &mut dyn SchemaUpgrade| -> std::result::Result<(), EngineError> {
            apply_schema(u, false)
        };
        backend.open("tracker", version, &mut upgrade).await.unwrap()
    }

    #[tokio::test]
    async fn init_creates_every_store() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());

        assert!(matches!(lifecycle.connection().await, Err(StorageError::NotInitialized)));
        lifecycle.init().await.unwrap();

        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
        assert!(lifecycle.queue().is_initialized());
        let conn = lifecycle.connection().await.unwrap();
        assert!(StoreName::missing_from(&conn.store_names()).is_empty());
        assert_eq!(lifecycle.version(), 1);
    }

    #[tokio::test]
    async fn concurrent_init_shares_one_attempt() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());

        let (a, b) = tokio::join!(lifecycle.init(), lifecycle.init());
        a.unwrap();
        b.unwrap();
        lifecycle.init().await.unwrap();

        assert_eq!(lifecycle.pool().stats().opened, 1);
        assert_eq!(backend.open_handles("tracker"), 1);
    }

    #[tokio::test]
    async fn adopts_newer_stored_version() {
        let backend = MemoryBackend::new();
        foreign_handle(&backend, 4).await.close();

        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());
        lifecycle.init().await.unwrap();

        assert_eq!(lifecycle.version(), 4);
        assert_eq!(lifecycle.connection().await.unwrap().version(), 4);
    }

    #[tokio::test]
    async fn missing_stores_trigger_a_version_bump() {
        let backend = MemoryBackend::new();
        let mut partial = |u: &mut dyn SchemaUpgrade| -> std::result::Result<(), EngineError> {
            u.create_store("projects")
        };
        backend.open("tracker", 1, &mut partial).await.unwrap().close();

        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());
        lifecycle.init().await.unwrap();

        assert_eq!(lifecycle.version(), 2);
        let conn = lifecycle.connection().await.unwrap();
        assert_eq!(conn.store_names().len(), StoreName::ALL.len());
    }

    #[tokio::test(start_paused = true)]
    async fn init_gives_up_after_bounded_attempts() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config().with_version(0));

        let err = lifecycle.init().await.unwrap_err();
        assert!(matches!(err, StorageError::InitializationFailed { attempts: 3, .. }));
        assert!(matches!(lifecycle.state(), LifecycleState::Error(_)));
        assert!(!lifecycle.queue().is_initialized());

        let notice = notices.drain().pop().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.contains("reload"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_init_resolves_queued_work_with_its_error() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config().with_version(0));

        let first = lifecycle
            .queue()
            .enqueue_transaction(Box::new(|| async { Ok::<(), StorageError>(()) }.boxed()), 1);
        let second = lifecycle
            .queue()
            .enqueue_transaction(Box::new(|| async { Ok::<(), StorageError>(()) }.boxed()), 5);
        lifecycle.init().await.unwrap_err();

        assert!(matches!(first.wait().await, Err(StorageError::InitializationFailed { attempts: 3, .. })));
        assert!(matches!(second.wait().await, Err(StorageError::InitializationFailed { .. })));
        assert!(lifecycle.queue().is_empty());
    }

    #[tokio::test]
    async fn clear_empties_stores_and_bumps_version() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());
        lifecycle.init().await.unwrap();

        let conn = lifecycle.connection().await.unwrap();
        let tx = conn.transaction(StoreName::Projects, TxMode::ReadWrite).unwrap();
        tx.request(trackstore_engine::Request::Put(serde_json::json!({"id": "p1"})))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let resets = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&resets);
        lifecycle.on_reset(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        lifecycle.clear_database().await.unwrap();

        assert_eq!(lifecycle.version(), 2);
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert!(conn.is_closed());
        for store in StoreName::ALL {
            assert_eq!(backend.record_count("tracker", store.as_str()), Some(0));
        }
        assert_eq!(notices.drain().last().unwrap().title, "Database Cleared");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_blocked_by_foreign_handle_fails_typed() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());
        lifecycle.init().await.unwrap();

        let _other_window = foreign_handle(&backend, 1).await;
        let err = lifecycle.clear_database().await.unwrap_err();

        assert!(matches!(err, StorageError::Blocked { attempts: 3, .. }));
        assert!(matches!(lifecycle.state(), LifecycleState::Error(_)));
        let notice = notices.drain().pop().unwrap();
        assert!(notice.message.contains("Please reload the page."));
    }

    #[tokio::test]
    async fn clear_drops_queued_work() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());

        let ticket = lifecycle
            .queue()
            .enqueue_transaction(Box::new(|| async { Ok::<(), StorageError>(()) }.boxed()), 1);
        lifecycle.clear_database().await.unwrap();

        assert!(matches!(ticket.wait().await, Err(StorageError::QueueCleared)));
        assert!(lifecycle.is_initialized());
    }

    #[tokio::test]
    async fn upgrade_requires_newer_version() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());
        lifecycle.init().await.unwrap();

        assert!(matches!(lifecycle.upgrade(1).await, Err(StorageError::Upgrade(_))));
        lifecycle.upgrade(3).await.unwrap();
        assert_eq!(lifecycle.version(), 3);
        assert_eq!(backend.database_version("tracker").await, Some(3));
        assert_eq!(lifecycle.connection().await.unwrap().version(), 3);
    }

    #[tokio::test]
    async fn closed_connection_is_reacquired() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());
        lifecycle.init().await.unwrap();

        let first = lifecycle.connection().await.unwrap();
        lifecycle.pool().release_connection(first.id());

        let second = lifecycle.connection().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn close_returns_to_uninitialized() {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let lifecycle = lifecycle_with(&backend, &notices, config());
        lifecycle.init().await.unwrap();

        lifecycle.close().await;
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert_eq!(backend.open_handles("tracker"), 0);
        assert!(matches!(lifecycle.connection().await, Err(StorageError::NotInitialized)));
    }
}
