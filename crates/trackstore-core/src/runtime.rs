//! Composition root
//!
//! Builds the connection manager, pool, executor, queue, lifecycle and
//! rollback manager from one configuration and wires them together.

use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::executor::TransactionExecutor;
use crate::lifecycle::DatabaseLifecycle;
use crate::notify::{Notifier, TracingNotifier};
use crate::pool::ConnectionPool;
use crate::queue::TransactionQueue;
use crate::rollback::RollbackManager;
use std::sync::Arc;
use trackstore_engine::{MemoryBackend, StorageBackend};

/// Every storage service, wired together
#[derive(Clone)]
pub struct StoreRuntime {
    notifier: Arc<dyn Notifier>,
    lifecycle: DatabaseLifecycle,
    executor: TransactionExecutor,
    rollback: Arc<RollbackManager>,
}

impl StoreRuntime {
    /// Build the services over a backend
    ///
    /// # Errors
    /// [`StorageError::Config`](crate::StorageError::Config) if the configuration is invalid
    pub fn new(
        config: StoreConfig,
        backend: Arc<dyn StorageBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;

        let manager = Arc::new(ConnectionManager::new(backend, Arc::clone(&notifier)));
        let pool = ConnectionPool::from_config(manager, &config);
        let queue = TransactionQueue::from_config(&config, Arc::clone(&notifier));
        let executor = TransactionExecutor::from_config(&config);
        let lifecycle = DatabaseLifecycle::new(config, pool, queue, Arc::clone(&notifier));

        Ok(Self {
            notifier,
            lifecycle,
            executor,
            rollback: Arc::new(RollbackManager::new()),
        })
    }

    /// Build the services over a fresh in-memory backend, logging notices
    ///
    /// # Errors
    /// [`StorageError::Config`](crate::StorageError::Config) if the configuration is invalid
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryBackend::new()), Arc::new(TracingNotifier))
    }

    /// Start the pool janitor
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_background_tasks(&self) {
        let interval = self.config().stale_check_interval();
        self.lifecycle.pool().start_janitor(interval);
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        self.lifecycle.config()
    }

    /// Notice sink
    #[inline]
    #[must_use]
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Lifecycle manager
    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> &DatabaseLifecycle {
        &self.lifecycle
    }

    /// Connection pool
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        self.lifecycle.pool()
    }

    /// Transaction queue
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &TransactionQueue {
        self.lifecycle.queue()
    }

    /// Transaction executor
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &TransactionExecutor {
        &self.executor
    }

    /// Rollback manager
    #[inline]
    #[must_use]
    pub fn rollback(&self) -> &Arc<RollbackManager> {
        &self.rollback
    }
}

impl std::fmt::Debug for StoreRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRuntime")
            .field("lifecycle", &self.lifecycle)
            .field("executor", &self.executor)
            .field("rollback", &self.rollback)
            .finish_non_exhaustive()
    }
}
