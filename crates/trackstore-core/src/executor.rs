//! Transaction executor
//!
//! Runs one operation against one store inside a timeout-bounded backend
//! transaction. Success commits, anything else aborts. Backend failures from
//! the transaction, abort and request channels all surface as
//! [`StorageError::Transaction`].

use crate::config::StoreConfig;
use crate::connection::Connection;
use crate::error::{FailureOrigin, Result, StorageError};
use crate::schema::StoreName;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use trackstore_engine::{BackendTransaction, EngineError, Request, Response, TxMode};

fn transaction_error(store: StoreName, origin: FailureOrigin, error: &EngineError) -> StorageError {
    StorageError::Transaction {
        store: store.as_str().to_string(),
        origin,
        message: error.to_string(),
    }
}

fn unexpected(store: StoreName, response: &Response) -> StorageError {
    let error = EngineError::UnexpectedResponse(format!("{response:?}"));
    transaction_error(store, FailureOrigin::Request, &error)
}

/// Request surface of a running transaction
#[derive(Clone)]
pub struct StoreHandle {
    store: StoreName,
    tx: Arc<dyn BackendTransaction>,
}

impl StoreHandle {
    /// Store this handle writes to
    #[inline]
    #[must_use]
    pub fn store(&self) -> StoreName {
        self.store
    }

    /// Transaction mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> TxMode {
        self.tx.mode()
    }

    async fn request(&self, request: Request) -> Result<Response> {
        self.tx
            .request(request)
            .await
            .map_err(|e| transaction_error(self.store, FailureOrigin::Request, &e))
    }

    /// Read one record
    ///
    /// # Errors
    /// Request failure
    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        match self.request(Request::Get(id.to_string())).await? {
            Response::Record(record) => Ok(record),
            other => Err(unexpected(self.store, &other)),
        }
    }

    /// Read every record
    ///
    /// # Errors
    /// Request failure
    pub async fn get_all(&self) -> Result<Vec<Value>> {
        match self.request(Request::GetAll).await? {
            Response::Records(records) => Ok(records),
            other => Err(unexpected(self.store, &other)),
        }
    }

    /// Insert or replace a record, returning its key
    ///
    /// # Errors
    /// Request failure
    pub async fn put(&self, record: Value) -> Result<String> {
        match self.request(Request::Put(record)).await? {
            Response::Key(key) => Ok(key),
            other => Err(unexpected(self.store, &other)),
        }
    }

    /// Remove a record
    ///
    /// # Errors
    /// Request failure
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.request(Request::Delete(id.to_string())).await.map(|_| ())
    }

    /// Remove every record
    ///
    /// # Errors
    /// Request failure
    pub async fn clear(&self) -> Result<()> {
        self.request(Request::Clear).await.map(|_| ())
    }

    /// Count records
    ///
    /// # Errors
    /// Request failure
    pub async fn count(&self) -> Result<usize> {
        match self.request(Request::Count).await? {
            Response::Count(count) => Ok(count),
            other => Err(unexpected(self.store, &other)),
        }
    }

    /// Read one record as `T`
    ///
    /// # Errors
    /// Request failure or a record that does not decode
    pub async fn get_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        self.get(id)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(StorageError::from)
    }

    /// Read every record as `T`
    ///
    /// # Errors
    /// Request failure or a record that does not decode
    pub async fn get_all_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.get_all()
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StorageError::from))
            .collect()
    }

    /// Encode and upsert a record
    ///
    /// # Errors
    /// Encoding or request failure
    pub async fn put_record<T: Serialize + Sync>(&self, record: &T) -> Result<String> {
        self.put(serde_json::to_value(record)?).await
    }
}

/// Runs single-store operations inside backend transactions
#[derive(Debug, Clone, Copy)]
pub struct TransactionExecutor {
    default_timeout: Duration,
    long_timeout: Duration,
}

impl TransactionExecutor {
    /// Create an executor
    #[inline]
    #[must_use]
    pub fn new(default_timeout: Duration, long_timeout: Duration) -> Self {
        Self {
            default_timeout,
            long_timeout,
        }
    }

    /// Create an executor from configuration
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.transaction_timeout(), config.long_transaction_timeout())
    }

    /// Timeout for ordinary operations
    #[inline]
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Timeout for bulk operations
    #[inline]
    #[must_use]
    pub fn long_timeout(&self) -> Duration {
        self.long_timeout
    }

    /// Run `op` with the default timeout
    ///
    /// # Errors
    /// See [`execute_with_timeout`](Self::execute_with_timeout)
    pub async fn execute<T, F, Fut>(
        &self,
        connection: &Connection,
        store: StoreName,
        mode: TxMode,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(StoreHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_timeout(connection, store, mode, self.default_timeout, op)
            .await
    }

    /// Run `op` with the long timeout
    ///
    /// # Errors
    /// See [`execute_with_timeout`](Self::execute_with_timeout)
    pub async fn execute_long<T, F, Fut>(
        &self,
        connection: &Connection,
        store: StoreName,
        mode: TxMode,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(StoreHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_timeout(connection, store, mode, self.long_timeout, op)
            .await
    }

    /// Run `op` inside a transaction over `store`
    ///
    /// # Errors
    /// - [`StorageError::Transaction`] if the transaction cannot start, a
    ///   request fails or the commit is rejected
    /// - [`StorageError::Timeout`] if `op` outlives `timeout`
    /// - any error returned by `op` itself (the transaction is aborted)
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        connection: &Connection,
        store: StoreName,
        mode: TxMode,
        timeout: Duration,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(StoreHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = connection
            .transaction(store, mode)
            .map_err(|e| transaction_error(store, FailureOrigin::Transaction, &e))?;
        let handle = StoreHandle {
            store,
            tx: Arc::clone(&tx),
        };

        let outcome = match tokio::time::timeout(timeout, op(handle)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tx.abort();
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(store = %store, timeout_ms, "transaction timed out");
                return Err(StorageError::Timeout {
                    store: store.as_str().to_string(),
                    timeout_ms,
                });
            }
        };

        match outcome {
            Ok(value) => {
                tx.commit().await.map_err(|e| {
                    let origin = if e.is_abort() {
                        FailureOrigin::Abort
                    } else {
                        FailureOrigin::Transaction
                    };
                    tracing::warn!(store = %store, %origin, error = %e, "commit failed");
                    transaction_error(store, origin, &e)
                })?;
                Ok(value)
            }
            Err(error) => {
                tx.abort();
                tracing::debug!(store = %store, %error, "transaction aborted");
                Err(error)
            }
        }
    }
}

impl Default for TransactionExecutor {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}
