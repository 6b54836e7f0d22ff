//! In-memory storage backend
//!
//! Keeps every database in process memory behind a single `parking_lot`
//! mutex. Cloning a [`MemoryBackend`] shares the same databases, which is how
//! several "tabs" (independent runtimes) are simulated in tests.

use crate::backend::{
    BackendConnection, BackendTransaction, Request, Response, SchemaUpgrade, StorageBackend,
    TxMode, UpgradeFn, VersionChange,
};
use crate::error::EngineError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Records = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct DatabaseState {
    version: u32,
    stores: BTreeMap<String, Records>,
    handles: HashMap<u64, mpsc::UnboundedSender<VersionChange>>,
}

impl DatabaseState {
    fn notify_handles(&self, new_version: Option<u32>) {
        for sender in self.handles.values() {
            let _ = sender.send(VersionChange {
                old_version: self.version,
                new_version,
            });
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    databases: HashMap<String, DatabaseState>,
    request_faults: HashMap<String, u32>,
    commit_faults: HashMap<String, u32>,
    request_latency: HashMap<String, Duration>,
    next_handle: u64,
}

fn take_fault(faults: &mut HashMap<String, u32>, store: &str) -> bool {
    match faults.get_mut(store) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

/// In-memory embedded database engine
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<EngineState>>,
}

impl MemoryBackend {
    /// Create an empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` requests against `store` fail
    pub fn fail_next_requests(&self, store: &str, count: u32) {
        self.state
            .lock()
            .request_faults
            .insert(store.to_string(), count);
    }

    /// Make the next `count` commits against `store` abort
    pub fn fail_next_commits(&self, store: &str, count: u32) {
        self.state
            .lock()
            .commit_faults
            .insert(store.to_string(), count);
    }

    /// Delay every request against `store` by `latency`
    pub fn set_request_latency(&self, store: &str, latency: Duration) {
        self.state
            .lock()
            .request_latency
            .insert(store.to_string(), latency);
    }

    /// Number of open handles on a database
    #[must_use]
    pub fn open_handles(&self, name: &str) -> usize {
        self.state
            .lock()
            .databases
            .get(name)
            .map_or(0, |db| db.handles.len())
    }

    /// Number of committed records in a store
    #[must_use]
    pub fn record_count(&self, name: &str, store: &str) -> Option<usize> {
        self.state
            .lock()
            .databases
            .get(name)
            .and_then(|db| db.stores.get(store))
            .map(BTreeMap::len)
    }

    fn open_sync(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> Result<Arc<dyn BackendConnection>, EngineError> {
        if version == 0 {
            return Err(EngineError::InvalidVersion(version));
        }

        let mut state = self.state.lock();
        let current = state.databases.get(name).map(|db| db.version);

        if let Some(current) = current {
            if version < current {
                return Err(EngineError::VersionError {
                    requested: version,
                    current,
                });
            }
        }

        if current.map_or(true, |current| version > current) {
            if let Some(db) = state.databases.get(name) {
                if !db.handles.is_empty() {
                    db.notify_handles(Some(version));
                    return Err(EngineError::Blocked {
                        name: name.to_string(),
                        open_handles: db.handles.len(),
                    });
                }
            }

            let old_version = current.unwrap_or(0);
            let mut stores = state
                .databases
                .get(name)
                .map(|db| db.stores.clone())
                .unwrap_or_default();

            // Upgrades are all-or-nothing: work on a copy.
            let mut ctx = StoreUpgrade {
                old_version,
                new_version: version,
                stores: &mut stores,
            };
            upgrade(&mut ctx)?;

            let db = state.databases.entry(name.to_string()).or_default();
            db.version = version;
            db.stores = stores;
            tracing::debug!(database = name, old_version, version, "database upgraded");
        }

        state.next_handle += 1;
        let handle_id = state.next_handle;
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(db) = state.databases.get_mut(name) {
            db.handles.insert(handle_id, sender);
        }
        drop(state);

        Ok(Arc::new(MemoryConnection {
            handle_id,
            name: name.to_string(),
            version,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
            version_changes: Mutex::new(Some(receiver)),
        }))
    }

    fn delete_sync(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let Some(db) = state.databases.get(name) else {
            return Ok(());
        };

        if !db.handles.is_empty() {
            db.notify_handles(None);
            return Err(EngineError::Blocked {
                name: name.to_string(),
                open_handles: db.handles.len(),
            });
        }

        state.databases.remove(name);
        tracing::debug!(database = name, "database deleted");
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> Result<Arc<dyn BackendConnection>, EngineError> {
        self.open_sync(name, version, upgrade)
    }

    async fn delete_database(&self, name: &str) -> Result<(), EngineError> {
        self.delete_sync(name)
    }

    async fn database_version(&self, name: &str) -> Option<u32> {
        self.state.lock().databases.get(name).map(|db| db.version)
    }
}

struct StoreUpgrade<'a> {
    old_version: u32,
    new_version: u32,
    stores: &'a mut BTreeMap<String, Records>,
}

impl SchemaUpgrade for StoreUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn create_store(&mut self, name: &str) -> Result<(), EngineError> {
        if self.stores.contains_key(name) {
            return Err(EngineError::StoreExists(name.to_string()));
        }
        self.stores.insert(name.to_string(), Records::new());
        Ok(())
    }

    fn delete_store(&mut self, name: &str) -> Result<(), EngineError> {
        self.stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::StoreNotFound(name.to_string()))
    }
}

#[derive(Debug)]
struct MemoryConnection {
    handle_id: u64,
    name: String,
    version: u32,
    state: Arc<Mutex<EngineState>>,
    closed: AtomicBool,
    version_changes: Mutex<Option<mpsc::UnboundedReceiver<VersionChange>>>,
}

impl BackendConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(&self.name)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(
        &self,
        store: &str,
        mode: TxMode,
    ) -> Result<Arc<dyn BackendTransaction>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::InvalidState(format!(
                "connection to `{}` is closed",
                self.name
            )));
        }

        {
            let state = self.state.lock();
            let db = state
                .databases
                .get(&self.name)
                .filter(|db| db.version == self.version && db.handles.contains_key(&self.handle_id))
                .ok_or_else(|| {
                    EngineError::InvalidState(format!(
                        "connection to `{}` is no longer valid",
                        self.name
                    ))
                })?;

            if !db.stores.contains_key(store) {
                return Err(EngineError::StoreNotFound(store.to_string()));
            }
        }

        Ok(Arc::new(MemoryTransaction {
            db_name: self.name.clone(),
            store: store.to_string(),
            mode,
            state: Arc::clone(&self.state),
            staged: Mutex::new(Vec::new()),
            status: Mutex::new(TxStatus::Active),
        }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(db) = self.state.lock().databases.get_mut(&self.name) {
            db.handles.remove(&self.handle_id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn take_version_changes(&self) -> Option<mpsc::UnboundedReceiver<VersionChange>> {
        self.version_changes.lock().take()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxStatus {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug)]
enum StagedWrite {
    Put(String, Value),
    Delete(String),
    Clear,
}

impl StagedWrite {
    fn apply(self, records: &mut Records) {
        match self {
            Self::Put(id, value) => {
                records.insert(id, value);
            }
            Self::Delete(id) => {
                records.remove(&id);
            }
            Self::Clear => records.clear(),
        }
    }
}

struct MemoryTransaction {
    db_name: String,
    store: String,
    mode: TxMode,
    state: Arc<Mutex<EngineState>>,
    staged: Mutex<Vec<StagedWrite>>,
    status: Mutex<TxStatus>,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> Result<(), EngineError> {
        match *self.status.lock() {
            TxStatus::Active => Ok(()),
            TxStatus::Aborted => Err(EngineError::TransactionAborted(format!(
                "transaction on `{}` was aborted",
                self.store
            ))),
            TxStatus::Committed => Err(EngineError::InvalidState(format!(
                "transaction on `{}` has already committed",
                self.store
            ))),
        }
    }

    /// Committed records overlaid with this transaction's staged writes
    fn view(&self) -> Result<Records, EngineError> {
        let mut records = {
            let state = self.state.lock();
            state
                .databases
                .get(&self.db_name)
                .and_then(|db| db.stores.get(&self.store))
                .cloned()
                .ok_or_else(|| EngineError::StoreNotFound(self.store.clone()))?
        };

        for write in self.staged.lock().iter() {
            match write {
                StagedWrite::Put(id, value) => {
                    records.insert(id.clone(), value.clone());
                }
                StagedWrite::Delete(id) => {
                    records.remove(id);
                }
                StagedWrite::Clear => records.clear(),
            }
        }
        Ok(records)
    }

    fn stage(&self, write: StagedWrite) {
        self.staged.lock().push(write);
    }

    fn request_sync(&self, request: Request) -> Result<Response, EngineError> {
        self.ensure_active()?;

        if take_fault(&mut self.state.lock().request_faults, &self.store) {
            return Err(EngineError::RequestFailed(format!(
                "injected failure on `{}`",
                self.store
            )));
        }

        if request.is_write() && !self.mode.is_writable() {
            return Err(EngineError::ReadOnly(self.store.clone()));
        }

        match request {
            Request::Get(id) => Ok(Response::Record(self.view()?.remove(&id))),
            Request::GetAll => Ok(Response::Records(self.view()?.into_values().collect())),
            Request::Count => Ok(Response::Count(self.view()?.len())),
            Request::Put(value) => {
                let id = record_id(&value)?;
                self.stage(StagedWrite::Put(id.clone(), value));
                Ok(Response::Key(id))
            }
            Request::Delete(id) => {
                self.stage(StagedWrite::Delete(id));
                Ok(Response::Done)
            }
            Request::Clear => {
                self.stage(StagedWrite::Clear);
                Ok(Response::Done)
            }
        }
    }

    fn commit_sync(&self) -> Result<(), EngineError> {
        let mut status = self.status.lock();
        match *status {
            TxStatus::Active => {}
            TxStatus::Aborted => {
                return Err(EngineError::TransactionAborted(format!(
                    "transaction on `{}` was aborted",
                    self.store
                )))
            }
            TxStatus::Committed => {
                return Err(EngineError::InvalidState(format!(
                    "transaction on `{}` has already committed",
                    self.store
                )))
            }
        }

        let mut state = self.state.lock();
        if take_fault(&mut state.commit_faults, &self.store) {
            *status = TxStatus::Aborted;
            self.staged.lock().clear();
            return Err(EngineError::TransactionAborted(format!(
                "injected abort on `{}`",
                self.store
            )));
        }

        let Some(records) = state
            .databases
            .get_mut(&self.db_name)
            .and_then(|db| db.stores.get_mut(&self.store))
        else {
            *status = TxStatus::Aborted;
            self.staged.lock().clear();
            return Err(EngineError::TransactionAborted(format!(
                "store `{}` no longer exists",
                self.store
            )));
        };

        for write in self.staged.lock().drain(..) {
            write.apply(records);
        }
        *status = TxStatus::Committed;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BackendTransaction for MemoryTransaction {
    fn store(&self) -> &str {
        &self.store
    }

    fn mode(&self) -> TxMode {
        self.mode
    }

    async fn request(&self, request: Request) -> Result<Response, EngineError> {
        let latency = self.state.lock().request_latency.get(&self.store).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.request_sync(request)
    }

    async fn commit(&self) -> Result<(), EngineError> {
        self.commit_sync()
    }

    fn abort(&self) {
        let mut status = self.status.lock();
        if *status == TxStatus::Active {
            *status = TxStatus::Aborted;
            self.staged.lock().clear();
        }
    }
}

fn record_id(value: &Value) -> Result<String, EngineError> {
    value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| EngineError::DataError("record has no string `id` key".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn open_with_stores(
        backend: &MemoryBackend,
        version: u32,
        stores: &[&str],
    ) -> Arc<dyn BackendConnection> {
        backend
            .open("tracker", version, &mut |upgrade: &mut dyn SchemaUpgrade| -> Result<(), EngineError> {
                for store in stores {
                    if !upgrade.store_names().iter().any(|s| s == store) {
                        upgrade.create_store(store)?;
                    }
                }
                Ok(())
            })
            .await
            .unwrap()
    }

    async fn put(conn: &Arc<dyn BackendConnection>, store: &str, value: Value) {
        let tx = conn.transaction(store, TxMode::ReadWrite).unwrap();
        tx.request(Request::Put(value)).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn open_runs_upgrade_for_new_database() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects", "teams"]).await;

        assert_eq!(conn.version(), 1);
        assert_eq!(conn.store_names(), vec!["projects", "teams"]);
        assert_eq!(backend.database_version("tracker").await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn request_latency_delays_only_its_store() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects", "teams"]).await;
        backend.set_request_latency("projects", Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let tx = conn.transaction("teams", TxMode::ReadOnly).unwrap();
        tx.request(Request::Count).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        let tx = conn.transaction("projects", TxMode::ReadOnly).unwrap();
        tx.request(Request::Count).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn open_older_version_is_rejected() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 3, &["projects"]).await;
        conn.close();

        let err = backend
            .open("tracker", 2, &mut |_: &mut dyn SchemaUpgrade| -> Result<(), EngineError> {
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::VersionError {
                requested: 2,
                current: 3
            }
        );
    }

    #[tokio::test]
    async fn failed_upgrade_leaves_no_database() {
        let backend = MemoryBackend::new();
        let result = backend
            .open("tracker", 1, &mut |upgrade: &mut dyn SchemaUpgrade| -> Result<(), EngineError> {
                upgrade.create_store("projects")?;
                upgrade.create_store("projects")
            })
            .await;

        assert!(matches!(result, Err(EngineError::StoreExists(_))));
        assert_eq!(backend.database_version("tracker").await, None);
    }

    #[tokio::test]
    async fn put_is_upsert_and_visible_after_commit() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects"]).await;

        put(&conn, "projects", json!({"id": "p1", "name": "first"})).await;
        put(&conn, "projects", json!({"id": "p1", "name": "second"})).await;

        let tx = conn.transaction("projects", TxMode::ReadOnly).unwrap();
        let all = tx.request(Request::GetAll).await.unwrap();
        assert_eq!(
            all,
            Response::Records(vec![json!({"id": "p1", "name": "second"})])
        );
    }

    #[tokio::test]
    async fn staged_writes_are_visible_inside_transaction_only() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects"]).await;

        let tx = conn.transaction("projects", TxMode::ReadWrite).unwrap();
        tx.request(Request::Put(json!({"id": "p1"}))).await.unwrap();
        assert_eq!(tx.request(Request::Count).await.unwrap(), Response::Count(1));
        assert_eq!(backend.record_count("tracker", "projects"), Some(0));

        tx.abort();
        assert_eq!(backend.record_count("tracker", "projects"), Some(0));
        assert!(tx.request(Request::Count).await.unwrap_err().is_abort());
    }

    #[tokio::test]
    async fn readonly_transaction_rejects_writes() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects"]).await;

        let tx = conn.transaction("projects", TxMode::ReadOnly).unwrap();
        let err = tx.request(Request::Clear).await.unwrap_err();
        assert_eq!(err, EngineError::ReadOnly("projects".to_string()));
    }

    #[tokio::test]
    async fn put_requires_string_id() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects"]).await;

        let tx = conn.transaction("projects", TxMode::ReadWrite).unwrap();
        let err = tx.request(Request::Put(json!({"name": "x"}))).await.unwrap_err();
        assert!(matches!(err, EngineError::DataError(_)));
    }

    #[tokio::test]
    async fn delete_is_blocked_by_open_handles_and_notifies_them() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 2, &["projects"]).await;
        let mut events = conn.take_version_changes().unwrap();

        let err = backend.delete_database("tracker").await.unwrap_err();
        assert!(err.is_blocked());

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            VersionChange {
                old_version: 2,
                new_version: None
            }
        );

        conn.close();
        backend.delete_database("tracker").await.unwrap();
        assert_eq!(backend.database_version("tracker").await, None);
    }

    #[tokio::test]
    async fn closed_handle_cannot_start_transactions() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects"]).await;
        conn.close();
        conn.close();

        assert!(conn.is_closed());
        assert!(matches!(
            conn.transaction("projects", TxMode::ReadOnly),
            Err(EngineError::InvalidState(_))
        ));
        assert_eq!(backend.open_handles("tracker"), 0);
    }

    #[tokio::test]
    async fn missing_store_is_reported() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects"]).await;

        assert!(matches!(
            conn.transaction("teams", TxMode::ReadOnly),
            Err(EngineError::StoreNotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let backend = MemoryBackend::new();
        let conn = open_with_stores(&backend, 1, &["projects"]).await;
        backend.fail_next_requests("projects", 1);
        backend.fail_next_commits("projects", 1);

        let tx = conn.transaction("projects", TxMode::ReadWrite).unwrap();
        assert!(matches!(
            tx.request(Request::Count).await,
            Err(EngineError::RequestFailed(_))
        ));
        tx.request(Request::Put(json!({"id": "p1"}))).await.unwrap();
        assert!(tx.commit().await.unwrap_err().is_abort());

        put(&conn, "projects", json!({"id": "p1"})).await;
        assert_eq!(backend.record_count("tracker", "projects"), Some(1));
    }
}
