//! Repository facade
//!
//! Typed CRUD over every collection. Calls go straight to the executor when
//! the database is ready; before that they wait in the transaction queue
//! while initialization runs.

use crate::entities::{
    Collaborator, Entity, ErrorItem, Initiative, Objective, Project, SitRep, SmePartner, Spi, Team,
};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trackstore_core::{
    Connection, DatabaseLifecycle, Notice, Notifier, Result, StorageError, StoreConfig,
    StoreHandle, StoreName, StoreRuntime, TracingNotifier, TransactionExecutor, TxMode,
    DEFAULT_PRIORITY,
};
use trackstore_engine::{MemoryBackend, StorageBackend};

/// Typed access to the tracker collections
#[derive(Clone)]
pub struct Repository {
    runtime: StoreRuntime,
    background_started: Arc<AtomicBool>,
}

impl Repository {
    /// Wrap an already composed runtime
    #[must_use]
    pub fn new(runtime: StoreRuntime) -> Self {
        Self {
            runtime,
            background_started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start building a repository
    #[must_use]
    pub fn builder() -> RepositoryBuilder {
        RepositoryBuilder::default()
    }

    /// Services behind the facade
    #[inline]
    #[must_use]
    pub fn runtime(&self) -> &StoreRuntime {
        &self.runtime
    }

    #[inline]
    fn lifecycle(&self) -> &DatabaseLifecycle {
        self.runtime.lifecycle()
    }

    /// Open the database and start background maintenance
    ///
    /// # Errors
    /// [`StorageError::InitializationFailed`] if the database cannot be opened
    pub async fn init(&self) -> Result<()> {
        if !self.background_started.swap(true, Ordering::SeqCst) {
            self.runtime.start_background_tasks();
        }
        self.lifecycle().init().await
    }

    /// Delete every record in every collection
    ///
    /// # Errors
    /// See [`DatabaseLifecycle::clear_database`]
    pub async fn clear(&self) -> Result<()> {
        self.lifecycle().clear_database().await
    }

    /// Close all connections
    pub async fn close(&self) {
        self.lifecycle().close().await;
    }

    /// Record count per collection
    ///
    /// # Errors
    /// Transaction failure
    pub async fn counts(&self) -> Result<Vec<(StoreName, usize)>> {
        let mut counts = Vec::with_capacity(StoreName::ALL.len());
        for store in StoreName::ALL {
            let count = self
                .run(store, TxMode::ReadOnly, |handle| async move { handle.count().await })
                .await?;
            counts.push((store, count));
        }
        Ok(counts)
    }

    /// Every record of a collection, ordered by id
    ///
    /// # Errors
    /// Transaction failure or a stored record that does not decode
    pub async fn get_all<E: Entity>(&self) -> Result<Vec<E>> {
        self.run(E::STORE, TxMode::ReadOnly, |handle| async move {
            handle.get_all_as::<E>().await
        })
        .await
    }

    /// One record, if present
    ///
    /// # Errors
    /// Transaction failure or a stored record that does not decode
    pub async fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let id = id.to_string();
        self.run(E::STORE, TxMode::ReadOnly, move |handle| {
            let id = id.clone();
            async move { handle.get_as::<E>(&id).await }
        })
        .await
    }

    /// Insert or replace a record, returning its id
    ///
    /// # Errors
    /// - [`StorageError::Validation`] if the id is empty
    /// - transaction failure
    pub async fn add<E: Entity>(&self, record: &E) -> Result<String> {
        if record.id().trim().is_empty() {
            return Err(StorageError::Validation(format!("{} id must not be empty", E::KIND)));
        }
        let value = serde_json::to_value(record)?;
        self.run(E::STORE, TxMode::ReadWrite, move |handle| {
            let value = value.clone();
            async move { handle.put(value).await }
        })
        .await
    }

    /// Merge `patch` into an existing record and store the result
    ///
    /// The `id` field of the patch is ignored. The merged record must still
    /// decode as `E`.
    ///
    /// # Errors
    /// - [`StorageError::NotFound`] if no record has this id (nothing is written)
    /// - [`StorageError::Validation`] if the patch is not an object or the
    ///   merged record is invalid
    pub async fn update<E: Entity>(&self, id: &str, patch: Value) -> Result<E> {
        let Value::Object(patch) = patch else {
            return Err(StorageError::Validation(format!(
                "{} update must be a JSON object",
                E::KIND
            )));
        };
        let id = id.to_string();
        self.run(E::STORE, TxMode::ReadWrite, move |handle| {
            let id = id.clone();
            let patch = patch.clone();
            async move { merge_and_put::<E>(&handle, &id, patch).await }
        })
        .await
    }

    /// Remove a record; missing ids are not an error
    ///
    /// # Errors
    /// Transaction failure
    pub async fn delete<E: Entity>(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run(E::STORE, TxMode::ReadWrite, move |handle| {
            let id = id.clone();
            async move { handle.delete(&id).await }
        })
        .await
    }

    /// Insert or replace many records with the long transaction budget
    ///
    /// Records are written one transaction each, in order; returns how many
    /// were written.
    ///
    /// # Errors
    /// The first failing write; earlier records stay written
    pub async fn add_bulk<E: Entity>(&self, records: &[E]) -> Result<usize> {
        self.write_bulk(records).await.map_err(|(_, error)| {
            self.report(&error);
            error
        })
    }

    /// Write `records` in order without raising notices; on failure returns
    /// how many were written before it
    pub(crate) async fn write_bulk<E: Entity>(
        &self,
        records: &[E],
    ) -> std::result::Result<usize, (usize, StorageError)> {
        for (written, record) in records.iter().enumerate() {
            self.put_long(record).await.map_err(|error| (written, error))?;
        }
        Ok(records.len())
    }

    /// Upsert one record with the long transaction budget, raising a notice
    /// on failure
    pub(crate) async fn add_long<E: Entity>(&self, record: &E) -> Result<String> {
        let outcome = self.put_long(record).await;
        if let Err(error) = &outcome {
            self.report(error);
        }
        outcome
    }

    async fn put_long<E: Entity>(&self, record: &E) -> Result<String> {
        if record.id().trim().is_empty() {
            return Err(StorageError::Validation(format!("{} id must not be empty", E::KIND)));
        }
        let value = serde_json::to_value(record)?;
        self.execute(E::STORE, TxMode::ReadWrite, Budget::Long, move |handle| {
            let value = value.clone();
            async move { handle.put(value).await }
        })
        .await
    }

    /// Raise a notice for a failure the queue or lifecycle did not report
    pub(crate) fn report(&self, error: &StorageError) {
        if matches!(
            error,
            StorageError::RetriesExhausted { .. }
                | StorageError::InitializationFailed { .. }
                | StorageError::QueueCleared
        ) {
            return;
        }
        tracing::warn!(category = ?error.category(), %error, "repository operation failed");
        self.runtime.notifier().notify(Notice::from_error(error));
    }

    /// Run a single-store operation, raising a notice on failure
    async fn run<T, F, Fut>(&self, store: StoreName, mode: TxMode, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(StoreHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let outcome = self.execute(store, mode, Budget::Standard, op).await;
        if let Err(error) = &outcome {
            self.report(error);
        }
        outcome
    }

    /// Run a single-store operation, queueing it until the database is ready
    async fn execute<T, F, Fut>(&self, store: StoreName, mode: TxMode, budget: Budget, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(StoreHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.lifecycle().connection().await {
            Ok(conn) => budget.execute(*self.runtime.executor(), &conn, store, mode, op).await,
            Err(StorageError::NotInitialized) => self.run_queued(store, mode, budget, op).await,
            Err(error) => Err(error),
        }
    }

    async fn run_queued<T, F, Fut>(&self, store: StoreName, mode: TxMode, budget: Budget, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(StoreHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        tracing::debug!(store = %store, %mode, "database not ready, queueing");
        let lifecycle = self.lifecycle().clone();
        let executor: TransactionExecutor = *self.runtime.executor();
        let op = Arc::new(op);

        // Only retryable failures go back through the queue; anything else is
        // handed to the caller as the value of a successful attempt.
        let pending = self.runtime.queue().submit(DEFAULT_PRIORITY, move || {
            let lifecycle = lifecycle.clone();
            let op = Arc::clone(&op);
            async move {
                let conn = lifecycle.connection().await?;
                match budget
                    .execute(executor, &conn, store, mode, |handle| (*op)(handle))
                    .await
                {
                    Err(error) if !error.is_retryable() => Ok(Err(error)),
                    other => other.map(Ok),
                }
            }
        });

        // A failed init resolves every queued ticket with its error.
        self.init().await?;
        pending.await.and_then(|outcome| outcome)
    }
}

/// Timeout budget for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Budget {
    Standard,
    Long,
}

impl Budget {
    async fn execute<T, F, Fut>(
        self,
        executor: TransactionExecutor,
        conn: &Connection,
        store: StoreName,
        mode: TxMode,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(StoreHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self {
            Self::Standard => executor.execute(conn, store, mode, op).await,
            Self::Long => executor.execute_long(conn, store, mode, op).await,
        }
    }
}

async fn merge_and_put<E: Entity>(handle: &StoreHandle, id: &str, patch: Map<String, Value>) -> Result<E> {
    let mut record = match handle.get(id).await? {
        Some(Value::Object(record)) => record,
        Some(_) => {
            return Err(StorageError::Serialization(format!(
                "stored {} `{id}` is not an object",
                E::KIND
            )))
        }
        None => return Err(StorageError::not_found(E::STORE, id)),
    };

    for (field, value) in patch {
        if field != "id" {
            record.insert(field, value);
        }
    }

    let merged: E = serde_json::from_value(Value::Object(record))
        .map_err(|e| StorageError::Validation(format!("invalid {}: {e}", E::KIND)))?;
    handle.put_record(&merged).await?;
    Ok(merged)
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Repository`]
#[derive(Default)]
pub struct RepositoryBuilder {
    config: Option<StoreConfig>,
    backend: Option<Arc<dyn StorageBackend>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl RepositoryBuilder {
    /// With configuration (default: [`StoreConfig::default`])
    #[inline]
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// With backend (default: a fresh [`MemoryBackend`])
    #[inline]
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// With notice sink (default: [`TracingNotifier`])
    #[inline]
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Compose the services
    ///
    /// # Errors
    /// [`StorageError::Config`] if the configuration is invalid
    pub fn build(self) -> Result<Repository> {
        let runtime = StoreRuntime::new(
            self.config.unwrap_or_default(),
            self.backend.unwrap_or_else(|| Arc::new(MemoryBackend::new())),
            self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier)),
        )?;
        Ok(Repository::new(runtime))
    }
}

macro_rules! entity_methods {
    ($($entity:ty => $get_all:ident, $get:ident, $add:ident, $update:ident, $delete:ident;)*) => {
        impl Repository {
            $(
                #[doc = concat!("Every `", stringify!($entity), "`")]
                ///
                /// # Errors
                /// Transaction failure
                pub async fn $get_all(&self) -> Result<Vec<$entity>> {
                    self.get_all::<$entity>().await
                }

                #[doc = concat!("One `", stringify!($entity), "` by id")]
                ///
                /// # Errors
                /// Transaction failure
                pub async fn $get(&self, id: &str) -> Result<Option<$entity>> {
                    self.get::<$entity>(id).await
                }

                #[doc = concat!("Insert or replace a `", stringify!($entity), "`")]
                ///
                /// # Errors
                /// Empty id or transaction failure
                pub async fn $add(&self, record: &$entity) -> Result<String> {
                    self.add(record).await
                }

                #[doc = concat!("Patch an existing `", stringify!($entity), "`")]
                ///
                /// # Errors
                /// [`StorageError::NotFound`] if missing, or an invalid patch
                pub async fn $update(&self, id: &str, patch: Value) -> Result<$entity> {
                    self.update::<$entity>(id, patch).await
                }

                #[doc = concat!("Remove a `", stringify!($entity), "`")]
                ///
                /// # Errors
                /// Transaction failure
                pub async fn $delete(&self, id: &str) -> Result<()> {
                    self.delete::<$entity>(id).await
                }
            )*
        }
    };
}

entity_methods! {
    Project => get_all_projects, get_project, add_project, update_project, delete_project;
    Collaborator => get_all_collaborators, get_collaborator, add_collaborator, update_collaborator, delete_collaborator;
    SmePartner => get_all_sme_partners, get_sme_partner, add_sme_partner, update_sme_partner, delete_sme_partner;
    SitRep => get_all_sitreps, get_sitrep, add_sitrep, update_sitrep, delete_sitrep;
    Spi => get_all_spis, get_spi, add_spi, update_spi, delete_spi;
    Objective => get_all_objectives, get_objective, add_objective, update_objective, delete_objective;
    Initiative => get_all_initiatives, get_initiative, add_initiative, update_initiative, delete_initiative;
    ErrorItem => get_all_errors, get_error, add_error, update_error, delete_error;
    Team => get_all_teams, get_team, add_team, update_team, delete_team;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trackstore_core::NoticeBuffer;

    fn repository() -> Repository {
        Repository::builder()
            .config(StoreConfig::default().with_database_name("repo-unit"))
            .notifier(Arc::new(NoticeBuffer::new()))
            .build()
            .unwrap()
    }

    fn team(id: &str, name: &str) -> Team {
        Team {
            id: id.into(),
            name: name.into(),
            lead_id: None,
            member_ids: vec![],
        }
    }

    #[tokio::test]
    async fn first_call_initializes_through_the_queue() {
        let repo = repository();
        assert!(!repo.runtime().lifecycle().is_initialized());

        repo.add_team(&team("t1", "Platform")).await.unwrap();

        assert!(repo.runtime().lifecycle().is_initialized());
        assert_eq!(repo.runtime().queue().stats().completed, 1);
        assert_eq!(repo.get_team("t1").await.unwrap().unwrap().name, "Platform");
    }

    #[tokio::test]
    async fn queued_not_found_is_not_retried() {
        let repo = repository();
        let err = repo.update_team("nope", json!({"name": "x"})).await.unwrap_err();

        assert!(matches!(err, StorageError::NotFound { .. }));
        assert_eq!(repo.runtime().queue().stats().retried, 0);
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let repo = repository();
        let err = repo.add_team(&team("  ", "Blank")).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[tokio::test]
    async fn patch_must_be_an_object() {
        let repo = repository();
        repo.init().await.unwrap();
        repo.add_team(&team("t1", "Platform")).await.unwrap();

        let err = repo.update_team("t1", json!(["name"])).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[tokio::test]
    async fn patch_cannot_change_id_or_break_the_record() {
        let repo = repository();
        repo.init().await.unwrap();
        repo.add_team(&team("t1", "Platform")).await.unwrap();

        let updated = repo
            .update_team("t1", json!({"id": "t2", "name": "Infra"}))
            .await
            .unwrap();
        assert_eq!(updated.id, "t1");
        assert_eq!(updated.name, "Infra");
        assert!(repo.get_team("t2").await.unwrap().is_none());

        let err = repo.update_team("t1", json!({"memberIds": 5})).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert_eq!(repo.get_team("t1").await.unwrap().unwrap().name, "Infra");
    }

    #[tokio::test]
    async fn counts_cover_every_collection() {
        let repo = repository();
        repo.add_team(&team("t1", "Platform")).await.unwrap();

        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.len(), StoreName::ALL.len());
        assert!(counts.contains(&(StoreName::Teams, 1)));
        assert!(counts.contains(&(StoreName::Projects, 0)));
    }
}
