//! End-to-end flows through the storage services
//!
//! Run with: cargo test --package trackstore-core --test storage_flow

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use trackstore_core::prelude::*;
use trackstore_core::{
    apply_schema, ConnectionManager, ConnectionPool, NoticeBuffer, StorageError,
    DEFAULT_PRIORITY,
};
use trackstore_engine::{EngineError, MemoryBackend, SchemaUpgrade, StorageBackend};

fn runtime_over(backend: &MemoryBackend, notices: &Arc<NoticeBuffer>) -> StoreRuntime {
    let config = StoreConfig::new()
        .with_database_name("flow")
        .with_connection_timeout(Duration::ZERO)
        .with_retry_policy(3, Duration::from_millis(5))
        .with_init_policy(2, Duration::from_millis(5))
        .with_delete_policy(2, Duration::from_millis(5));
    StoreRuntime::new(
        config,
        Arc::new(backend.clone()),
        Arc::clone(notices) as Arc<dyn Notifier>,
    )
    .expect("valid config")
}

#[tokio::test]
async fn queued_work_runs_once_initialized() {
    let backend = MemoryBackend::new();
    let notices = Arc::new(NoticeBuffer::new());
    let runtime = runtime_over(&backend, &notices);

    let lifecycle = runtime.lifecycle().clone();
    let executor = *runtime.executor();
    let pending = runtime.queue().submit(DEFAULT_PRIORITY, move || {
        let lifecycle = lifecycle.clone();
        async move {
            let conn = lifecycle.connection().await?;
            executor
                .execute(&conn, StoreName::Projects, TxMode::ReadWrite, |store| async move {
                    store.put(json!({"id": "p1", "title": "Queued"})).await
                })
                .await
        }
    });

    runtime.lifecycle().init().await.expect("init");
    let key = pending.await.expect("queued put");

    assert_eq!(key, "p1");
    assert_eq!(backend.record_count("flow", "projects"), Some(1));
    assert_eq!(runtime.queue().stats().completed, 1);
}

#[tokio::test]
async fn foreign_upgrade_closes_connection_and_lifecycle_recovers() {
    let backend = MemoryBackend::new();
    let notices = Arc::new(NoticeBuffer::new());
    let runtime = runtime_over(&backend, &notices);
    runtime.lifecycle().init().await.expect("init");
    let before = runtime.lifecycle().connection().await.expect("connection");

    // Another window opens at version 2: blocked at first, which makes the
    // manager close our handle, then succeeds.
    let mut upgrade = |u: &mut dyn SchemaUpgrade| -> std::result::Result<(), EngineError> { apply_schema(u, false) };
    let first = backend.open("flow", 2, &mut upgrade).await;
    assert!(matches!(first, Err(EngineError::Blocked { .. })));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(before.is_closed());
    assert_eq!(notices.drain()[0].title, "Database Updated");

    let other = backend.open("flow", 2, &mut upgrade).await.expect("foreign upgrade");
    other.close();

    let after = runtime.lifecycle().connection().await.expect("reacquired");
    assert_eq!(after.version(), 2);
    assert_eq!(runtime.lifecycle().version(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_capacity_holds_under_concurrency() {
    let backend = MemoryBackend::new();
    let notifier: Arc<dyn Notifier> = Arc::new(NoticeBuffer::new());
    let manager = Arc::new(ConnectionManager::new(Arc::new(backend.clone()), notifier));
    let pool = ConnectionPool::new(manager, 3, Duration::ZERO);

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut upgrade =
                    |u: &mut dyn SchemaUpgrade| -> std::result::Result<(), EngineError> { apply_schema(u, false) };
                pool.acquire_connection(&format!("db-{i}"), 1, &mut upgrade).await
            })
        })
        .collect();

    let mut opened = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.expect("task") {
            Ok(_) => opened += 1,
            Err(StorageError::CapacityExceeded { max: 3 }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
        assert!(pool.size() <= 3);
    }

    assert_eq!(opened, 3);
    assert_eq!(rejected, 13);
    assert_eq!(pool.stats().active, 3);
}

#[tokio::test]
async fn clear_leaves_empty_stores_that_accept_writes() {
    let backend = MemoryBackend::new();
    let notices = Arc::new(NoticeBuffer::new());
    let runtime = runtime_over(&backend, &notices);
    runtime.lifecycle().init().await.expect("init");

    let conn = runtime.lifecycle().connection().await.expect("connection");
    for store in StoreName::ALL {
        runtime
            .executor()
            .execute(&conn, store, TxMode::ReadWrite, |handle| async move {
                handle.put(json!({"id": "x"})).await
            })
            .await
            .expect("seed");
    }

    let version = runtime.lifecycle().version();
    runtime.lifecycle().clear_database().await.expect("clear");
    assert!(runtime.lifecycle().version() > version);

    let conn = runtime.lifecycle().connection().await.expect("connection");
    for store in StoreName::ALL {
        let count = runtime
            .executor()
            .execute(&conn, store, TxMode::ReadOnly, |handle| async move { handle.count().await })
            .await
            .expect("count");
        assert_eq!(count, 0, "{store} not empty");
    }

    runtime
        .executor()
        .execute(&conn, StoreName::Teams, TxMode::ReadWrite, |handle| async move {
            handle.put(json!({"id": "t1"})).await
        })
        .await
        .expect("write after clear");
    assert_eq!(backend.database_version("flow").await, Some(version + 1));
}
