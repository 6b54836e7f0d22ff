//! trackstore core
//!
//! The storage transaction layer of the tracker:
//! - Connection manager and bounded connection pool
//! - Timeout-bounded single-store transactions
//! - A priority queue for work submitted before the database is ready,
//!   with bounded retry
//! - Database lifecycle: init, upgrade, clear with blocked-delete retry
//! - LIFO rollback for multi-step operations
//!
//! # Example
//!
//! ```rust,ignore
//! use trackstore_core::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let runtime = StoreRuntime::in_memory(StoreConfig::new())?;
//! runtime.lifecycle().init().await?;
//!
//! let conn = runtime.lifecycle().connection().await?;
//! let count = runtime
//!     .executor()
//!     .execute(&conn, StoreName::Projects, TxMode::ReadOnly, |store| async move {
//!         store.count().await
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod notify;
pub mod pool;
pub mod queue;
pub mod rollback;
pub mod runtime;
pub mod schema;

pub use config::StoreConfig;
pub use connection::{Connection, ConnectionId, ConnectionManager, ConnectionState};
pub use error::{ErrorCategory, FailureOrigin, Result, StorageError};
pub use executor::{StoreHandle, TransactionExecutor};
pub use lifecycle::{apply_schema, DatabaseLifecycle, LifecycleState, ResetHook};
pub use notify::{Notice, NoticeBuffer, NoticeLevel, Notifier, TracingNotifier};
pub use pool::{ConnectionPool, PoolStats};
pub use queue::{QueueStats, QueueTicket, QueuedOperation, TransactionQueue, DEFAULT_PRIORITY};
pub use rollback::{RollbackManager, RollbackReport, UndoAction};
pub use runtime::StoreRuntime;
pub use schema::StoreName;
pub use trackstore_engine::TxMode;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with trackstore core
    pub use crate::{
        DatabaseLifecycle, Notice, Notifier, Result, RollbackManager, StorageError, StoreConfig,
        StoreHandle, StoreName, StoreRuntime, TransactionExecutor, TransactionQueue, TxMode,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
