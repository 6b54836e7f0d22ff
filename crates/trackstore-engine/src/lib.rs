//! trackstore engine
//!
//! The embedded database underneath the tracker's storage layer. A backend
//! holds named databases, each with an integer schema version and a set of
//! object stores keyed by the string `id` of their records.
//!
//! # Semantics
//!
//! - Opening at a higher version runs an upgrade callback that may create or
//!   delete stores. The callback is atomic: if it fails nothing changes.
//! - Opening at a lower version than the stored one fails with
//!   [`EngineError::VersionError`].
//! - Upgrades and deletes notify every other open handle with a
//!   [`VersionChange`] event and fail with [`EngineError::Blocked`] while any
//!   handle stays open.
//! - A transaction spans a single store. Reads observe committed data plus the
//!   transaction's own staged writes; writes become visible on commit.
//!
//! [`MemoryBackend`] is the complete in-process implementation.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::{
    BackendConnection, BackendTransaction, Request, Response, SchemaUpgrade, StorageBackend,
    TxMode, UpgradeFn, VersionChange,
};
pub use error::EngineError;
pub use memory::MemoryBackend;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
