//! trackstore repository
//!
//! The typed surface the dashboard talks to:
//! - [`Repository`]: `get_all_*`, `get_*`, `add_*`, `update_*`, `delete_*`
//!   for every collection, plus `init`, `clear` and `counts`
//! - Export, backup and restore as one JSON document
//! - CSV export of projects and collaborators
//! - Seeded sample data with rollback on failure
//!
//! # Example
//!
//! ```rust,ignore
//! use trackstore_repo::prelude::*;
//!
//! # async fn example() -> trackstore_core::Result<()> {
//! let repo = Repository::builder().build()?;
//! repo.init().await?;
//!
//! let generator = SampleDataGenerator::new(repo.clone());
//! generator.generate(42, SampleSize::default()).await?;
//!
//! let backup = repo.export_json().await?;
//! repo.restore_from_json(&backup).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod backup;
pub mod csv;
pub mod entities;
pub mod repository;
pub mod sample;

pub use backup::{ExportDocument, RestoreSummary, SnapshotKind, INVALID_BACKUP};
pub use csv::render_csv;
pub use entities::{
    Collaborator, CollaboratorKind, Entity, ErrorItem, Initiative, Objective, Project,
    ProjectStatus, SitRep, SmePartner, Spi, Team,
};
pub use repository::{Repository, RepositoryBuilder};
pub use sample::{SampleDataGenerator, SamplePlan, SampleSize};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the repository
    pub use crate::{
        Collaborator, Entity, ExportDocument, Project, Repository, SampleDataGenerator,
        SampleSize, SnapshotKind,
    };
    pub use trackstore_core::{Result, StorageError, StoreConfig};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
