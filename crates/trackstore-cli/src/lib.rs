//! trackstore admin commands
//!
//! Every command runs against a fresh in-memory store, so backups can be
//! produced and checked without touching a live database.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use trackstore_core::{StoreConfig, StoreName};
use trackstore_repo::{ExportDocument, Repository, SampleDataGenerator, SampleSize, SnapshotKind};
use tracing::info;

/// Load the store configuration, or the defaults when no file is given
///
/// # Errors
/// Unreadable or invalid configuration file
pub fn load_config(path: Option<&Path>) -> Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(StoreConfig::default()),
    }
}

async fn open_repository(config: StoreConfig) -> Result<Repository> {
    let repo = Repository::builder().config(config).build()?;
    repo.init().await?;
    Ok(repo)
}

async fn restore_file(config: StoreConfig, file: &Path) -> Result<Repository> {
    let json = fs::read_to_string(file)
        .with_context(|| format!("reading backup {}", file.display()))?;
    let document = ExportDocument::parse(&json)
        .with_context(|| format!("parsing backup {}", file.display()))?;

    let repo = open_repository(config).await?;
    let summary = repo.restore(&document).await?;
    info!(
        file = %file.display(),
        stores = summary.len(),
        records = document.record_count(),
        "Backup restored"
    );
    Ok(repo)
}

/// Generate sample data and write it as a backup file into `out_dir`
///
/// Returns the path of the written file.
///
/// # Errors
/// Generation failure or an unwritable output directory
pub async fn sample(config: StoreConfig, seed: u64, size: SampleSize, out_dir: &Path) -> Result<PathBuf> {
    let repo = open_repository(config).await?;
    let plan = SampleDataGenerator::new(repo.clone()).generate(seed, size).await?;
    let json = repo.export_json().await?;
    repo.close().await;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let path = out_dir.join(SnapshotKind::Backup.file_name(Utc::now()));
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;

    info!(seed, records = plan.record_count(), path = %path.display(), "Sample backup written");
    Ok(path)
}

/// Record counts of a restored backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Count per collection, in schema order
    pub counts: Vec<(StoreName, usize)>,
}

impl VerifyReport {
    /// Records across all collections
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, count)| count).sum()
    }

    /// Count for one collection
    #[must_use]
    pub fn count(&self, store: StoreName) -> usize {
        self.counts
            .iter()
            .find(|(name, _)| *name == store)
            .map_or(0, |(_, count)| *count)
    }

    /// `{ "<store>": count, ..., "total": n }`
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map: Map<String, Value> = self
            .counts
            .iter()
            .map(|(store, count)| (store.as_str().to_string(), Value::from(*count)))
            .collect();
        map.insert("total".into(), Value::from(self.total()));
        Value::Object(map)
    }

    /// One line per collection
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::from("Backup contents:\n");
        for (store, count) in &self.counts {
            let _ = writeln!(out, "  {store}: {count}");
        }
        let _ = writeln!(out, "  total: {}", self.total());
        out
    }
}

/// Restore a backup into a fresh store and count what landed
///
/// # Errors
/// Unreadable file, invalid backup, or a failed restore
pub async fn verify(config: StoreConfig, file: &Path) -> Result<VerifyReport> {
    let repo = restore_file(config, file).await?;
    let counts = repo.counts().await?;
    repo.close().await;
    Ok(VerifyReport { counts })
}

/// Restore a backup and render its projects and collaborators as CSV
///
/// Writes to `out` when given; the CSV is returned either way.
///
/// # Errors
/// Unreadable file, invalid backup, failed restore, or unwritable output
pub async fn csv(config: StoreConfig, file: &Path, out: Option<&Path>) -> Result<String> {
    let repo = restore_file(config, file).await?;
    let rendered = repo.export_csv().await?;
    repo.close().await;

    if let Some(out) = out {
        fs::write(out, &rendered).with_context(|| format!("writing {}", out.display()))?;
        info!(path = %out.display(), "CSV written");
    }
    Ok(rendered)
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
