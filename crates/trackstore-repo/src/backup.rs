//! Export, backup and restore
//!
//! An export is one JSON document holding every collection. Restore checks
//! the document shape before anything is cleared, then clears the database
//! and re-adds every record in order.

use crate::entities::{
    Collaborator, Entity, ErrorItem, Initiative, Objective, Project, SitRep, SmePartner, Spi, Team,
};
use crate::repository::Repository;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trackstore_core::{Notice, Result, StorageError, StoreName};

/// Message for documents that fail the shape check
pub const INVALID_BACKUP: &str = "Invalid backup file format";

/// Keys a plain export always carries
pub const EXPORT_KEYS: [&str; 6] = [
    "projects",
    "collaborators",
    "sitreps",
    "spis",
    "objectives",
    "smePartners",
];

/// Keys a backup must carry
pub const BACKUP_KEYS: [&str; 3] = ["projects", "collaborators", "timestamp"];

/// Snapshot of every collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    /// Projects
    pub projects: Vec<Project>,
    /// Collaborators
    pub collaborators: Vec<Collaborator>,
    /// Situation reports
    #[serde(default)]
    pub sitreps: Vec<SitRep>,
    /// Indicators
    #[serde(default)]
    pub spis: Vec<Spi>,
    /// Objectives
    #[serde(default)]
    pub objectives: Vec<Objective>,
    /// SME partners
    #[serde(default)]
    pub sme_partners: Vec<SmePartner>,
    /// Initiatives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiatives: Option<Vec<Initiative>>,
    /// Teams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teams: Option<Vec<Team>>,
    /// Recorded errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorItem>>,
    /// When the snapshot was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ExportDocument {
    /// Check the top-level shape, then decode
    ///
    /// # Errors
    /// [`StorageError::Validation`] with [`INVALID_BACKUP`] if required keys
    /// are missing or records do not decode
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|_| StorageError::Validation(INVALID_BACKUP.into()))?;
        Self::from_value(value)
    }

    /// Check the top-level shape of an already parsed document, then decode
    ///
    /// # Errors
    /// See [`parse`](Self::parse)
    pub fn from_value(value: Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(StorageError::Validation(INVALID_BACKUP.into()));
        };
        let has_all = |keys: &[&str]| keys.iter().all(|key| object.contains_key(*key));
        if !has_all(&BACKUP_KEYS) && !has_all(&EXPORT_KEYS) {
            return Err(StorageError::Validation(INVALID_BACKUP.into()));
        }
        serde_json::from_value(value)
            .map_err(|e| StorageError::Validation(format!("{INVALID_BACKUP}: {e}")))
    }

    /// Total number of records
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.projects.len()
            + self.collaborators.len()
            + self.sitreps.len()
            + self.spis.len()
            + self.objectives.len()
            + self.sme_partners.len()
            + self.initiatives.as_ref().map_or(0, Vec::len)
            + self.teams.as_ref().map_or(0, Vec::len)
            + self.errors.as_ref().map_or(0, Vec::len)
    }
}

/// Flavor of a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// User-requested export
    Export,
    /// Safety backup
    Backup,
}

impl SnapshotKind {
    /// File name for a snapshot taken at `at`, safe on every filesystem
    #[must_use]
    pub fn file_name(self, at: DateTime<Utc>) -> String {
        let kind = match self {
            Self::Export => "export",
            Self::Backup => "backup",
        };
        let stamp = at.to_rfc3339_opts(SecondsFormat::Millis, true).replace(':', "-");
        format!("database-{kind}-{stamp}.json")
    }
}

/// Records written per collection by a restore
pub type RestoreSummary = Vec<(StoreName, usize)>;

impl Repository {
    /// Read every collection into one document
    ///
    /// # Errors
    /// Transaction failure
    pub async fn export_data(&self) -> Result<ExportDocument> {
        Ok(ExportDocument {
            projects: self.get_all_projects().await?,
            collaborators: self.get_all_collaborators().await?,
            sitreps: self.get_all_sitreps().await?,
            spis: self.get_all_spis().await?,
            objectives: self.get_all_objectives().await?,
            sme_partners: self.get_all_sme_partners().await?,
            initiatives: Some(self.get_all_initiatives().await?),
            teams: Some(self.get_all_teams().await?),
            errors: Some(self.get_all_errors().await?),
            timestamp: Some(Utc::now()),
        })
    }

    /// Export every collection as pretty-printed JSON
    ///
    /// # Errors
    /// Transaction or encoding failure
    pub async fn export_json(&self) -> Result<String> {
        let document = self.export_data().await?;
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Replace the database contents with a backup document
    ///
    /// # Errors
    /// - [`StorageError::Validation`] before any change if the shape is wrong
    /// - clear or write failures
    pub async fn restore_from_json(&self, json: &str) -> Result<RestoreSummary> {
        let document = ExportDocument::parse(json)?;
        self.restore(&document).await
    }

    /// Clear the database and add every record of `document`
    ///
    /// Writes use the long transaction budget. A write failure after the
    /// clear raises an error notice recommending reload.
    ///
    /// # Errors
    /// Clear or write failures
    pub async fn restore(&self, document: &ExportDocument) -> Result<RestoreSummary> {
        tracing::info!(records = document.record_count(), "restoring backup");
        self.clear().await?;

        let mut summary = Vec::new();
        match self.restore_into(document, &mut summary).await {
            Ok(()) => {
                tracing::info!(collections = summary.len(), "backup restored");
                Ok(summary)
            }
            Err((store, error)) => {
                let written: usize = summary.iter().map(|(_, count)| count).sum();
                tracing::error!(
                    store = %store,
                    written,
                    expected = document.record_count(),
                    %error,
                    "restore failed after the database was cleared"
                );
                self.runtime().notifier().notify(Notice::error(
                    "Restore Failed",
                    format!(
                        "Restoring `{store}` failed after {written} records were written: {}. Please reload the page.",
                        error.message()
                    ),
                ));
                Err(error)
            }
        }
    }

    async fn restore_into(
        &self,
        document: &ExportDocument,
        summary: &mut RestoreSummary,
    ) -> std::result::Result<(), (StoreName, StorageError)> {
        self.restore_store(&document.projects, summary).await?;
        self.restore_store(&document.collaborators, summary).await?;
        self.restore_store(&document.sitreps, summary).await?;
        self.restore_store(&document.spis, summary).await?;
        self.restore_store(&document.objectives, summary).await?;
        self.restore_store(&document.sme_partners, summary).await?;
        if let Some(initiatives) = &document.initiatives {
            self.restore_store(initiatives, summary).await?;
        }
        if let Some(teams) = &document.teams {
            self.restore_store(teams, summary).await?;
        }
        if let Some(errors) = &document.errors {
            self.restore_store(errors, summary).await?;
        }
        Ok(())
    }

    async fn restore_store<E: Entity>(
        &self,
        records: &[E],
        summary: &mut RestoreSummary,
    ) -> std::result::Result<(), (StoreName, StorageError)> {
        match self.write_bulk(records).await {
            Ok(written) => {
                summary.push((E::STORE, written));
                Ok(())
            }
            Err((written, error)) => {
                summary.push((E::STORE, written));
                Err((E::STORE, error))
            }
        }
    }
}
