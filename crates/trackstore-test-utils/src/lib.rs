//! Testing utilities for the trackstore workspace
//!
//! Shared fixtures: fast configurations, repositories over an inspectable
//! in-memory backend, and sample records.

#![allow(missing_docs)]

use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use trackstore_core::{NoticeBuffer, Notifier, StoreConfig};
use trackstore_engine::MemoryBackend;
use trackstore_repo::{
    Collaborator, CollaboratorKind, ErrorItem, Initiative, Project, ProjectStatus, Repository, SitRep,
    SmePartner, Spi, Team,
};

/// Configuration with millisecond retry delays so failure paths finish fast
pub fn fast_config(name: &str) -> StoreConfig {
    StoreConfig::new()
        .with_database_name(name)
        .with_retry_policy(3, Duration::from_millis(5))
        .with_init_policy(3, Duration::from_millis(5))
        .with_delete_policy(3, Duration::from_millis(5))
}

/// A repository plus handles to inspect what it did
pub struct TestRepository {
    pub repo: Repository,
    pub backend: MemoryBackend,
    pub notices: Arc<NoticeBuffer>,
}

impl TestRepository {
    pub fn new(name: &str) -> Self {
        Self::with_config(fast_config(name))
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let backend = MemoryBackend::new();
        let notices = Arc::new(NoticeBuffer::new());
        let repo = Repository::builder()
            .config(config)
            .backend(Arc::new(backend.clone()))
            .notifier(Arc::clone(&notices) as Arc<dyn Notifier>)
            .build()
            .unwrap();
        Self {
            repo,
            backend,
            notices,
        }
    }

    /// Another repository over the same backend and configuration, like a
    /// second browser tab
    pub fn second_tab(&self) -> Self {
        let notices = Arc::new(NoticeBuffer::new());
        let repo = Repository::builder()
            .config(self.repo.runtime().config().clone())
            .backend(Arc::new(self.backend.clone()))
            .notifier(Arc::clone(&notices) as Arc<dyn Notifier>)
            .build()
            .unwrap();
        Self {
            repo,
            backend: self.backend.clone(),
            notices,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.repo.runtime().config().database_name
    }

    pub fn stored(&self, store: &str) -> usize {
        self.backend
            .record_count(self.database_name(), store)
            .unwrap_or(0)
    }
}

pub fn sample_project(id: &str, title: &str) -> Project {
    Project {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{title} description"),
        status: ProjectStatus::Active,
        partner_id: Some("sme-1".to_string()),
        start_date: NaiveDate::from_ymd_opt(2024, 3, 1),
        end_date: NaiveDate::from_ymd_opt(2024, 12, 31),
        budget: Some(125_000.0),
        collaborator_ids: vec!["c-1".to_string()],
        created_at: Utc.with_ymd_and_hms(2024, 2, 20, 9, 0, 0).unwrap(),
    }
}

pub fn sample_collaborator(id: &str, name: &str) -> Collaborator {
    Collaborator {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        role: "Engineer".to_string(),
        kind: CollaboratorKind::Sme,
        project_ids: vec!["p-1".to_string()],
    }
}

pub fn sample_partner(id: &str) -> SmePartner {
    SmePartner {
        id: id.to_string(),
        name: "Cedar Labs".to_string(),
        industry: "Energy".to_string(),
        contact_email: "hello@cedar.example.com".to_string(),
        capabilities: vec!["Prototyping".to_string()],
    }
}

pub fn sample_sitrep(id: &str, project_id: &str) -> SitRep {
    SitRep {
        id: id.to_string(),
        project_id: project_id.to_string(),
        title: "Week 1 update".to_string(),
        summary: "On track".to_string(),
        status: "green".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
    }
}

pub fn sample_spi(id: &str, project_id: &str) -> Spi {
    Spi {
        id: id.to_string(),
        project_id: project_id.to_string(),
        name: "Milestones Met".to_string(),
        target: 90.0,
        actual: 42.5,
        unit: "%".to_string(),
    }
}

pub fn sample_team(id: &str) -> Team {
    Team {
        id: id.to_string(),
        name: "Platform".to_string(),
        lead_id: Some("c-1".to_string()),
        member_ids: vec!["c-1".to_string(), "c-2".to_string()],
    }
}

pub fn sample_error(id: &str) -> ErrorItem {
    ErrorItem {
        id: id.to_string(),
        message: "Failed to load chart".to_string(),
        context: "dashboard".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 4, 2, 15, 30, 0).unwrap(),
        resolved: false,
    }
}

pub fn sample_initiative(id: &str, project_ids: &[&str]) -> Initiative {
    Initiative {
        id: id.to_string(),
        name: "Supplier Diversity".to_string(),
        description: "Grow small-business participation".to_string(),
        project_ids: project_ids.iter().map(|p| (*p).to_string()).collect(),
    }
}
