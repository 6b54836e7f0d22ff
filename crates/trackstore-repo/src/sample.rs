//! Sample data generation
//!
//! Builds a reproducible data set from a seed and persists it step by step:
//! partners, projects, SPIs, objectives, sitreps, then collaborators. Every
//! persisted record registers its own delete with the rollback manager, so a
//! failure part-way leaves the database as it was.

use crate::entities::{
    Collaborator, CollaboratorKind, Entity, Objective, Project, ProjectStatus, SitRep, SmePartner,
    Spi,
};
use crate::repository::Repository;
use chrono::{Duration, NaiveDate, Utc};
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trackstore_core::{Result, StorageError};

const PARTNER_NAMES: &[&str] = &[
    "Northwind Analytics",
    "Bluebird Robotics",
    "Cedar Labs",
    "Harbor Systems",
    "Quartz Materials",
    "Summit Bio",
];
const INDUSTRIES: &[&str] = &["Manufacturing", "Healthcare", "Energy", "Logistics", "Software"];
const CAPABILITIES: &[&str] = &["Prototyping", "Data Science", "Field Testing", "Supply Chain", "Compliance"];
const PROJECT_TOPICS: &[&str] = &[
    "Predictive Maintenance",
    "Cold Chain Monitoring",
    "Clinical Data Pipeline",
    "Grid Forecasting",
    "Warehouse Automation",
    "Materials Testing",
];
const SPI_NAMES: &[(&str, &str)] = &[
    ("Milestones Met", "%"),
    ("Cost Savings", "USD"),
    ("Pilot Sites", "sites"),
    ("Defect Rate", "%"),
];
const SITREP_STATUS: &[&str] = &["green", "yellow", "red"];
const FIRST_NAMES: &[&str] = &["Ada", "Grace", "Alan", "Katherine", "Edsger", "Barbara", "Linus"];
const LAST_NAMES: &[&str] = &["Lovelace", "Hopper", "Turing", "Johnson", "Dijkstra", "Liskov", "Torvalds"];
const ROLES: &[&str] = &["Program Lead", "Engineer", "Analyst", "Sponsor"];

/// How many records to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSize {
    /// SME partners
    pub partners: usize,
    /// Projects
    pub projects: usize,
    /// SPIs per project
    pub spis_per_project: usize,
    /// Objectives per SPI
    pub objectives_per_spi: usize,
    /// Sitreps per project
    pub sitreps_per_project: usize,
    /// Collaborators
    pub collaborators: usize,
}

impl Default for SampleSize {
    fn default() -> Self {
        Self {
            partners: 4,
            projects: 6,
            spis_per_project: 2,
            objectives_per_spi: 2,
            sitreps_per_project: 3,
            collaborators: 8,
        }
    }
}

/// Records generated for one run
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePlan {
    /// SME partners
    pub partners: Vec<SmePartner>,
    /// Projects
    pub projects: Vec<Project>,
    /// SPIs
    pub spis: Vec<Spi>,
    /// Objectives
    pub objectives: Vec<Objective>,
    /// Sitreps
    pub sitreps: Vec<SitRep>,
    /// Collaborators
    pub collaborators: Vec<Collaborator>,
}

fn pick<'a>(rng: &mut StdRng, items: &[&'a str]) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

fn next_id(rng: &mut StdRng) -> String {
    uuid::Builder::from_random_bytes(rng.random()).into_uuid().to_string()
}

impl SamplePlan {
    /// Generate records from a seed; the same seed gives the same records
    #[must_use]
    pub fn generate(seed: u64, size: SampleSize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();
        let now = Utc::now();

        let partners: Vec<SmePartner> = (0..size.partners)
            .map(|i| {
                let name = PARTNER_NAMES[i % PARTNER_NAMES.len()];
                SmePartner {
                    id: next_id(&mut rng),
                    name: name.to_string(),
                    industry: pick(&mut rng, INDUSTRIES).to_string(),
                    contact_email: format!(
                        "contact@{}.example.com",
                        name.to_lowercase().replace(' ', "-")
                    ),
                    capabilities: CAPABILITIES
                        .choose_multiple(&mut rng, 2)
                        .map(|c| (*c).to_string())
                        .collect(),
                }
            })
            .collect();

        let mut collaborators: Vec<Collaborator> = (0..size.collaborators)
            .map(|_| {
                let first = pick(&mut rng, FIRST_NAMES);
                let last = pick(&mut rng, LAST_NAMES);
                let kind = match rng.random_range(0..3) {
                    0 => CollaboratorKind::Fortune30,
                    1 => CollaboratorKind::Sme,
                    _ => CollaboratorKind::Internal,
                };
                Collaborator {
                    id: next_id(&mut rng),
                    name: format!("{first} {last}"),
                    email: format!("{}.{}@example.com", first.to_lowercase(), last.to_lowercase()),
                    role: pick(&mut rng, ROLES).to_string(),
                    kind,
                    project_ids: Vec::new(),
                }
            })
            .collect();

        let statuses = [
            ProjectStatus::Planned,
            ProjectStatus::Active,
            ProjectStatus::Active,
            ProjectStatus::OnHold,
            ProjectStatus::Completed,
        ];
        let mut projects = Vec::with_capacity(size.projects);
        for i in 0..size.projects {
            let id = next_id(&mut rng);
            let start = base + Duration::days(rng.random_range(0..180));
            let team: Vec<usize> = (0..collaborators.len())
                .filter(|_| rng.random_bool(0.4))
                .collect();
            for &member in &team {
                collaborators[member].project_ids.push(id.clone());
            }
            projects.push(Project {
                title: format!("{} {}", PROJECT_TOPICS[i % PROJECT_TOPICS.len()], i + 1),
                description: "Generated sample project".to_string(),
                status: statuses.choose(&mut rng).copied().unwrap_or_default(),
                partner_id: partners.choose(&mut rng).map(|p| p.id.clone()),
                start_date: Some(start),
                end_date: Some(start + Duration::days(rng.random_range(90..365))),
                budget: Some(f64::from(rng.random_range(50u32..500) * 1000)),
                collaborator_ids: team.iter().map(|&m| collaborators[m].id.clone()).collect(),
                created_at: now,
                id,
            });
        }

        let mut spis = Vec::new();
        for project in &projects {
            for (name, unit) in SPI_NAMES.iter().cycle().take(size.spis_per_project) {
                let target = f64::from(rng.random_range(10u32..100));
                spis.push(Spi {
                    id: next_id(&mut rng),
                    project_id: project.id.clone(),
                    name: (*name).to_string(),
                    target,
                    actual: (target * rng.random_range(0.2..1.1) * 10.0).round() / 10.0,
                    unit: (*unit).to_string(),
                });
            }
        }

        let mut objectives = Vec::new();
        for spi in &spis {
            for n in 0..size.objectives_per_spi {
                objectives.push(Objective {
                    id: next_id(&mut rng),
                    spi_id: spi.id.clone(),
                    title: format!("Improve {} ({})", spi.name, n + 1),
                    description: format!("Move {} toward {} {}", spi.name, spi.target, spi.unit),
                    due_date: Some(base + Duration::days(rng.random_range(60..400))),
                    completed: rng.random_bool(0.3),
                });
            }
        }

        let mut sitreps = Vec::new();
        for project in &projects {
            for week in 0..size.sitreps_per_project {
                let offset = i64::try_from(week).unwrap_or(0) * 7;
                sitreps.push(SitRep {
                    id: next_id(&mut rng),
                    project_id: project.id.clone(),
                    title: format!("Week {} update", week + 1),
                    summary: format!("Status report for {}", project.title),
                    status: pick(&mut rng, SITREP_STATUS).to_string(),
                    date: project.start_date.unwrap_or(base) + Duration::days(offset),
                });
            }
        }

        Self {
            partners,
            projects,
            spis,
            objectives,
            sitreps,
            collaborators,
        }
    }

    /// Total number of records
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.partners.len()
            + self.projects.len()
            + self.spis.len()
            + self.objectives.len()
            + self.sitreps.len()
            + self.collaborators.len()
    }
}

/// Persists sample data with rollback on failure
#[derive(Debug, Clone)]
pub struct SampleDataGenerator {
    repository: Repository,
    seeded: Arc<AtomicBool>,
}

impl SampleDataGenerator {
    /// Create a generator; a database clear re-enables generation
    #[must_use]
    pub fn new(repository: Repository) -> Self {
        let seeded = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seeded);
        repository.runtime().lifecycle().on_reset(move || {
            flag.store(false, Ordering::SeqCst);
        });
        Self { repository, seeded }
    }

    /// Check if sample data was generated since the last clear
    #[must_use]
    pub fn is_seeded(&self) -> bool {
        self.seeded.load(Ordering::SeqCst)
    }

    /// Generate and persist a data set
    ///
    /// # Errors
    /// - [`StorageError::Validation`] if sample data already exists
    /// - the first persistence failure, after every earlier step was undone
    pub async fn generate(&self, seed: u64, size: SampleSize) -> Result<SamplePlan> {
        if self.seeded.swap(true, Ordering::SeqCst) {
            return Err(StorageError::Validation(
                "Sample data already generated; clear the database first".into(),
            ));
        }

        let plan = SamplePlan::generate(seed, size);
        tracing::info!(seed, records = plan.record_count(), "generating sample data");

        let rollback = self.repository.runtime().rollback();
        let outcome = rollback
            .execute_with_rollback(async {
                self.persist_all(&plan.partners).await?;
                self.persist_all(&plan.projects).await?;
                self.persist_all(&plan.spis).await?;
                self.persist_all(&plan.objectives).await?;
                self.persist_all(&plan.sitreps).await?;
                self.persist_all(&plan.collaborators).await?;
                Ok(())
            })
            .await;

        match outcome {
            Ok(()) => {
                tracing::info!(seed, "sample data generated");
                Ok(plan)
            }
            Err(error) => {
                self.seeded.store(false, Ordering::SeqCst);
                tracing::error!(seed, %error, "sample data generation failed");
                Err(error)
            }
        }
    }

    async fn persist_all<E: Entity>(&self, records: &[E]) -> Result<()> {
        let rollback = self.repository.runtime().rollback();
        for record in records {
            self.repository.add_long(record).await?;

            let repository = self.repository.clone();
            let id = record.id().to_string();
            rollback.add_rollback_operation(
                format!("{} {id}", E::KIND),
                Box::new(move || async move { repository.delete::<E>(&id).await }.boxed()),
            );
        }
        Ok(())
    }
}
