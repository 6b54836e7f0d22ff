//! Tracker records
//!
//! One type per collection. Field names are camelCase on the wire so
//! exported documents match what the dashboard reads and writes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trackstore_core::StoreName;

/// A record stored in one collection, keyed by `id`
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection holding this record type
    const STORE: StoreName;

    /// Human-readable type name for messages
    const KIND: &'static str;

    /// Record key
    fn id(&self) -> &str;
}

macro_rules! impl_entity {
    ($($ty:ty => $store:ident, $kind:literal;)*) => {
        $(
            impl Entity for $ty {
                const STORE: StoreName = StoreName::$store;
                const KIND: &'static str = $kind;

                fn id(&self) -> &str {
                    &self.id
                }
            }
        )*
    };
}

/// Project lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    /// Not started
    #[default]
    Planned,
    /// In progress
    Active,
    /// Paused
    OnHold,
    /// Delivered
    Completed,
    /// Abandoned
    Cancelled,
}

impl ProjectStatus {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::OnHold => "on-hold",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A partnership project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Key
    pub id: String,
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Status
    #[serde(default)]
    pub status: ProjectStatus,
    /// Partner running the project, if any
    #[serde(default)]
    pub partner_id: Option<String>,
    /// Planned start
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Planned end
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Budget in dollars
    #[serde(default)]
    pub budget: Option<f64>,
    /// Collaborators on the project
    #[serde(default)]
    pub collaborator_ids: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Where a collaborator comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorKind {
    /// Fortune 30 company
    Fortune30,
    /// Small or medium enterprise
    Sme,
    /// Internal staff
    #[default]
    Internal,
}

impl CollaboratorKind {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fortune30 => "fortune30",
            Self::Sme => "sme",
            Self::Internal => "internal",
        }
    }
}

/// A person or organisation working on projects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    /// Key
    pub id: String,
    /// Display name
    pub name: String,
    /// Contact email
    #[serde(default)]
    pub email: String,
    /// Role on the projects
    #[serde(default)]
    pub role: String,
    /// Origin
    #[serde(default, rename = "type")]
    pub kind: CollaboratorKind,
    /// Projects joined
    #[serde(default)]
    pub project_ids: Vec<String>,
}

/// A small or medium enterprise partner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmePartner {
    /// Key
    pub id: String,
    /// Company name
    pub name: String,
    /// Industry
    #[serde(default)]
    pub industry: String,
    /// Contact email
    #[serde(default)]
    pub contact_email: String,
    /// Capabilities offered
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Situation report on a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitRep {
    /// Key
    pub id: String,
    /// Project reported on
    pub project_id: String,
    /// Title
    pub title: String,
    /// Body
    #[serde(default)]
    pub summary: String,
    /// Free-form status, e.g. "green"
    #[serde(default)]
    pub status: String,
    /// Report date
    pub date: NaiveDate,
}

/// Success performance indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spi {
    /// Key
    pub id: String,
    /// Project measured
    pub project_id: String,
    /// Indicator name
    pub name: String,
    /// Target value
    #[serde(default)]
    pub target: f64,
    /// Current value
    #[serde(default)]
    pub actual: f64,
    /// Unit of measure
    #[serde(default)]
    pub unit: String,
}

/// Objective tied to an SPI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objective {
    /// Key
    pub id: String,
    /// Indicator served
    pub spi_id: String,
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Due date
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Done flag
    #[serde(default)]
    pub completed: bool,
}

/// Cross-project initiative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiative {
    /// Key
    pub id: String,
    /// Name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Projects grouped under it
    #[serde(default)]
    pub project_ids: Vec<String>,
}

/// Recorded application error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorItem {
    /// Key
    pub id: String,
    /// Message
    pub message: String,
    /// Where it happened
    #[serde(default)]
    pub context: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Whether someone looked at it
    #[serde(default)]
    pub resolved: bool,
}

/// Group of collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Key
    pub id: String,
    /// Name
    pub name: String,
    /// Team lead
    #[serde(default)]
    pub lead_id: Option<String>,
    /// Members
    #[serde(default)]
    pub member_ids: Vec<String>,
}

impl_entity! {
    Project => Projects, "project";
    Collaborator => Collaborators, "collaborator";
    SmePartner => SmePartners, "SME partner";
    SitRep => SitReps, "sitrep";
    Spi => Spis, "SPI";
    Objective => Objectives, "objective";
    Initiative => Initiatives, "initiative";
    ErrorItem => Errors, "error item";
    Team => Teams, "team";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn project_uses_camel_case_and_defaults() {
        let project: Project = serde_json::from_value(json!({
            "id": "p1",
            "title": "Alpha",
            "partnerId": "sme-1",
            "status": "on-hold",
            "createdAt": "2024-05-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(project.status, ProjectStatus::OnHold);
        assert_eq!(project.partner_id.as_deref(), Some("sme-1"));
        assert!(project.collaborator_ids.is_empty());
        assert_eq!(Project::STORE, StoreName::Projects);
        assert_eq!(project.id(), "p1");
    }

    #[test]
    fn collaborator_kind_is_named_type() {
        let value = serde_json::to_value(Collaborator {
            id: "c1".into(),
            name: "Ada".into(),
            email: String::new(),
            role: "Engineer".into(),
            kind: CollaboratorKind::Fortune30,
            project_ids: vec![],
        })
        .unwrap();
        assert_eq!(value["type"], "fortune30");
        assert_eq!(value["projectIds"], json!([]));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let result = serde_json::from_value::<SitRep>(json!({"id": "s1", "title": "Weekly"}));
        assert!(result.is_err());
    }
}
