//! CSV export of projects and collaborators
//!
//! Two tables separated by a blank line. Fields are joined with commas as-is:
//! a value containing a comma shifts the columns of its row.

use crate::entities::{Collaborator, Project};
use crate::repository::Repository;
use trackstore_core::Result;

const PROJECT_COLUMNS: &str = "id,title,status,partnerId,startDate,endDate,budget";
const COLLABORATOR_COLUMNS: &str = "id,name,email,role,type";

fn project_row(project: &Project) -> String {
    [
        project.id.clone(),
        project.title.clone(),
        project.status.as_str().to_string(),
        project.partner_id.clone().unwrap_or_default(),
        project.start_date.map(|d| d.to_string()).unwrap_or_default(),
        project.end_date.map(|d| d.to_string()).unwrap_or_default(),
        project.budget.map(|b| b.to_string()).unwrap_or_default(),
    ]
    .join(",")
}

fn collaborator_row(collaborator: &Collaborator) -> String {
    [
        collaborator.id.as_str(),
        collaborator.name.as_str(),
        collaborator.email.as_str(),
        collaborator.role.as_str(),
        collaborator.kind.as_str(),
    ]
    .join(",")
}

/// Render both tables
#[must_use]
pub fn render_csv(projects: &[Project], collaborators: &[Collaborator]) -> String {
    let mut lines = Vec::with_capacity(projects.len() + collaborators.len() + 5);
    lines.push("Projects".to_string());
    lines.push(PROJECT_COLUMNS.to_string());
    lines.extend(projects.iter().map(project_row));
    lines.push(String::new());
    lines.push("Collaborators".to_string());
    lines.push(COLLABORATOR_COLUMNS.to_string());
    lines.extend(collaborators.iter().map(collaborator_row));
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

impl Repository {
    /// Projects and collaborators as CSV
    ///
    /// # Errors
    /// Transaction failure
    pub async fn export_csv(&self) -> Result<String> {
        let projects = self.get_all_projects().await?;
        let collaborators = self.get_all_collaborators().await?;
        Ok(render_csv(&projects, &collaborators))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CollaboratorKind, ProjectStatus};
    use chrono::{NaiveDate, Utc};
    use pretty_assertions::assert_eq;

    #[test]
    fn tables_are_separated_by_blank_line() {
        let projects = vec![Project {
            id: "p1".into(),
            title: "Alpha".into(),
            description: "ignored".into(),
            status: ProjectStatus::Active,
            partner_id: Some("s1".into()),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            end_date: None,
            budget: Some(2500.5),
            collaborator_ids: vec![],
            created_at: Utc::now(),
        }];
        let collaborators = vec![Collaborator {
            id: "c1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            role: "Lead".into(),
            kind: CollaboratorKind::Sme,
            project_ids: vec!["p1".into()],
        }];

        let csv = render_csv(&projects, &collaborators);
        assert_eq!(
            csv,
            "Projects\n\
             id,title,status,partnerId,startDate,endDate,budget\n\
             p1,Alpha,active,s1,2024-01-15,,2500.5\n\
             \n\
             Collaborators\n\
             id,name,email,role,type\n\
             c1,Ada,ada@example.com,Lead,sme\n"
        );
    }

    #[test]
    fn embedded_commas_are_not_quoted() {
        let collaborators = vec![Collaborator {
            id: "c1".into(),
            name: "Lovelace, Ada".into(),
            email: String::new(),
            role: String::new(),
            kind: CollaboratorKind::Internal,
            project_ids: vec![],
        }];
        let csv = render_csv(&[], &collaborators);
        assert!(csv.contains("c1,Lovelace, Ada,,,internal"));
    }
}
