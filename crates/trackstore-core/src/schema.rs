//! Fixed collection set of the tracker database

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named object store; every record in it is keyed by its `id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoreName {
    /// `projects`
    #[serde(rename = "projects")]
    Projects,
    /// `collaborators`
    #[serde(rename = "collaborators")]
    Collaborators,
    /// `smePartners`
    #[serde(rename = "smePartners")]
    SmePartners,
    /// `sitreps`
    #[serde(rename = "sitreps")]
    SitReps,
    /// `spis`
    #[serde(rename = "spis")]
    Spis,
    /// `objectives`
    #[serde(rename = "objectives")]
    Objectives,
    /// `initiatives`
    #[serde(rename = "initiatives")]
    Initiatives,
    /// `errors`
    #[serde(rename = "errors")]
    Errors,
    /// `teams`
    #[serde(rename = "teams")]
    Teams,
}

impl StoreName {
    /// Every store the schema requires
    pub const ALL: [StoreName; 9] = [
        StoreName::Projects,
        StoreName::Collaborators,
        StoreName::SmePartners,
        StoreName::SitReps,
        StoreName::Spis,
        StoreName::Objectives,
        StoreName::Initiatives,
        StoreName::Errors,
        StoreName::Teams,
    ];

    /// Store used by the pool's liveness probe
    pub const PROBE: StoreName = StoreName::Projects;

    /// Name as stored in the backend
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Projects => "projects",
            Self::Collaborators => "collaborators",
            Self::SmePartners => "smePartners",
            Self::SitReps => "sitreps",
            Self::Spis => "spis",
            Self::Objectives => "objectives",
            Self::Initiatives => "initiatives",
            Self::Errors => "errors",
            Self::Teams => "teams",
        }
    }

    /// Required stores absent from `existing`
    #[must_use]
    pub fn missing_from(existing: &[String]) -> Vec<StoreName> {
        Self::ALL
            .into_iter()
            .filter(|store| !existing.iter().any(|name| name == store.as_str()))
            .collect()
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|store| store.as_str() == s)
            .ok_or_else(|| StorageError::Validation(format!("unknown store: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for store in StoreName::ALL {
            assert_eq!(store.as_str().parse::<StoreName>().unwrap(), store);
        }
        assert!("widgets".parse::<StoreName>().is_err());
    }

    #[test]
    fn serde_uses_store_names() {
        let json = serde_json::to_string(&StoreName::SmePartners).unwrap();
        assert_eq!(json, "\"smePartners\"");
    }

    #[test]
    fn missing_stores_are_detected() {
        let existing = vec!["projects".to_string(), "teams".to_string()];
        let missing = StoreName::missing_from(&existing);
        assert_eq!(missing.len(), 7);
        assert!(!missing.contains(&StoreName::Projects));
        assert!(missing.contains(&StoreName::SmePartners));
    }
}
