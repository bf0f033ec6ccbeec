//! Trial criteria sets and catalog loading.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use trialmatch_common::{MatchError, Result, ScoringConfig, TrialMatchError};

use crate::predicate::{Predicate, PredicateDef, Role};

/// Enrollment state of a trial as published by its registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecruitingStatus {
    Recruiting,
    EnrollingByInvitation,
    ActiveNotRecruiting,
    NotYetRecruiting,
    Completed,
    Terminated,
    Suspended,
    Withdrawn,
    #[default]
    Unknown,
}

impl RecruitingStatus {
    /// Registry label, e.g. "Active, not recruiting".
    pub fn label(&self) -> &'static str {
        match self {
            RecruitingStatus::Recruiting => "Recruiting",
            RecruitingStatus::EnrollingByInvitation => "Enrolling by invitation",
            RecruitingStatus::ActiveNotRecruiting => "Active, not recruiting",
            RecruitingStatus::NotYetRecruiting => "Not yet recruiting",
            RecruitingStatus::Completed => "Completed",
            RecruitingStatus::Terminated => "Terminated",
            RecruitingStatus::Suspended => "Suspended",
            RecruitingStatus::Withdrawn => "Withdrawn",
            RecruitingStatus::Unknown => "Unknown",
        }
    }

    /// Lenient parse; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "recruiting" | "open" => RecruitingStatus::Recruiting,
            "enrollingbyinvitation" => RecruitingStatus::EnrollingByInvitation,
            "activenotrecruiting" => RecruitingStatus::ActiveNotRecruiting,
            "notyetrecruiting" => RecruitingStatus::NotYetRecruiting,
            "completed" => RecruitingStatus::Completed,
            "terminated" => RecruitingStatus::Terminated,
            "suspended" => RecruitingStatus::Suspended,
            "withdrawn" => RecruitingStatus::Withdrawn,
            _ => RecruitingStatus::Unknown,
        }
    }

    /// Currently enrolling participants.
    pub fn is_recruiting(&self) -> bool {
        matches!(self, RecruitingStatus::Recruiting | RecruitingStatus::EnrollingByInvitation)
    }
}

impl From<String> for RecruitingStatus {
    fn from(raw: String) -> Self {
        RecruitingStatus::parse(&raw)
    }
}

impl From<RecruitingStatus> for String {
    fn from(status: RecruitingStatus) -> Self {
        status.label().to_string()
    }
}

impl std::fmt::Display for RecruitingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "start_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

/// Eligibility criteria of one trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialCriteria {
    #[serde(alias = "trial_id", alias = "id")]
    pub trial_id: String,
    #[serde(default, alias = "recruiting_status")]
    pub recruiting_status: RecruitingStatus,
    #[serde(default)]
    pub metadata: TrialMetadata,
    /// All must hold.
    #[serde(default)]
    pub inclusion: Vec<PredicateDef>,
    /// None must hold.
    #[serde(default)]
    pub exclusion: Vec<PredicateDef>,
}

impl TrialCriteria {
    pub fn new(trial_id: impl Into<String>) -> Self {
        Self {
            trial_id: trial_id.into(),
            ..Default::default()
        }
    }

    /// Compile every predicate, inclusions first. The first malformed
    /// definition fails the whole trial.
    pub fn compile(&self, scoring: &ScoringConfig) -> std::result::Result<Vec<Predicate>, MatchError> {
        if self.trial_id.trim().is_empty() {
            return Err(MatchError::invalid_criteria("", "trial id is empty"));
        }
        let inclusions = self
            .inclusion
            .iter()
            .enumerate()
            .map(|(i, def)| def.compile(&self.trial_id, Role::Inclusion, i, scoring));
        let exclusions = self
            .exclusion
            .iter()
            .enumerate()
            .map(|(i, def)| def.compile(&self.trial_id, Role::Exclusion, i, scoring));
        inclusions.chain(exclusions).collect()
    }
}

/// An ordered list of trials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialCatalog {
    pub trials: Vec<TrialCriteria>,
}

/// Catalog documents may be a bare list or `{ "trials": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDoc {
    List(Vec<TrialCriteria>),
    Wrapped { trials: Vec<TrialCriteria> },
}

impl From<CatalogDoc> for TrialCatalog {
    fn from(doc: CatalogDoc) -> Self {
        match doc {
            CatalogDoc::List(trials) | CatalogDoc::Wrapped { trials } => TrialCatalog { trials },
        }
    }
}

impl TrialCatalog {
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: CatalogDoc = serde_json::from_str(json)?;
        Ok(doc.into())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let doc: CatalogDoc = serde_yaml::from_str(yaml)?;
        Ok(doc.into())
    }

    /// Parse by file extension: `.yaml`/`.yml` as YAML, `.json` or none as JSON.
    pub fn parse_for_path(path: &Path, content: &str) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml(content),
            Some("json") | None => Self::from_json(content),
            Some(other) => Err(TrialMatchError::Config(format!(
                "unsupported catalog format '.{}' (expected .json, .yaml or .yml)",
                other
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_recruiting_status_parse() {
        assert_eq!(RecruitingStatus::parse("Active, not recruiting"), RecruitingStatus::ActiveNotRecruiting);
        assert_eq!(RecruitingStatus::parse("RECRUITING"), RecruitingStatus::Recruiting);
        assert_eq!(RecruitingStatus::parse("not_yet_recruiting"), RecruitingStatus::NotYetRecruiting);
        assert_eq!(RecruitingStatus::parse("on hold"), RecruitingStatus::Unknown);
        assert!(RecruitingStatus::EnrollingByInvitation.is_recruiting());
        assert!(!RecruitingStatus::Completed.is_recruiting());
    }

    #[test]
    fn test_catalog_accepts_list_and_wrapped_forms() {
        let list = TrialCatalog::from_json(r#"[{"trialId": "NCT1"}, {"trial_id": "NCT2"}]"#).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.trials[1].trial_id, "NCT2");

        let wrapped = TrialCatalog::from_yaml(
            "trials:\n  - id: NCT3\n    recruitingStatus: Not yet recruiting\n    inclusion:\n      - field: demographics.age\n        op: \">=\"\n        value: 18\n",
        )
        .unwrap();
        assert_eq!(wrapped.trials[0].recruiting_status, RecruitingStatus::NotYetRecruiting);
        assert_eq!(wrapped.trials[0].inclusion.len(), 1);
    }

    #[test]
    fn test_status_serialises_as_label() {
        let trial = TrialCriteria {
            recruiting_status: RecruitingStatus::ActiveNotRecruiting,
            ..TrialCriteria::new("NCT9")
        };
        let json = serde_json::to_value(&trial).unwrap();
        assert_eq!(json["recruitingStatus"], "Active, not recruiting");
        assert_eq!(json["trialId"], "NCT9");
    }

    #[test]
    fn test_compile_fails_whole_trial_on_one_bad_predicate() {
        let mut trial = TrialCriteria::new("NCT4");
        trial.inclusion.push(PredicateDef::new("demographics.age", ">=", serde_json::json!(18)));
        trial.exclusion.push(PredicateDef::new("comorbidity.hiv", "sometimes", serde_json::json!(null)));
        let err = trial.compile(&ScoringConfig::default()).unwrap_err();
        assert!(err.is_fatal_for_trial());
        assert!(err.to_string().contains("exc-1"));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = TrialCatalog::parse_for_path(Path::new("trials.csv"), "").unwrap_err();
        assert!(matches!(err, TrialMatchError::Config(_)));
    }
}
