use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while normalising patient data or compiling trial criteria.
///
/// Everything except [`MatchError::InvalidCriteria`] degrades to an UNKNOWN
/// verdict for the predicate being evaluated. `InvalidCriteria` fails the
/// whole trial it belongs to, and only that trial.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchError {
    #[error("unsupported unit '{unit}' for test type '{test_type}'")]
    UnsupportedUnit { test_type: String, unit: String },

    #[error("unsupported test type '{test_type}'")]
    UnsupportedTestType { test_type: String },

    #[error("value '{value}' has no mapping in the {domain} domain")]
    UnmappedEnumValue { domain: String, value: String },

    #[error("type mismatch on '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("invalid criteria for trial {trial_id}: {reason}")]
    InvalidCriteria { trial_id: String, reason: String },
}

impl MatchError {
    pub fn unsupported_unit(test_type: impl Into<String>, unit: impl Into<String>) -> Self {
        MatchError::UnsupportedUnit {
            test_type: test_type.into(),
            unit: unit.into(),
        }
    }

    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        MatchError::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn invalid_criteria(trial_id: impl Into<String>, reason: impl Into<String>) -> Self {
        MatchError::InvalidCriteria {
            trial_id: trial_id.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that invalidate a trial rather than a single verdict.
    pub fn is_fatal_for_trial(&self) -> bool {
        matches!(self, MatchError::InvalidCriteria { .. })
    }
}

#[derive(Debug, Error)]
pub enum TrialMatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Matching error: {0}")]
    Match(#[from] MatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TrialMatchError>;
