//! Predicate weights and the weighted eligibility score.
//!
//! score = (Σw inclusion SATISFIED + Σw exclusion VIOLATED) / (Σw non-UNKNOWN)
//!
//! UNKNOWN verdicts are excluded from both sums. A zero denominator yields a
//! score of 0.

use serde::{Deserialize, Serialize};
use trialmatch_common::ScoringConfig;

use crate::evaluate::Verdict;
use crate::predicate::{Category, Role};

/// Weight used for a predicate of `category` that does not declare its own.
pub fn default_weight(scoring: &ScoringConfig, category: Category) -> f64 {
    match category {
        Category::Demographics => scoring.demographics_weight,
        Category::Condition => scoring.condition_weight,
        Category::Comorbidity => scoring.comorbidity_weight,
        Category::Biomarker => scoring.biomarker_weight,
        Category::Lab => scoring.lab_weight,
        Category::Medication => scoring.medication_weight,
        Category::Performance => scoring.performance_weight,
        Category::Vital => scoring.vital_weight,
        Category::Other => scoring.other_weight,
    }
}

/// True when a verdict counts in the patient's favour for its role.
pub fn is_favourable(role: Role, verdict: Verdict) -> bool {
    matches!(
        (role, verdict),
        (Role::Inclusion, Verdict::Satisfied) | (Role::Exclusion, Verdict::Violated)
    )
}

/// True when a verdict alone makes the patient ineligible.
pub fn is_blocking(role: Role, verdict: Verdict) -> bool {
    matches!(
        (role, verdict),
        (Role::Inclusion, Verdict::Violated) | (Role::Exclusion, Verdict::Satisfied)
    )
}

/// Per-trial tally behind the score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// Criteria resolved in the patient's favour
    pub met_count: usize,
    /// Criteria resolved against the patient (blockers)
    pub failed_count: usize,
    /// Criteria that could not be resolved
    pub unknown_count: usize,
    pub met_weight: f64,
    pub failed_weight: f64,
    pub unknown_weight: f64,
}

impl ScoreBreakdown {
    pub fn record(&mut self, role: Role, verdict: Verdict, weight: f64) {
        if verdict == Verdict::Unknown {
            self.unknown_count += 1;
            self.unknown_weight += weight;
        } else if is_favourable(role, verdict) {
            self.met_count += 1;
            self.met_weight += weight;
        } else {
            self.failed_count += 1;
            self.failed_weight += weight;
        }
    }

    pub fn total_count(&self) -> usize {
        self.met_count + self.failed_count + self.unknown_count
    }

    /// Σw over every non-UNKNOWN verdict.
    pub fn denominator(&self) -> f64 {
        self.met_weight + self.failed_weight
    }

    pub fn score(&self) -> f64 {
        let denom = self.denominator();
        if denom > 0.0 {
            (self.met_weight / denom).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
