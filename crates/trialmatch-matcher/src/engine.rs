//! Trial-level matching.
//!
//! Aggregates predicate verdicts into an eligibility status and a weighted
//! score, and runs whole catalogs in parallel.
//!
//! Status:
//!   INELIGIBLE    any inclusion VIOLATED or any exclusion SATISFIED
//!   INDETERMINATE otherwise, if any verdict is UNKNOWN or the trial has no criteria
//!   ELIGIBLE      otherwise

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trialmatch_common::{MatchError, MatcherConfig};

use crate::evaluate::{evaluate, EvalOptions, PredicateVerdict};
use crate::explain::{missing_data_request, MissingDataRequest};
use crate::features::FeatureMap;
use crate::rank;
use crate::trial::{RecruitingStatus, TrialCriteria, TrialMetadata};
use crate::weights::{is_blocking, ScoreBreakdown};

/// Eligibility outcome. Declaration order is ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Eligible,
    Indeterminate,
    Ineligible,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Eligible => "ELIGIBLE",
            MatchStatus::Indeterminate => "INDETERMINATE",
            MatchStatus::Ineligible => "INELIGIBLE",
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assessment of one patient against one trial. Built fresh per evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub trial_id: String,
    pub status: MatchStatus,
    /// Weighted share of resolved criteria in the patient's favour, in [0, 1].
    pub score: f64,
    pub recruiting_status: RecruitingStatus,
    /// VIOLATED inclusions and SATISFIED exclusions, verbatim.
    pub blockers: Vec<PredicateVerdict>,
    /// One request per UNKNOWN verdict.
    pub missing_data: Vec<MissingDataRequest>,
    /// Every verdict, inclusions first, in catalog order.
    pub verdicts: Vec<PredicateVerdict>,
    pub breakdown: ScoreBreakdown,
    #[serde(default)]
    pub metadata: TrialMetadata,
}

/// A trial that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialFailure {
    pub trial_id: String,
    pub error: MatchError,
}

/// Every trial in a batch ends up in exactly one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// Ranked.
    pub results: Vec<MatchResult>,
    /// In catalog order.
    pub failures: Vec<TrialFailure>,
}

/// Evaluate a patient's features against one trial.
pub fn evaluate_trial(
    trial: &TrialCriteria,
    features: &FeatureMap,
    config: &MatcherConfig,
) -> Result<MatchResult, MatchError> {
    let predicates = trial.compile(&config.scoring)?;
    let options = EvalOptions::from(&config.scoring);

    let verdicts: Vec<PredicateVerdict> = predicates
        .iter()
        .map(|p| evaluate(p, features, options))
        .collect();

    let mut breakdown = ScoreBreakdown::default();
    for v in &verdicts {
        breakdown.record(v.predicate.role, v.verdict, v.predicate.weight);
    }

    let blockers: Vec<PredicateVerdict> = verdicts
        .iter()
        .filter(|v| is_blocking(v.predicate.role, v.verdict))
        .cloned()
        .collect();
    let missing_data: Vec<MissingDataRequest> = verdicts
        .iter()
        .filter(|v| v.is_unknown())
        .map(missing_data_request)
        .collect();

    let status = if !blockers.is_empty() {
        MatchStatus::Ineligible
    } else if breakdown.unknown_count > 0 || breakdown.total_count() == 0 {
        MatchStatus::Indeterminate
    } else {
        MatchStatus::Eligible
    };
    let score = breakdown.score();

    debug!(
        "{}: {} score={:.3} met={} failed={} unknown={}",
        trial.trial_id, status, score, breakdown.met_count, breakdown.failed_count, breakdown.unknown_count
    );

    Ok(MatchResult {
        trial_id: trial.trial_id.clone(),
        status,
        score,
        recruiting_status: trial.recruiting_status,
        blockers,
        missing_data,
        verdicts,
        breakdown,
        metadata: trial.metadata.clone(),
    })
}

/// Evaluate every trial in parallel. A trial with invalid criteria becomes a
/// [`TrialFailure`] and does not affect the others. Results come back in
/// ranking order whatever order the workers finish in.
pub fn evaluate_batch(trials: &[TrialCriteria], features: &FeatureMap, config: &MatcherConfig) -> BatchOutcome {
    // Indexed collect keeps catalog order.
    let outcomes: Vec<Result<MatchResult, MatchError>> = trials
        .par_iter()
        .map(|trial| evaluate_trial(trial, features, config))
        .collect();

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (trial, outcome) in trials.iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(result),
            Err(error) => {
                warn!("Trial {} skipped: {}", trial.trial_id, error);
                failures.push(TrialFailure { trial_id: trial.trial_id.clone(), error });
            }
        }
    }

    info!(
        "Evaluated {} trials: {} results, {} failures",
        trials.len(),
        results.len(),
        failures.len()
    );

    BatchOutcome {
        results: rank::rank(results),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::Verdict;
    use crate::features::FeatureValue;
    use crate::predicate::PredicateDef;
    use serde_json::json;

    fn features() -> FeatureMap {
        vec![
            ("lab.hemoglobin", FeatureValue::numeric(130.0, Some("g/L"))),
            ("biomarker.HER2", FeatureValue::enumerated("positive")),
            ("comorbidity.diabetes", FeatureValue::presence(true)),
            ("demographics.age", FeatureValue::numeric(54.0, Some("a"))),
        ]
        .into_iter()
        .collect()
    }

    fn trial(id: &str, inclusion: Vec<PredicateDef>, exclusion: Vec<PredicateDef>) -> TrialCriteria {
        TrialCriteria { inclusion, exclusion, ..TrialCriteria::new(id) }
    }

    #[test]
    fn test_all_satisfied_is_eligible() {
        let t = trial(
            "NCT-A",
            vec![
                PredicateDef::new("lab.hemoglobin", ">=", json!(10)).with_unit("g/dL"),
                PredicateDef::new("biomarker.HER2", "==", json!("POS")),
            ],
            vec![PredicateDef::new("comorbidity.hiv", "present", json!(null))],
        );
        let r = evaluate_trial(&t, &features(), &MatcherConfig::default()).unwrap();
        // hiv is missing -> UNKNOWN
        assert_eq!(r.status, MatchStatus::Indeterminate);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.missing_data.len(), 1);
        assert_eq!(r.missing_data[0].field, "comorbidity.hiv");

        let t = trial("NCT-B", t.inclusion.clone(), vec![]);
        let r = evaluate_trial(&t, &features(), &MatcherConfig::default()).unwrap();
        assert_eq!(r.status, MatchStatus::Eligible);
        assert!(r.blockers.is_empty());
    }

    #[test]
    fn test_satisfied_exclusion_blocks() {
        let t = trial(
            "NCT-C",
            vec![PredicateDef::new("biomarker.HER2", "==", json!("positive")).with_weight(3.0)],
            vec![PredicateDef::new("comorbidity.diabetes", "==", json!("present")).with_weight(1.0)],
        );
        let r = evaluate_trial(&t, &features(), &MatcherConfig::default()).unwrap();
        assert_eq!(r.status, MatchStatus::Ineligible);
        assert_eq!(r.blockers.len(), 1);
        assert_eq!(r.blockers[0].verdict, Verdict::Satisfied);
        assert!((r.score - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_blocker_dominates_unknown() {
        let t = trial(
            "NCT-D",
            vec![
                PredicateDef::new("demographics.age", "<=", json!(40)),
                PredicateDef::new("biomarker.EGFR", "==", json!("positive")),
            ],
            vec![],
        );
        let r = evaluate_trial(&t, &features(), &MatcherConfig::default()).unwrap();
        assert_eq!(r.status, MatchStatus::Ineligible);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.missing_data.len(), 1);
    }

    #[test]
    fn test_empty_trial_is_indeterminate() {
        let r = evaluate_trial(&TrialCriteria::new("NCT-E"), &features(), &MatcherConfig::default()).unwrap();
        assert_eq!(r.status, MatchStatus::Indeterminate);
        assert_eq!(r.score, 0.0);
    }

    #[test]
    fn test_zero_weights_leave_denominator_empty() {
        let t = trial(
            "NCT-F",
            vec![PredicateDef::new("biomarker.HER2", "==", json!("positive")).with_weight(0.0)],
            vec![PredicateDef::new("demographics.age", "<", json!(18)).with_weight(0.0)],
        );
        let r = evaluate_trial(&t, &features(), &MatcherConfig::default()).unwrap();
        assert_eq!(r.status, MatchStatus::Eligible);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.breakdown.denominator(), 0.0);
    }

    #[test]
    fn test_zero_weight_violation_still_blocks() {
        let t = trial(
            "NCT-F2",
            vec![PredicateDef::new("demographics.age", "<=", json!(40)).with_weight(0.0)],
            vec![],
        );
        let r = evaluate_trial(&t, &features(), &MatcherConfig::default()).unwrap();
        assert_eq!(r.status, MatchStatus::Ineligible);
        assert_eq!(r.blockers.len(), 1);
    }

    #[test]
    fn test_invalid_trial_does_not_abort_batch() {
        let good = trial("NCT-G", vec![PredicateDef::new("biomarker.HER2", "==", json!("positive"))], vec![]);
        let bad = trial("NCT-H", vec![PredicateDef::new("biomarker.HER2", "~=", json!("positive"))], vec![]);
        let outcome = evaluate_batch(&[bad, good], &features(), &MatcherConfig::default());
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].trial_id, "NCT-G");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].trial_id, "NCT-H");
        assert!(matches!(outcome.failures[0].error, MatchError::InvalidCriteria { .. }));
    }

    #[test]
    fn test_result_json_field_names() {
        let t = trial("NCT-J", vec![PredicateDef::new("biomarker.EGFR", "==", json!("positive"))], vec![]);
        let r = evaluate_trial(&t, &features(), &MatcherConfig::default()).unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["trialId"], "NCT-J");
        assert_eq!(json["status"], "INDETERMINATE");
        assert_eq!(json["score"], 0.0);
        assert!(json["blockers"].as_array().unwrap().is_empty());
        assert_eq!(json["missingData"][0]["field"], "biomarker.EGFR");
        assert_eq!(json["verdicts"][0]["verdict"], "UNKNOWN");
    }
}
