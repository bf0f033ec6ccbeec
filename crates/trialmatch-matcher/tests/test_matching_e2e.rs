//! End-to-end matching over the shared sample patient and trial catalog.

use pretty_assertions::assert_eq;
use trialmatch_common::{MatchError, MatcherConfig};
use trialmatch_matcher::coverage::coverage_report;
use trialmatch_matcher::explain::{explain, RecommendationTier};
use trialmatch_matcher::rank::{rank_with, ranking_summary};
use trialmatch_matcher::{
    extract_features, FeatureValue, MatchStatus, PredicateDef, RecruitingStatus, TrialCatalog, TrialCriteria,
    TrialMatcher, Verdict,
};
use trialmatch_test_utils::{expected_ranking, reference_date, sample_bundle, sample_trials_json};

fn catalog() -> TrialCatalog {
    TrialCatalog::from_json(&sample_trials_json()).unwrap()
}

#[test]
fn test_sample_features() {
    let features = extract_features(&sample_bundle(), reference_date());

    assert_eq!(features.get("demographics.gender"), Some(&FeatureValue::enumerated("female")));
    assert_eq!(features.get("demographics.age"), Some(&FeatureValue::numeric(55.0, Some("a"))));
    assert_eq!(features.get("biomarker.HER2"), Some(&FeatureValue::enumerated("positive")));
    assert_eq!(features.get("performance.ecog"), Some(&FeatureValue::numeric(1.0, None)));
    assert_eq!(features.get("comorbidity.diabetes"), Some(&FeatureValue::presence(true)));
    assert_eq!(features.get("medication.metformin"), Some(&FeatureValue::presence(true)));
    assert!(features.contains("condition.breast_cancer"));
    assert!(!features.contains("biomarker.EGFR"));

    match features.get("lab.hemoglobin") {
        Some(FeatureValue::Numeric { value, unit }) => {
            assert!((value - 130.0).abs() < 1e-9);
            assert_eq!(unit.as_deref(), Some("g/L"));
        }
        other => panic!("unexpected hemoglobin {:?}", other),
    }
}

#[test]
fn test_extraction_is_deterministic() {
    let a = serde_json::to_string(&extract_features(&sample_bundle(), reference_date())).unwrap();
    let b = serde_json::to_string(&extract_features(&sample_bundle(), reference_date())).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_batch_ranking_and_failures() {
    let matcher = TrialMatcher::default();
    let outcome = matcher.match_patient(&sample_bundle(), reference_date(), &catalog().trials);

    let ids: Vec<&str> = outcome.results.iter().map(|r| r.trial_id.as_str()).collect();
    assert_eq!(ids, expected_ranking());

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].trial_id, "NCT-BAD-004");
    assert!(matches!(outcome.failures[0].error, MatchError::InvalidCriteria { .. }));

    let her2 = &outcome.results[0];
    assert_eq!(her2.status, MatchStatus::Eligible);
    assert_eq!(her2.score, 1.0);
    assert!(her2.missing_data.is_empty());

    let egfr = &outcome.results[1];
    assert_eq!(egfr.status, MatchStatus::Indeterminate);
    assert_eq!(egfr.missing_data[0].field, "biomarker.EGFR");
    // UNKNOWN left out of the denominator
    assert_eq!(egfr.score, 1.0);
    assert_eq!(egfr.breakdown.denominator(), 2.0);

    let dm = &outcome.results[3];
    assert_eq!(dm.status, MatchStatus::Ineligible);
    assert_eq!(dm.blockers.len(), 1);
    assert_eq!(dm.blockers[0].predicate.field, "comorbidity.diabetes");
    assert!((dm.score - 0.4).abs() < 1e-12);
}

#[test]
fn test_output_order_independent_of_input_order() {
    let matcher = TrialMatcher::default();
    let features = extract_features(&sample_bundle(), reference_date());
    let mut trials = catalog().trials;

    let forward = matcher.evaluate_batch(&trials, &features);
    trials.reverse();
    let backward = matcher.evaluate_batch(&trials, &features);

    assert_eq!(
        serde_json::to_string(&forward.results).unwrap(),
        serde_json::to_string(&backward.results).unwrap()
    );
}

#[test]
fn test_dedicated_pool_matches_global_pool() {
    let mut config = MatcherConfig::default();
    config.execution.parallel_workers = 2;
    let pooled = TrialMatcher::new(config).unwrap();
    let features = extract_features(&sample_bundle(), reference_date());

    let a = pooled.evaluate_batch(&catalog().trials, &features);
    let b = TrialMatcher::default().evaluate_batch(&catalog().trials, &features);
    assert_eq!(a, b);
}

#[test]
fn test_hemoglobin_verdict_reports_converted_value() {
    let outcome = TrialMatcher::default().match_patient(&sample_bundle(), reference_date(), &catalog().trials);
    let her2 = &outcome.results[0];
    let hb = her2
        .verdicts
        .iter()
        .find(|v| v.predicate.field == "lab.hemoglobin")
        .unwrap();
    assert_eq!(hb.verdict, Verdict::Satisfied);
    assert_eq!(hb.observed.as_ref().map(|o| o.to_string()).as_deref(), Some("13 g/dL"));
}

#[test]
fn test_wire_field_names() {
    let outcome = TrialMatcher::default().match_patient(&sample_bundle(), reference_date(), &catalog().trials);
    let json = serde_json::to_value(&outcome).unwrap();
    let first = &json["results"][0];
    assert_eq!(first["trialId"], "NCT-HER2-001");
    assert_eq!(first["status"], "ELIGIBLE");
    assert_eq!(first["recruitingStatus"], "Recruiting");
    assert!(first["blockers"].is_array());
    assert!(first["missingData"].is_array());
    assert_eq!(json["failures"][0]["error"]["kind"], "invalid_criteria");
}

#[test]
fn test_explain_and_coverage_for_batch() {
    let config = MatcherConfig::default();
    let outcome = TrialMatcher::default().match_patient(&sample_bundle(), reference_date(), &catalog().trials);

    let tiers: Vec<RecommendationTier> = outcome.results.iter().map(|r| explain(r, &config.explain).tier).collect();
    assert_eq!(
        tiers,
        vec![
            RecommendationTier::Strong,
            RecommendationTier::NeedsData,
            RecommendationTier::NeedsData,
            RecommendationTier::NotRecommended,
        ]
    );

    let report = coverage_report(&outcome.results);
    assert_eq!(report.trials_evaluated, 4);
    assert_eq!(report.trials_with_gaps, 2);
    let fields: Vec<&str> = report.fields.iter().map(|g| g.field.as_str()).collect();
    assert_eq!(fields, vec!["biomarker.EGFR", "biomarker.PDL1"]);
    assert_eq!(report.fields[1].suggested_test.as_deref(), Some("PD-L1 IHC testing"));
}

#[test]
fn test_ranked_view_and_summary() {
    let outcome = TrialMatcher::default().match_patient(&sample_bundle(), reference_date(), &catalog().trials);
    let mut options = MatcherConfig::default().ranking;
    options.include_ineligible = false;

    let ranked = rank_with(outcome.results, &options);
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[2].result.trial_id, "NCT-PDL1-005");
    assert_eq!(ranked[2].result.recruiting_status, RecruitingStatus::NotYetRecruiting);
    assert!(ranked[2].tie_break.as_deref().unwrap().contains("recruiting status"));

    let summary = ranking_summary(&ranked);
    assert_eq!(summary.eligible, 1);
    assert_eq!(summary.indeterminate, 2);
    assert_eq!(summary.top_trial.as_deref(), Some("NCT-HER2-001"));
}

#[test]
fn test_active_hepatitis_triggers_exclusion_after_resolved_entry() {
    let bundle: trialmatch_common::Bundle = serde_json::from_value(serde_json::json!({"entry": [
        {"resource": {"resourceType": "Patient", "gender": "male", "birthDate": "1970-01-01"}},
        {"resource": {"resourceType": "Condition", "code": {"text": "Hepatitis A"},
                      "clinicalStatus": {"coding": [{"code": "resolved"}]}}},
        {"resource": {"resourceType": "Condition", "code": {"text": "Chronic hepatitis C"},
                      "clinicalStatus": {"coding": [{"code": "active"}]}}}
    ]}))
    .unwrap();
    let mut trial = TrialCriteria::new("NCT-HEP-006");
    trial.inclusion.push(PredicateDef::new("demographics.age", ">=", serde_json::json!(18)));
    trial.exclusion.push(PredicateDef::new("comorbidity.hepatitis", "present", serde_json::json!(null)));

    let outcome = TrialMatcher::default().match_patient(&bundle, reference_date(), &[trial]);
    let result = &outcome.results[0];
    assert_eq!(result.status, MatchStatus::Ineligible);
    assert_eq!(result.blockers.len(), 1);
    assert_eq!(result.blockers[0].predicate.field, "comorbidity.hepatitis");
}
