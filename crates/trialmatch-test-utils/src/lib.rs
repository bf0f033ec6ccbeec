//! trialmatch-test-utils — Shared fixtures for matcher and CLI tests.
//!
//! The sample patient, evaluated on [`reference_date`], resolves to:
//!
//! | field                    | value              |
//! |--------------------------|--------------------|
//! | demographics.gender      | female             |
//! | demographics.age         | 55                 |
//! | lab.hemoglobin           | 130 g/L (13 g/dL)  |
//! | lab.creatinine           | 88.4 umol/L        |
//! | biomarker.HER2           | positive           |
//! | performance.ecog         | 1                  |
//! | comorbidity.diabetes     | present            |
//! | condition.breast_cancer  | present            |
//! | medication.metformin     | present            |
//!
//! Nothing is recorded for EGFR, PD-L1 or HIV.

use chrono::NaiveDate;
use serde_json::{json, Value};
use trialmatch_common::Bundle;

/// Evaluation date for every fixture.
pub fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 15).unwrap_or_default()
}

fn laboratory() -> Value {
    json!([{ "coding": [{ "system": "http://terminology.hl7.org/CodeSystem/observation-category", "code": "laboratory" }] }])
}

pub fn sample_bundle_value() -> Value {
    json!({
        "resourceType": "Bundle",
        "id": "patient-001",
        "entry": [
            { "resource": {
                "resourceType": "Patient",
                "id": "p1",
                "gender": "female",
                "birthDate": "1970-03-15"
            }},
            { "resource": {
                "resourceType": "Observation",
                "status": "final",
                "category": laboratory(),
                "code": { "coding": [{ "system": "http://loinc.org", "code": "718-7", "display": "Hemoglobin [Mass/volume] in Blood" }] },
                "effectiveDateTime": "2025-12-01T09:30:00Z",
                "valueQuantity": { "value": 13.0, "unit": "g/dL" }
            }},
            { "resource": {
                "resourceType": "Observation",
                "status": "final",
                "category": laboratory(),
                "code": { "text": "Creatinine [Mass/volume] in Serum or Plasma" },
                "effectiveDateTime": "2025-12-01",
                "valueQuantity": { "value": 1.0, "unit": "mg/dL" }
            }},
            { "resource": {
                "resourceType": "Observation",
                "status": "final",
                "code": { "text": "HER2 status" },
                "effectiveDateTime": "2025-11-20",
                "valueString": "POS"
            }},
            { "resource": {
                "resourceType": "Observation",
                "status": "final",
                "code": { "text": "ECOG performance status" },
                "effectiveDateTime": "2025-12-01",
                "valueInteger": 1
            }},
            { "resource": {
                "resourceType": "Condition",
                "code": { "text": "Type 2 diabetes mellitus" },
                "clinicalStatus": { "coding": [{ "code": "active" }] },
                "onsetDateTime": "2015-06-01"
            }},
            { "resource": {
                "resourceType": "Condition",
                "code": { "text": "Breast cancer" },
                "clinicalStatus": { "coding": [{ "code": "active" }] },
                "onsetDateTime": "2025-09-10"
            }},
            { "resource": {
                "resourceType": "MedicationRequest",
                "status": "active",
                "medicationCodeableConcept": { "text": "Metformin" },
                "authoredOn": "2024-02-01"
            }},
            { "resource": {
                "resourceType": "Encounter",
                "id": "e1"
            }}
        ]
    })
}

pub fn sample_bundle_json() -> String {
    sample_bundle_value().to_string()
}

pub fn sample_bundle() -> Bundle {
    serde_json::from_value(sample_bundle_value()).unwrap_or_default()
}

/// Five trials against the sample patient, in deliberately unranked order:
///
/// - `NCT-DM-003`    INELIGIBLE (diabetes exclusion)
/// - `NCT-PDL1-005`  INDETERMINATE, not yet recruiting (PD-L1 missing)
/// - `NCT-BAD-004`   invalid criteria (unknown operator)
/// - `NCT-EGFR-002`  INDETERMINATE, recruiting (EGFR missing)
/// - `NCT-HER2-001`  ELIGIBLE, score 1.0
pub fn sample_trials_value() -> Value {
    json!([
        {
            "trialId": "NCT-DM-003",
            "recruitingStatus": "Active, not recruiting",
            "metadata": { "title": "Metabolic safety study", "phase": "Phase 2" },
            "inclusion": [
                { "field": "demographics.age", "op": ">=", "value": 18 }
            ],
            "exclusion": [
                { "field": "comorbidity.diabetes", "op": "==", "value": "present", "reason": "Uncontrolled diabetes" }
            ]
        },
        {
            "trialId": "NCT-PDL1-005",
            "recruitingStatus": "Not yet recruiting",
            "inclusion": [
                { "field": "demographics.gender", "op": "==", "value": "F" },
                { "field": "biomarker.PD-L1", "op": ">=", "value": 50 },
                { "field": "performance.ecog", "op": "<=", "value": 2 }
            ]
        },
        {
            "trialId": "NCT-BAD-004",
            "recruitingStatus": "Recruiting",
            "inclusion": [
                { "field": "demographics.age", "op": "approximately", "value": 40 }
            ]
        },
        {
            "trialId": "NCT-EGFR-002",
            "recruitingStatus": "Recruiting",
            "inclusion": [
                { "field": "biomarker.EGFR", "op": "==", "value": "positive" },
                { "field": "demographics.age", "op": ">=", "value": 18 }
            ]
        },
        {
            "trialId": "NCT-HER2-001",
            "recruitingStatus": "Recruiting",
            "metadata": {
                "title": "HER2-targeted therapy in metastatic breast cancer",
                "phase": "Phase 3",
                "conditions": ["Breast cancer"]
            },
            "inclusion": [
                { "field": "biomarker.HER2", "op": "==", "value": "positive" },
                { "field": "lab.hemoglobin", "op": ">=", "value": 10, "unit": "g/dL" },
                { "field": "performance.ecog", "op": "<=", "value": 1 },
                { "field": "demographics.age", "op": "range", "value": [18, 75] }
            ],
            "exclusion": [
                { "field": "lab.creatinine", "op": ">", "value": 1.5, "unit": "mg/dL" }
            ]
        }
    ])
}

pub fn sample_trials_json() -> String {
    sample_trials_value().to_string()
}

/// Trial ids of [`sample_trials_value`] in expected ranking order.
pub fn expected_ranking() -> Vec<&'static str> {
    vec!["NCT-HER2-001", "NCT-EGFR-002", "NCT-PDL1-005", "NCT-DM-003"]
}
