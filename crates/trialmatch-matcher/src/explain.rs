//! Human-readable rationale for a match result.
//!
//! Everything here is derived from the verdicts already stored in a
//! [`MatchResult`]; nothing is re-evaluated.

use serde::{Deserialize, Serialize};
use trialmatch_common::ExplainConfig;

use crate::engine::{MatchResult, MatchStatus};
use crate::evaluate::{PredicateVerdict, UnknownCause, Verdict};
use crate::normalise::{self, EnumDomain};
use crate::predicate::{Category, Literal, Operand, Operator, Role};

/// Field → test that would produce it.
const SUGGESTED_TESTS: &[(&str, &str)] = &[
    ("lab.hemoglobin", "complete blood count (CBC)"),
    ("lab.creatinine", "serum creatinine test"),
    ("lab.bilirubin", "liver function tests (LFTs)"),
    ("lab.albumin", "liver function tests (LFTs)"),
    ("lab.glucose", "blood glucose test"),
    ("lab.cholesterol", "lipid panel"),
    ("lab.triglycerides", "lipid panel"),
    ("biomarker.HER2", "HER2 IHC/ISH testing"),
    ("biomarker.PDL1", "PD-L1 IHC testing"),
    ("biomarker.MSI", "MSI/MMR testing"),
    ("biomarker.TMB", "tumor mutational burden (TMB) sequencing"),
    ("biomarker.EGFR", "EGFR mutation testing"),
    ("biomarker.ALK", "ALK rearrangement testing"),
    ("performance.ecog", "ECOG performance status assessment"),
];

/// Test or record review that would resolve `field`, where one is known.
pub fn suggested_test(field: &str) -> Option<String> {
    if let Some((_, test)) = SUGGESTED_TESTS.iter().find(|(f, _)| *f == field) {
        return Some(test.to_string());
    }
    let (prefix, rest) = field.split_once('.')?;
    let suggestion = match prefix {
        "biomarker" => format!("{} biomarker testing", rest),
        "lab" => format!("{} laboratory test", rest.replace('_', " ")),
        "vital" => "vital signs measurement".to_string(),
        "demographics" => "patient demographics record".to_string(),
        "comorbidity" | "condition" => "medical history review".to_string(),
        "medication" => "medication reconciliation".to_string(),
        _ => return None,
    };
    Some(suggestion)
}

/// Description of the value that would resolve a predicate.
fn required_format(verdict: &PredicateVerdict) -> String {
    let p = &verdict.predicate;
    let numeric = match &p.operand {
        Operand::Single(Literal::Number(_)) | Operand::Range { .. } => true,
        Operand::Set(items) => items.iter().all(|l| matches!(l, Literal::Number(_))),
        _ => false,
    };
    if numeric {
        let unit = p.unit.clone().or_else(|| {
            p.field
                .strip_prefix("lab.")
                .and_then(|test| normalise::canonical_unit(test).ok())
                .map(str::to_string)
        });
        return match unit {
            Some(unit) => format!("numeric result in {}", unit),
            None => "numeric result".to_string(),
        };
    }

    let is_date = p.field == "demographics.birth_date"
        || (p.operator.is_ordering() && matches!(&p.operand, Operand::Single(Literal::Text(_))));
    if is_date {
        return "date (YYYY-MM-DD)".to_string();
    }

    match EnumDomain::for_field(&p.field) {
        Some(EnumDomain::Presence) => "documented as present or absent".to_string(),
        Some(domain) => {
            let tokens: Vec<&str> = domain.tokens().iter().copied().filter(|t| *t != "unknown").collect();
            format!("one of: {}", tokens.join(", "))
        }
        None => "coded or text value".to_string(),
    }
}

/// What the patient record needs to resolve one UNKNOWN predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingDataRequest {
    pub predicate_id: String,
    pub field: String,
    pub category: Category,
    pub role: Role,
    pub required_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_test: Option<String>,
    pub cause: UnknownCause,
    pub message: String,
}

pub fn missing_data_request(verdict: &PredicateVerdict) -> MissingDataRequest {
    let p = &verdict.predicate;
    let cause = verdict.cause.clone().unwrap_or(UnknownCause::MissingField);
    let required_format = required_format(verdict);
    let suggested_test = suggested_test(&p.field);

    let mut message = match &cause {
        UnknownCause::MissingField => format!(
            "No {} on record for {} criterion {}; provide a {}",
            p.field, p.role.as_str(), p.id, required_format
        ),
        UnknownCause::Failed { error } => format!(
            "{} could not be checked for {} criterion {} ({}); provide a {}",
            p.field, p.role.as_str(), p.id, error, required_format
        ),
    };
    if let Some(test) = &suggested_test {
        message.push_str(&format!(". Suggested: {}", test));
    }

    MissingDataRequest {
        predicate_id: p.id.clone(),
        field: p.field.clone(),
        category: p.category,
        role: p.role,
        required_format,
        suggested_test,
        cause,
        message,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationTier {
    Strong,
    Recommended,
    Consider,
    NeedsData,
    NotRecommended,
}

impl RecommendationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationTier::Strong => "strong",
            RecommendationTier::Recommended => "recommended",
            RecommendationTier::Consider => "consider",
            RecommendationTier::NeedsData => "needs_data",
            RecommendationTier::NotRecommended => "not_recommended",
        }
    }
}

pub fn tier(result: &MatchResult, thresholds: &ExplainConfig) -> RecommendationTier {
    match result.status {
        MatchStatus::Ineligible => RecommendationTier::NotRecommended,
        MatchStatus::Indeterminate => RecommendationTier::NeedsData,
        MatchStatus::Eligible if result.score >= thresholds.strong_threshold => RecommendationTier::Strong,
        MatchStatus::Eligible if result.score >= thresholds.recommended_threshold => RecommendationTier::Recommended,
        MatchStatus::Eligible => RecommendationTier::Consider,
    }
}

/// Why a blocking predicate rules the patient out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockerExplanation {
    pub predicate_id: String,
    pub field: String,
    pub role: Role,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub message: String,
}

fn blocker_explanation(verdict: &PredicateVerdict) -> BlockerExplanation {
    let p = &verdict.predicate;
    let observed = verdict.observed.as_ref().map(|v| v.to_string());
    let lead = match p.role {
        Role::Inclusion => "Inclusion criterion not met",
        Role::Exclusion => "Exclusion criterion applies",
    };
    let mut message = format!("{}: {}", lead, p.describe());
    match &observed {
        Some(obs) => message.push_str(&format!(" (patient: {})", obs)),
        None => message.push_str(" (not on record)"),
    }
    if let Some(reason) = &p.reason {
        message.push_str(&format!(". {}", reason));
    }

    BlockerExplanation {
        predicate_id: p.id.clone(),
        field: p.field.clone(),
        role: p.role,
        operator: p.operator,
        expected: (!p.operand.is_none()).then(|| p.operand.to_string()),
        observed,
        unit: p.unit.clone(),
        reason: p.reason.clone(),
        message,
    }
}

/// An inclusion criterion the patient meets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedFact {
    pub predicate_id: String,
    pub field: String,
    pub criterion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub trial_id: String,
    pub status: MatchStatus,
    pub score: f64,
    pub tier: RecommendationTier,
    pub summary: String,
    pub blockers: Vec<BlockerExplanation>,
    pub matched: Vec<MatchedFact>,
    pub missing_data: Vec<MissingDataRequest>,
}

pub fn explain(result: &MatchResult, thresholds: &ExplainConfig) -> Explanation {
    let tier = tier(result, thresholds);
    let blockers: Vec<BlockerExplanation> = result.blockers.iter().map(blocker_explanation).collect();
    let matched: Vec<MatchedFact> = result
        .verdicts
        .iter()
        .filter(|v| v.predicate.role == Role::Inclusion && v.verdict == Verdict::Satisfied)
        .map(|v| MatchedFact {
            predicate_id: v.predicate.id.clone(),
            field: v.predicate.field.clone(),
            criterion: v.predicate.describe(),
            observed: v.observed.as_ref().map(|o| o.to_string()),
        })
        .collect();

    let summary = format!(
        "{} is {} (score {:.2}, {}): {} of {} criteria met, {} blocking, {} need data",
        result.trial_id,
        result.status,
        result.score,
        tier.as_str(),
        result.breakdown.met_count,
        result.breakdown.total_count(),
        blockers.len(),
        result.missing_data.len()
    );

    Explanation {
        trial_id: result.trial_id.clone(),
        status: result.status,
        score: result.score,
        tier,
        summary,
        blockers,
        matched,
        missing_data: result.missing_data.clone(),
    }
}
