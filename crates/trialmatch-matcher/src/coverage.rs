//! Batch-level data-gap reporting.
//!
//! Counts, per field, how many trials could not resolve a predicate because
//! of it, grades how much of each trial's criteria the record covers, and
//! turns the gaps into an ordered list of tests to order or records to
//! review.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::MatchResult;
use crate::explain::suggested_test;
use crate::predicate::Category;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldGap {
    pub field: String,
    pub category: Category,
    /// UNKNOWN verdicts on this field across the batch.
    pub unknown_count: usize,
    /// Trials with at least one UNKNOWN on this field, sorted.
    pub trials: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_test: Option<String>,
}

// ---------------------------------------------------------------------------
// Data collection logistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

/// How long, how pressing and how costly it is to obtain one field.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Logistics {
    urgency: Urgency,
    turnaround: &'static str,
    /// Upper end of `turnaround`.
    max_hours: u32,
    cost: &'static str,
}

const fn logistics(urgency: Urgency, turnaround: &'static str, max_hours: u32, cost: &'static str) -> Logistics {
    Logistics { urgency, turnaround, max_hours, cost }
}

const FIELD_LOGISTICS: &[(&str, Logistics)] = &[
    ("biomarker.HER2", logistics(Urgency::High, "3-5 days", 5 * 24, "$$")),
    ("biomarker.EGFR", logistics(Urgency::High, "7-10 days", 10 * 24, "$$$")),
    ("biomarker.ALK", logistics(Urgency::High, "7-10 days", 10 * 24, "$$$")),
    ("biomarker.KRAS", logistics(Urgency::Medium, "5-7 days", 7 * 24, "$$")),
    ("biomarker.BRAF", logistics(Urgency::Medium, "5-7 days", 7 * 24, "$$")),
    ("biomarker.PDL1", logistics(Urgency::Medium, "3-5 days", 5 * 24, "$$")),
    ("biomarker.MSI", logistics(Urgency::Medium, "7-10 days", 10 * 24, "$$$")),
    ("biomarker.TMB", logistics(Urgency::Medium, "10-14 days", 14 * 24, "$$$$")),
    ("comorbidity.heart_disease", logistics(Urgency::High, "2-3 days", 3 * 24, "$")),
    ("comorbidity.lung_disease", logistics(Urgency::High, "2-3 days", 3 * 24, "$")),
    ("performance.ecog", logistics(Urgency::Low, "Immediate", 0, "$")),
];

fn logistics_for(field: &str) -> Logistics {
    if let Some((_, l)) = FIELD_LOGISTICS.iter().find(|(f, _)| *f == field) {
        return *l;
    }
    match field.split_once('.').map(|(prefix, _)| prefix) {
        Some("biomarker") => logistics(Urgency::Medium, "5-7 days", 7 * 24, "$$"),
        Some("lab") => logistics(Urgency::Low, "1-2 hours", 2, "$"),
        Some("comorbidity" | "condition") => logistics(Urgency::Medium, "1-2 days", 2 * 24, "$"),
        Some("medication") => logistics(Urgency::Low, "Same day", 8, "$"),
        Some("demographics" | "vital" | "performance") => logistics(Urgency::Low, "Immediate", 0, "$"),
        _ => logistics(Urgency::Low, "1-2 days", 2 * 24, "$"),
    }
}

/// One test or record review, with the trials it would move forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityAction {
    pub field: String,
    pub category: Category,
    /// Test to order, or the record review that supplies the field.
    pub action: String,
    pub urgency: Urgency,
    pub turnaround: String,
    pub cost: String,
    /// Trials with an UNKNOWN on this field.
    pub trials_unblocked: usize,
    /// Trials whose only open criteria are on this field.
    pub trials_settled: usize,
}

/// Time until every missing field could be in the record, from the slowest
/// action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionEstimate {
    #[default]
    Immediate,
    SameDay,
    OneToTwoDays,
    ThreeToSevenDays,
    OneToTwoWeeks,
    OverTwoWeeks,
}

impl CompletionEstimate {
    pub fn from_hours(hours: u32) -> Self {
        match hours {
            0 => CompletionEstimate::Immediate,
            1..=23 => CompletionEstimate::SameDay,
            24..=47 => CompletionEstimate::OneToTwoDays,
            48..=167 => CompletionEstimate::ThreeToSevenDays,
            168..=335 => CompletionEstimate::OneToTwoWeeks,
            _ => CompletionEstimate::OverTwoWeeks,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CompletionEstimate::Immediate => "Immediate",
            CompletionEstimate::SameDay => "Same day",
            CompletionEstimate::OneToTwoDays => "1-2 days",
            CompletionEstimate::ThreeToSevenDays => "3-7 days",
            CompletionEstimate::OneToTwoWeeks => "1-2 weeks",
            CompletionEstimate::OverTwoWeeks => "2+ weeks",
        }
    }
}

// ---------------------------------------------------------------------------
// Confidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    /// Grade from the share of criteria resolved and the number left open.
    pub fn grade(coverage_percent: f64, missing: usize) -> Self {
        match (coverage_percent, missing) {
            (c, 0) if c >= 90.0 => ConfidenceLevel::VeryHigh,
            (c, m) if c >= 80.0 && m <= 1 => ConfidenceLevel::High,
            (c, m) if c >= 70.0 && m <= 2 => ConfidenceLevel::Medium,
            (c, m) if c >= 60.0 && m <= 3 => ConfidenceLevel::Low,
            _ => ConfidenceLevel::VeryLow,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceLevel::VeryHigh => "Very High",
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
            ConfidenceLevel::VeryLow => "Very Low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialCoverage {
    pub trial_id: String,
    pub total_criteria: usize,
    pub met: usize,
    pub failed: usize,
    pub missing: usize,
    /// Resolved criteria as a percentage of all criteria. 100 for a trial
    /// without criteria.
    pub coverage_percent: f64,
    pub confidence: ConfidenceLevel,
}

impl TrialCoverage {
    fn of(result: &MatchResult) -> Self {
        let b = &result.breakdown;
        let total = b.total_count();
        let coverage_percent = if total == 0 {
            100.0
        } else {
            (b.met_count + b.failed_count) as f64 / total as f64 * 100.0
        };
        Self {
            trial_id: result.trial_id.clone(),
            total_criteria: total,
            met: b.met_count,
            failed: b.failed_count,
            missing: b.unknown_count,
            coverage_percent,
            confidence: ConfidenceLevel::grade(coverage_percent, b.unknown_count),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub trials_evaluated: usize,
    pub trials_with_gaps: usize,
    /// Most frequently missing first, ties by field name.
    pub fields: Vec<FieldGap>,
    /// UNKNOWN verdicts per category.
    pub by_category: BTreeMap<Category, usize>,
    /// In the order the results were given.
    pub trials: Vec<TrialCoverage>,
    /// Most trials unblocked first, then most settled, then urgency, then field.
    pub priority_actions: Vec<PriorityAction>,
    pub estimated_completion: CompletionEstimate,
}

fn priority_actions(fields: &[FieldGap], results: &[MatchResult]) -> Vec<PriorityAction> {
    let mut settled: BTreeMap<&str, usize> = BTreeMap::new();
    for result in results {
        let mut open = result.verdicts.iter().filter(|v| v.is_unknown()).map(|v| v.predicate.field.as_str());
        if let Some(first) = open.next() {
            if open.all(|f| f == first) {
                *settled.entry(first).or_default() += 1;
            }
        }
    }

    let mut actions: Vec<PriorityAction> = fields
        .iter()
        .map(|gap| {
            let l = logistics_for(&gap.field);
            PriorityAction {
                field: gap.field.clone(),
                category: gap.category,
                action: gap.suggested_test.clone().unwrap_or_else(|| format!("obtain {}", gap.field)),
                urgency: l.urgency,
                turnaround: l.turnaround.to_string(),
                cost: l.cost.to_string(),
                trials_unblocked: gap.trials.len(),
                trials_settled: settled.get(gap.field.as_str()).copied().unwrap_or_default(),
            }
        })
        .collect();
    actions.sort_by(|a, b| {
        b.trials_unblocked
            .cmp(&a.trials_unblocked)
            .then_with(|| b.trials_settled.cmp(&a.trials_settled))
            .then_with(|| a.urgency.cmp(&b.urgency))
            .then_with(|| a.field.cmp(&b.field))
    });
    actions
}

pub fn coverage_report(results: &[MatchResult]) -> CoverageReport {
    let mut gaps: BTreeMap<&str, FieldGap> = BTreeMap::new();
    let mut by_category: BTreeMap<Category, usize> = BTreeMap::new();

    for result in results {
        for verdict in result.verdicts.iter().filter(|v| v.is_unknown()) {
            let p = &verdict.predicate;
            let gap = gaps.entry(p.field.as_str()).or_insert_with(|| FieldGap {
                field: p.field.clone(),
                category: p.category,
                unknown_count: 0,
                trials: Vec::new(),
                suggested_test: suggested_test(&p.field),
            });
            gap.unknown_count += 1;
            if !gap.trials.contains(&result.trial_id) {
                gap.trials.push(result.trial_id.clone());
            }
            *by_category.entry(p.category).or_default() += 1;
        }
    }

    let mut fields: Vec<FieldGap> = gaps.into_values().collect();
    for gap in &mut fields {
        gap.trials.sort();
    }
    // BTreeMap order already sorts by field; the stable sort keeps it for ties.
    fields.sort_by(|a, b| b.unknown_count.cmp(&a.unknown_count));

    let slowest = fields.iter().map(|g| logistics_for(&g.field).max_hours).max().unwrap_or_default();

    CoverageReport {
        trials_evaluated: results.len(),
        trials_with_gaps: results.iter().filter(|r| r.breakdown.unknown_count > 0).count(),
        priority_actions: priority_actions(&fields, results),
        estimated_completion: CompletionEstimate::from_hours(slowest),
        fields,
        by_category,
        trials: results.iter().map(TrialCoverage::of).collect(),
    }
}
