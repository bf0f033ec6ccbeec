//! Ranking of match results.
//!
//! Total order:
//!   1. status: ELIGIBLE < INDETERMINATE < INELIGIBLE
//!   2. score, descending
//!   3. recruiting before non-recruiting
//!   4. trial id, ascending
//!
//! The sort is stable, so results that compare equal keep their input order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trialmatch_common::RankingConfig;

use crate::engine::{MatchResult, MatchStatus};

pub fn compare(a: &MatchResult, b: &MatchResult) -> Ordering {
    a.status
        .cmp(&b.status)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| {
            b.recruiting_status
                .is_recruiting()
                .cmp(&a.recruiting_status.is_recruiting())
        })
        .then_with(|| a.trial_id.cmp(&b.trial_id))
}

/// Order results by the ranking total order.
pub fn rank(mut results: Vec<MatchResult>) -> Vec<MatchResult> {
    results.sort_by(compare);
    results
}

/// A result with its 1-based position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTrial {
    pub rank: usize,
    /// Why this result follows the previous one despite equal status and score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break: Option<String>,
    #[serde(flatten)]
    pub result: MatchResult,
}

/// Rank, then apply the configured filters and cut-off.
pub fn rank_with(results: Vec<MatchResult>, options: &RankingConfig) -> Vec<RankedTrial> {
    let kept = rank(results)
        .into_iter()
        .filter(|r| options.include_ineligible || r.status != MatchStatus::Ineligible)
        .filter(|r| r.score >= options.min_score);
    let kept: Vec<MatchResult> = if options.top_n > 0 {
        kept.take(options.top_n).collect()
    } else {
        kept.collect()
    };

    let mut ranked: Vec<RankedTrial> = Vec::with_capacity(kept.len());
    for (i, result) in kept.into_iter().enumerate() {
        let tie_break = ranked.last().and_then(|prev| tie_break_reason(&prev.result, &result));
        ranked.push(RankedTrial { rank: i + 1, tie_break, result });
    }
    ranked
}

fn tie_break_reason(prev: &MatchResult, current: &MatchResult) -> Option<String> {
    if prev.status != current.status || prev.score.total_cmp(&current.score) != Ordering::Equal {
        return None;
    }
    if prev.recruiting_status.is_recruiting() != current.recruiting_status.is_recruiting() {
        Some(format!(
            "placed after {} on recruiting status ({})",
            prev.trial_id, prev.recruiting_status
        ))
    } else {
        Some(format!("placed after {} on trial id", prev.trial_id))
    }
}

/// Score band used in summaries.
pub fn score_band(score: f64) -> &'static str {
    match score {
        s if s >= 0.9 => "excellent",
        s if s >= 0.8 => "good",
        s if s >= 0.7 => "fair",
        s if s >= 0.6 => "marginal",
        _ => "low",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSummary {
    pub total: usize,
    pub eligible: usize,
    pub indeterminate: usize,
    pub ineligible: usize,
    pub average_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_trial: Option<String>,
    pub recruiting_status: BTreeMap<String, usize>,
    pub score_bands: BTreeMap<String, usize>,
}

pub fn ranking_summary(ranked: &[RankedTrial]) -> RankingSummary {
    let mut summary = RankingSummary {
        total: ranked.len(),
        top_trial: ranked.first().map(|r| r.result.trial_id.clone()),
        ..Default::default()
    };
    for r in ranked {
        match r.result.status {
            MatchStatus::Eligible => summary.eligible += 1,
            MatchStatus::Indeterminate => summary.indeterminate += 1,
            MatchStatus::Ineligible => summary.ineligible += 1,
        }
        *summary
            .recruiting_status
            .entry(r.result.recruiting_status.label().to_string())
            .or_default() += 1;
        *summary.score_bands.entry(score_band(r.result.score).to_string()).or_default() += 1;
    }
    if !ranked.is_empty() {
        summary.average_score = ranked.iter().map(|r| r.result.score).sum::<f64>() / ranked.len() as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::RecruitingStatus;
    use crate::weights::ScoreBreakdown;

    fn result(id: &str, status: MatchStatus, score: f64, recruiting: RecruitingStatus) -> MatchResult {
        MatchResult {
            trial_id: id.to_string(),
            status,
            score,
            recruiting_status: recruiting,
            blockers: vec![],
            missing_data: vec![],
            verdicts: vec![],
            breakdown: ScoreBreakdown::default(),
            metadata: Default::default(),
        }
    }

    fn ids(results: &[MatchResult]) -> Vec<&str> {
        results.iter().map(|r| r.trial_id.as_str()).collect()
    }

    #[test]
    fn test_status_dominates_score() {
        let ranked = rank(vec![
            result("C", MatchStatus::Ineligible, 0.9, RecruitingStatus::Recruiting),
            result("B", MatchStatus::Indeterminate, 1.0, RecruitingStatus::Recruiting),
            result("A", MatchStatus::Eligible, 0.5, RecruitingStatus::Completed),
        ]);
        assert_eq!(ids(&ranked), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_tie_breaks() {
        let ranked = rank(vec![
            result("NCT3", MatchStatus::Eligible, 0.8, RecruitingStatus::Recruiting),
            result("NCT2", MatchStatus::Eligible, 0.8, RecruitingStatus::Completed),
            result("NCT1", MatchStatus::Eligible, 0.8, RecruitingStatus::Recruiting),
            result("NCT4", MatchStatus::Eligible, 0.9, RecruitingStatus::Unknown),
        ]);
        assert_eq!(ids(&ranked), vec!["NCT4", "NCT1", "NCT3", "NCT2"]);
    }

    #[test]
    fn test_rank_with_filters_and_notes() {
        let ranked = rank_with(
            vec![
                result("X", MatchStatus::Ineligible, 0.9, RecruitingStatus::Recruiting),
                result("B", MatchStatus::Eligible, 0.8, RecruitingStatus::Completed),
                result("A", MatchStatus::Eligible, 0.8, RecruitingStatus::Recruiting),
                result("L", MatchStatus::Indeterminate, 0.1, RecruitingStatus::Recruiting),
            ],
            &RankingConfig { min_score: 0.5, include_ineligible: false, top_n: 0 },
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].result.trial_id, "A");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].tie_break, None);
        assert_eq!(ranked[1].rank, 2);
        assert!(ranked[1].tie_break.as_deref().unwrap().contains("recruiting status"));
    }

    #[test]
    fn test_top_n() {
        let ranked = rank_with(
            vec![
                result("A", MatchStatus::Eligible, 1.0, RecruitingStatus::Recruiting),
                result("B", MatchStatus::Eligible, 0.9, RecruitingStatus::Recruiting),
                result("C", MatchStatus::Eligible, 0.8, RecruitingStatus::Recruiting),
            ],
            &RankingConfig { top_n: 2, ..Default::default() },
        );
        assert_eq!(ranked.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_summary_counts() {
        let ranked = rank_with(
            vec![
                result("A", MatchStatus::Eligible, 1.0, RecruitingStatus::Recruiting),
                result("B", MatchStatus::Indeterminate, 0.65, RecruitingStatus::NotYetRecruiting),
                result("C", MatchStatus::Ineligible, 0.25, RecruitingStatus::Recruiting),
            ],
            &RankingConfig::default(),
        );
        let summary = ranking_summary(&ranked);
        assert_eq!(summary.total, 3);
        assert_eq!((summary.eligible, summary.indeterminate, summary.ineligible), (1, 1, 1));
        assert_eq!(summary.top_trial.as_deref(), Some("A"));
        assert_eq!(summary.recruiting_status["Recruiting"], 2);
        assert_eq!(summary.score_bands["marginal"], 1);
        assert!((summary.average_score - 0.633333).abs() < 1e-4);
    }
}
