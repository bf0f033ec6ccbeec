//! Matcher configuration.
//!
//! Controls default predicate weights per category, ranking filters,
//! recommendation thresholds and batch parallelism. Loaded from the
//! `[scoring]`, `[ranking]`, `[explain]` and `[execution]` tables of
//! `trialmatch.toml`, or from a standalone YAML/JSON document.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrialMatchError};

/// Complete matcher configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Default weights and evaluation switches
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Ranking filters
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Recommendation thresholds
    #[serde(default)]
    pub explain: ExplainConfig,

    /// Batch execution options
    #[serde(default)]
    pub execution: ExecutionConfig,
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Weight applied to a predicate that does not carry its own, by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_demographics_weight")]
    pub demographics_weight: f64,
    #[serde(default = "default_condition_weight")]
    pub condition_weight: f64,
    #[serde(default = "default_comorbidity_weight")]
    pub comorbidity_weight: f64,
    #[serde(default = "default_biomarker_weight")]
    pub biomarker_weight: f64,
    #[serde(default = "default_unit_weight")]
    pub lab_weight: f64,
    #[serde(default = "default_unit_weight")]
    pub medication_weight: f64,
    #[serde(default = "default_performance_weight")]
    pub performance_weight: f64,
    #[serde(default = "default_unit_weight")]
    pub vital_weight: f64,
    #[serde(default = "default_unit_weight")]
    pub other_weight: f64,

    /// Treat a field missing from the record as explicitly absent for the
    /// `absent` operator. Set to false to keep every check on missing data
    /// UNKNOWN.
    #[serde(default = "default_true")]
    pub missing_satisfies_absent: bool,
}

fn default_demographics_weight() -> f64 { 2.0 }
fn default_condition_weight()    -> f64 { 5.0 }
fn default_comorbidity_weight()  -> f64 { 3.0 }
fn default_biomarker_weight()    -> f64 { 3.0 }
fn default_performance_weight()  -> f64 { 2.0 }
fn default_unit_weight()         -> f64 { 1.0 }
fn default_true()                -> bool { true }

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            demographics_weight: default_demographics_weight(),
            condition_weight:    default_condition_weight(),
            comorbidity_weight:  default_comorbidity_weight(),
            biomarker_weight:    default_biomarker_weight(),
            lab_weight:          default_unit_weight(),
            medication_weight:   default_unit_weight(),
            performance_weight:  default_performance_weight(),
            vital_weight:        default_unit_weight(),
            other_weight:        default_unit_weight(),
            missing_satisfies_absent: default_true(),
        }
    }
}

impl ScoringConfig {
    fn weights(&self) -> [(&'static str, f64); 9] {
        [
            ("demographics_weight", self.demographics_weight),
            ("condition_weight",    self.condition_weight),
            ("comorbidity_weight",  self.comorbidity_weight),
            ("biomarker_weight",    self.biomarker_weight),
            ("lab_weight",          self.lab_weight),
            ("medication_weight",   self.medication_weight),
            ("performance_weight",  self.performance_weight),
            ("vital_weight",        self.vital_weight),
            ("other_weight",        self.other_weight),
        ]
    }
}

// ── Ranking ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Results scoring below this are dropped from ranked output.
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "bool_true")]
    pub include_ineligible: bool,
    /// Keep only the first N ranked results (0 = all).
    #[serde(default)]
    pub top_n: usize,
}

fn bool_true() -> bool { true }

impl Default for RankingConfig {
    fn default() -> Self {
        Self { min_score: 0.0, include_ineligible: true, top_n: 0 }
    }
}

// ── Explanation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainConfig {
    #[serde(default = "default_strong_threshold")]
    pub strong_threshold: f64,
    #[serde(default = "default_recommended_threshold")]
    pub recommended_threshold: f64,
}

fn default_strong_threshold()      -> f64 { 0.95 }
fn default_recommended_threshold() -> f64 { 0.80 }

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            strong_threshold: default_strong_threshold(),
            recommended_threshold: default_recommended_threshold(),
        }
    }
}

// ── Execution ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Worker threads for batch evaluation (0 = rayon default).
    #[serde(default)]
    pub parallel_workers: usize,
}

impl MatcherConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML string.
    pub fn from_toml(src: &str) -> Result<Self> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Export to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject weights and thresholds the engine cannot use.
    pub fn validate(&self) -> Result<()> {
        for (name, w) in self.scoring.weights() {
            if !w.is_finite() || w < 0.0 {
                return Err(TrialMatchError::Config(format!(
                    "scoring.{} must be a finite non-negative number, got {}",
                    name, w
                )));
            }
        }
        let unit_interval = |name: &str, v: f64| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(TrialMatchError::Config(format!("{} must lie in [0, 1], got {}", name, v)))
            }
        };
        unit_interval("ranking.min_score", self.ranking.min_score)?;
        unit_interval("explain.strong_threshold", self.explain.strong_threshold)?;
        unit_interval("explain.recommended_threshold", self.explain.recommended_threshold)?;
        if self.explain.recommended_threshold > self.explain.strong_threshold {
            return Err(TrialMatchError::Config(
                "explain.recommended_threshold must not exceed explain.strong_threshold".to_string(),
            ));
        }
        Ok(())
    }
}
