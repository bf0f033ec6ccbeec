//! trialmatch-matcher — Eligibility matching and scoring engine.
//! Patient bundle → features → predicate verdicts → trial status and score → ranking.

pub mod normalise;
pub mod features;
pub mod predicate;
pub mod evaluate;
pub mod weights;
pub mod trial;
pub mod engine;
pub mod rank;
pub mod explain;
pub mod coverage;

use chrono::NaiveDate;
use rayon::ThreadPool;
use tracing::info;
use trialmatch_common::{Bundle, MatchError, MatcherConfig, Result, TrialMatchError};

pub use engine::{BatchOutcome, MatchResult, MatchStatus, TrialFailure};
pub use evaluate::{PredicateVerdict, UnknownCause, Verdict};
pub use features::{extract_features, FeatureMap, FeatureValue};
pub use predicate::{Category, Operator, Predicate, PredicateDef, Role};
pub use trial::{RecruitingStatus, TrialCatalog, TrialCriteria};

/// Matching entry point carrying configuration and, when a worker count is
/// configured, a dedicated rayon pool.
pub struct TrialMatcher {
    config: MatcherConfig,
    pool: Option<ThreadPool>,
}

impl TrialMatcher {
    pub fn new(config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        let pool = match config.execution.parallel_workers {
            0 => None,
            workers => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("trialmatch-{}", i))
                    .build()
                    .map_err(|e| TrialMatchError::Config(format!("failed to build worker pool: {}", e)))?;
                info!("Using {} matcher workers", workers);
                Some(pool)
            }
        };
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn evaluate_trial(&self, trial: &TrialCriteria, features: &FeatureMap) -> std::result::Result<MatchResult, MatchError> {
        engine::evaluate_trial(trial, features, &self.config)
    }

    pub fn evaluate_batch(&self, trials: &[TrialCriteria], features: &FeatureMap) -> BatchOutcome {
        match &self.pool {
            Some(pool) => pool.install(|| engine::evaluate_batch(trials, features, &self.config)),
            None => engine::evaluate_batch(trials, features, &self.config),
        }
    }

    /// Extract features from `bundle` as of `as_of` and evaluate every trial.
    pub fn match_patient(&self, bundle: &Bundle, as_of: NaiveDate, trials: &[TrialCriteria]) -> BatchOutcome {
        let features = extract_features(bundle, as_of);
        self.evaluate_batch(trials, &features)
    }
}

impl Default for TrialMatcher {
    fn default() -> Self {
        Self { config: MatcherConfig::default(), pool: None }
    }
}
