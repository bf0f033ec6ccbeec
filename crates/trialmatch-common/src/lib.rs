//! trialmatch-common — Shared types, errors, and configuration used across all trialmatch crates.

pub mod error;
pub mod fhir;
pub mod matcher_config;

// Re-export commonly used types
pub use error::{MatchError, Result, TrialMatchError};
pub use fhir::{Bundle, CodeableConcept, Coding, Quantity, Resource};
pub use matcher_config::{ExecutionConfig, ExplainConfig, MatcherConfig, RankingConfig, ScoringConfig};
