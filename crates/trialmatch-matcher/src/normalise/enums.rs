//! Categorical value normalisation.
//!
//! Maps the surface forms found in records and criteria ("POS", "Positive",
//! "pos.", "+") to one canonical token per domain.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use trialmatch_common::MatchError;

/// A vocabulary of categorical values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumDomain {
    BiomarkerStatus,
    Gender,
    Presence,
    Severity,
    ClinicalStatus,
}

impl EnumDomain {
    pub const ALL: [EnumDomain; 5] = [
        EnumDomain::BiomarkerStatus,
        EnumDomain::Gender,
        EnumDomain::Presence,
        EnumDomain::Severity,
        EnumDomain::ClinicalStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnumDomain::BiomarkerStatus => "biomarker_status",
            EnumDomain::Gender => "gender",
            EnumDomain::Presence => "presence",
            EnumDomain::Severity => "severity",
            EnumDomain::ClinicalStatus => "clinical_status",
        }
    }

    /// Domain governing the values of a feature field, if any.
    pub fn for_field(field: &str) -> Option<Self> {
        let (prefix, rest) = field.split_once('.').unwrap_or((field, ""));
        if rest.ends_with("severity") {
            return Some(EnumDomain::Severity);
        }
        if rest.ends_with("clinical_status") {
            return Some(EnumDomain::ClinicalStatus);
        }
        match prefix {
            "biomarker" => Some(EnumDomain::BiomarkerStatus),
            "demographics" if rest == "gender" || rest == "sex" => Some(EnumDomain::Gender),
            "comorbidity" | "condition" | "medication" => Some(EnumDomain::Presence),
            _ => None,
        }
    }

    /// Canonical tokens of the domain, in display order.
    pub fn tokens(&self) -> &'static [&'static str] {
        match self {
            EnumDomain::BiomarkerStatus => &["positive", "negative", "equivocal", "unknown"],
            EnumDomain::Gender => &["male", "female", "other", "unknown"],
            EnumDomain::Presence => &["true", "false"],
            EnumDomain::Severity => &["mild", "moderate", "severe"],
            EnumDomain::ClinicalStatus => &["active", "inactive", "resolved"],
        }
    }

    fn surface_forms(&self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            EnumDomain::BiomarkerStatus => &[
                ("positive", &["pos", "+", "detected", "mutated", "mutant", "amplified", "overexpressed", "3+"]),
                ("negative", &["neg", "-", "not detected", "undetected", "wild type", "wildtype", "wt", "0", "1+"]),
                ("equivocal", &["borderline", "indeterminate", "2+"]),
                ("unknown", &["unk", "not tested", "n/a", "na"]),
            ],
            EnumDomain::Gender => &[
                ("male", &["m", "man"]),
                ("female", &["f", "woman"]),
                ("other", &["o", "non-binary", "nonbinary"]),
                ("unknown", &["u", "unk"]),
            ],
            EnumDomain::Presence => &[
                ("true", &["yes", "y", "present", "positive", "1"]),
                ("false", &["no", "n", "absent", "negative", "0"]),
            ],
            EnumDomain::Severity => &[
                ("mild", &["grade 1", "low"]),
                ("moderate", &["grade 2", "medium"]),
                ("severe", &["grade 3", "grade 4", "high"]),
            ],
            EnumDomain::ClinicalStatus => &[
                ("active", &["current", "ongoing", "recurrence", "relapse"]),
                ("inactive", &["remission"]),
                ("resolved", &["cured", "past"]),
            ],
        }
    }
}

impl std::fmt::Display for EnumDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison key for free text: trimmed, lowercased, inner whitespace
/// collapsed, trailing `.`/`,`/`;`/`:` dropped.
pub fn fold(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', ',', ';', ':'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn table() -> &'static HashMap<(EnumDomain, String), &'static str> {
    static TABLE: OnceLock<HashMap<(EnumDomain, String), &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for domain in EnumDomain::ALL {
            for (canonical, forms) in domain.surface_forms() {
                map.insert((domain, canonical.to_string()), *canonical);
                for form in forms.iter() {
                    map.insert((domain, fold(form)), *canonical);
                }
            }
        }
        tracing::debug!("Enum table built: {} surface forms", map.len());
        map
    })
}

/// Canonical token for `raw` in `domain`.
pub fn normalise_enum(raw: &str, domain: EnumDomain) -> Result<&'static str, MatchError> {
    table()
        .get(&(domain, fold(raw)))
        .copied()
        .ok_or_else(|| MatchError::UnmappedEnumValue {
            domain: domain.as_str().to_string(),
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biomarker_surface_forms() {
        for raw in ["POS", "Positive", "pos.", "+", " positive "] {
            assert_eq!(normalise_enum(raw, EnumDomain::BiomarkerStatus).unwrap(), "positive", "{:?}", raw);
        }
        assert_eq!(normalise_enum("Not Detected", EnumDomain::BiomarkerStatus).unwrap(), "negative");
        assert_eq!(normalise_enum("-", EnumDomain::BiomarkerStatus).unwrap(), "negative");
    }

    #[test]
    fn test_gender_and_presence() {
        assert_eq!(normalise_enum("F", EnumDomain::Gender).unwrap(), "female");
        assert_eq!(normalise_enum("Man", EnumDomain::Gender).unwrap(), "male");
        assert_eq!(normalise_enum("Present", EnumDomain::Presence).unwrap(), "true");
        assert_eq!(normalise_enum("no", EnumDomain::Presence).unwrap(), "false");
    }

    #[test]
    fn test_canonical_tokens_map_to_themselves() {
        for domain in EnumDomain::ALL {
            for token in domain.tokens() {
                assert_eq!(normalise_enum(token, domain).unwrap(), *token);
            }
        }
    }

    #[test]
    fn test_unmapped_value() {
        let err = normalise_enum("sometimes", EnumDomain::BiomarkerStatus).unwrap_err();
        assert_eq!(
            err,
            MatchError::UnmappedEnumValue { domain: "biomarker_status".into(), value: "sometimes".into() }
        );
    }

    #[test]
    fn test_domain_for_field() {
        assert_eq!(EnumDomain::for_field("biomarker.HER2"), Some(EnumDomain::BiomarkerStatus));
        assert_eq!(EnumDomain::for_field("demographics.gender"), Some(EnumDomain::Gender));
        assert_eq!(EnumDomain::for_field("comorbidity.diabetes"), Some(EnumDomain::Presence));
        assert_eq!(EnumDomain::for_field("observation.pain_severity"), Some(EnumDomain::Severity));
        assert_eq!(EnumDomain::for_field("lab.hemoglobin"), None);
        assert_eq!(EnumDomain::for_field("observation.histology"), None);
    }
}
