//! Tri-state predicate evaluation.
//!
//! A predicate is SATISFIED or VIOLATED only when the patient's value could
//! be resolved and compared. A missing field, a unit that cannot be
//! converted, an unmapped categorical value or an incompatible comparison
//! all yield UNKNOWN with the cause attached. Nothing is guessed.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use trialmatch_common::fhir::parse_date;
use trialmatch_common::{MatchError, ScoringConfig};

use crate::features::{FeatureMap, FeatureValue};
use crate::normalise::{self, EnumDomain};
use crate::predicate::{Literal, Operand, Operator, Predicate};

/// Relative tolerance for numeric equality.
const NUMERIC_EQ_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Satisfied,
    Violated,
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Satisfied => "SATISFIED",
            Verdict::Violated => "VIOLATED",
            Verdict::Unknown => "UNKNOWN",
        }
    }
}

/// Why a predicate could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnknownCause {
    MissingField,
    Failed { error: MatchError },
}

impl std::fmt::Display for UnknownCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnknownCause::MissingField => f.write_str("field missing from patient record"),
            UnknownCause::Failed { error } => write!(f, "{}", error),
        }
    }
}

/// Outcome of one predicate against one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateVerdict {
    pub predicate: Predicate,
    pub verdict: Verdict,
    /// Patient value actually compared, after unit conversion and enum
    /// normalisation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<FeatureValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<UnknownCause>,
}

impl PredicateVerdict {
    fn resolved(predicate: &Predicate, holds: bool, observed: Option<FeatureValue>) -> Self {
        Self {
            predicate: predicate.clone(),
            verdict: if holds { Verdict::Satisfied } else { Verdict::Violated },
            observed,
            cause: None,
        }
    }

    fn unknown(predicate: &Predicate, cause: UnknownCause, observed: Option<FeatureValue>) -> Self {
        Self {
            predicate: predicate.clone(),
            verdict: Verdict::Unknown,
            observed,
            cause: Some(cause),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.verdict == Verdict::Unknown
    }
}

/// Switches that change how missing data is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// `absent` on a field missing from the record is SATISFIED instead of UNKNOWN.
    pub missing_satisfies_absent: bool,
}

impl EvalOptions {
    /// Every operator on a missing field is UNKNOWN.
    pub const STRICT: Self = Self { missing_satisfies_absent: false };
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for EvalOptions {
    fn from(scoring: &ScoringConfig) -> Self {
        Self { missing_satisfies_absent: scoring.missing_satisfies_absent }
    }
}

/// Evaluate one predicate against a patient's features.
pub fn evaluate(predicate: &Predicate, features: &FeatureMap, options: EvalOptions) -> PredicateVerdict {
    let Some(value) = features.get(&predicate.field) else {
        if predicate.operator == Operator::Absent && options.missing_satisfies_absent {
            return PredicateVerdict::resolved(predicate, true, None);
        }
        return PredicateVerdict::unknown(predicate, UnknownCause::MissingField, None);
    };

    match check(predicate, value) {
        Ok((holds, observed)) => PredicateVerdict::resolved(predicate, holds, Some(observed)),
        Err(error) => PredicateVerdict::unknown(predicate, UnknownCause::Failed { error }, Some(value.clone())),
    }
}

fn check(p: &Predicate, value: &FeatureValue) -> Result<(bool, FeatureValue), MatchError> {
    match (p.operator, &p.operand) {
        (Operator::Present, _) => Ok((value.is_present(), value.clone())),
        (Operator::Absent, _) => Ok((!value.is_present(), value.clone())),

        (Operator::Eq, Operand::Single(lit)) => equals(p, value, lit),
        (Operator::Ne, Operand::Single(lit)) => equals(p, value, lit).map(|(eq, obs)| (!eq, obs)),

        (Operator::InSet | Operator::NotInSet, Operand::Set(items)) => {
            let mut observed = value.clone();
            let mut hit = false;
            for lit in items {
                let (eq, obs) = equals(p, value, lit)?;
                observed = obs;
                if eq {
                    hit = true;
                    break;
                }
            }
            let holds = if p.operator == Operator::InSet { hit } else { !hit };
            Ok((holds, observed))
        }

        (op, Operand::Single(lit)) if op.is_ordering() => {
            let (ord, observed) = ordering(p, value, lit)?;
            let holds = match op {
                Operator::Gte => ord != Ordering::Less,
                Operator::Lte => ord != Ordering::Greater,
                Operator::Gt => ord == Ordering::Greater,
                _ => ord == Ordering::Less,
            };
            Ok((holds, observed))
        }

        (Operator::Range, Operand::Range { min, max }) => {
            let (v, observed) = numeric(p, value)?;
            let holds = compare_f64(v, *min) != Ordering::Less && compare_f64(v, *max) != Ordering::Greater;
            Ok((holds, observed))
        }

        (op, operand) => Err(MatchError::type_mismatch(
            &p.field,
            format!("operand suited to '{}'", op),
            format!("{:?}", operand),
        )),
    }
}

fn describe_literal(lit: &Literal) -> String {
    format!("{} '{}'", lit.kind(), lit)
}

/// Equality after normalising both sides into the field's domain.
fn equals(p: &Predicate, value: &FeatureValue, lit: &Literal) -> Result<(bool, FeatureValue), MatchError> {
    match value {
        FeatureValue::Numeric { .. } => {
            let expected = literal_number(lit).ok_or_else(|| {
                MatchError::type_mismatch(&p.field, "numeric operand", describe_literal(lit))
            })?;
            let (v, observed) = numeric(p, value)?;
            Ok((compare_f64(v, expected) == Ordering::Equal, observed))
        }

        FeatureValue::Enumerated { value: raw } => {
            let expected = match lit {
                Literal::Text(s) => s.clone(),
                Literal::Bool(b) => b.to_string(),
                Literal::Number(n) => n.to_string(),
            };
            match EnumDomain::for_field(&p.field) {
                Some(domain) => {
                    let have = normalise::normalise_enum(raw, domain)?;
                    let want = normalise::normalise_enum(&expected, domain)?;
                    Ok((have == want, FeatureValue::enumerated(have)))
                }
                None => {
                    let have = normalise::fold(raw);
                    Ok((have == normalise::fold(&expected), FeatureValue::enumerated(have)))
                }
            }
        }

        FeatureValue::Presence { present } => {
            let expected = match lit {
                Literal::Bool(b) => *b,
                Literal::Text(s) => normalise::normalise_enum(s, EnumDomain::Presence)? == "true",
                Literal::Number(_) => {
                    return Err(MatchError::type_mismatch(&p.field, "presence operand", describe_literal(lit)))
                }
            };
            Ok((*present == expected, value.clone()))
        }

        FeatureValue::Date { value: date } => {
            let expected = literal_date(lit)
                .ok_or_else(|| MatchError::type_mismatch(&p.field, "ISO date operand", describe_literal(lit)))?;
            Ok((*date == expected, value.clone()))
        }
    }
}

fn ordering(p: &Predicate, value: &FeatureValue, lit: &Literal) -> Result<(Ordering, FeatureValue), MatchError> {
    match value {
        FeatureValue::Numeric { .. } => {
            let expected = literal_number(lit).ok_or_else(|| {
                MatchError::type_mismatch(&p.field, "numeric operand", describe_literal(lit))
            })?;
            let (v, observed) = numeric(p, value)?;
            Ok((compare_f64(v, expected), observed))
        }
        FeatureValue::Date { value: date } => {
            let expected = literal_date(lit)
                .ok_or_else(|| MatchError::type_mismatch(&p.field, "ISO date operand", describe_literal(lit)))?;
            Ok((date.cmp(&expected), value.clone()))
        }
        other => Err(MatchError::type_mismatch(
            &p.field,
            "numeric or date value",
            format!("{} value '{}'", other.kind(), other),
        )),
    }
}

/// The patient's numeric value expressed in the predicate's unit.
fn numeric(p: &Predicate, value: &FeatureValue) -> Result<(f64, FeatureValue), MatchError> {
    let FeatureValue::Numeric { value: v, unit } = value else {
        return Err(MatchError::type_mismatch(
            &p.field,
            "numeric value",
            format!("{} value '{}'", value.kind(), value),
        ));
    };
    match (p.unit.as_deref(), unit.as_deref()) {
        (None, _) => Ok((*v, value.clone())),
        (Some(want), Some(have)) if normalise::same_unit(want, have) => {
            Ok((*v, FeatureValue::numeric(*v, Some(want))))
        }
        (Some(want), Some(have)) => {
            let test_type = p
                .field
                .strip_prefix("lab.")
                .ok_or_else(|| MatchError::unsupported_unit(&p.field, want))?;
            let converted = normalise::convert(*v, have, want, test_type)?;
            Ok((converted, FeatureValue::numeric(converted, Some(want))))
        }
        (Some(want), None) => Err(MatchError::unsupported_unit(&p.field, want)),
    }
}

fn literal_number(lit: &Literal) -> Option<f64> {
    match lit {
        Literal::Number(n) => Some(*n),
        Literal::Text(s) => s.trim().parse().ok(),
        Literal::Bool(_) => None,
    }
}

fn literal_date(lit: &Literal) -> Option<NaiveDate> {
    match lit {
        Literal::Text(s) => parse_date(s),
        _ => None,
    }
}

/// Total order on finite values with relative-tolerance equality.
fn compare_f64(a: f64, b: f64) -> Ordering {
    let scale = a.abs().max(b.abs()).max(1.0);
    if (a - b).abs() <= NUMERIC_EQ_TOLERANCE * scale {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{PredicateDef, Role};
    use serde_json::json;

    fn pred(field: &str, op: &str, value: serde_json::Value, unit: Option<&str>) -> Predicate {
        let mut def = PredicateDef::new(field, op, value);
        def.unit = unit.map(str::to_string);
        def.compile("T1", Role::Inclusion, 0, &ScoringConfig::default()).unwrap()
    }

    fn features(pairs: Vec<(&str, FeatureValue)>) -> FeatureMap {
        pairs.into_iter().collect()
    }

    fn eval(p: &Predicate, f: &FeatureMap) -> PredicateVerdict {
        evaluate(p, f, EvalOptions::default())
    }

    #[test]
    fn test_hemoglobin_converted_to_predicate_unit() {
        let p = pred("lab.hemoglobin", ">=", json!(10), Some("g/dL"));
        let f = features(vec![("lab.hemoglobin", FeatureValue::numeric(130.0, Some("g/L")))]);
        let v = eval(&p, &f);
        assert_eq!(v.verdict, Verdict::Satisfied);
        match v.observed {
            Some(FeatureValue::Numeric { value, unit }) => {
                assert!((value - 13.0).abs() < 1e-9);
                assert_eq!(unit.as_deref(), Some("g/dL"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_her2_surface_form_matches() {
        let p = pred("biomarker.HER2", "==", json!("positive"), None);
        let f = features(vec![("biomarker.HER2", FeatureValue::enumerated("POS"))]);
        assert_eq!(eval(&p, &f).verdict, Verdict::Satisfied);

        let p = pred("biomarker.HER2", "!=", json!("Positive"), None);
        assert_eq!(eval(&p, &f).verdict, Verdict::Violated);
    }

    #[test]
    fn test_missing_field_is_unknown_for_every_operator_when_strict() {
        let f = FeatureMap::default();
        for (op, value) in [
            ("==", json!("positive")),
            ("!=", json!("positive")),
            (">=", json!(1)),
            ("present", json!(null)),
            ("absent", json!(null)),
            ("in", json!(["positive"])),
            ("not_in", json!(["positive"])),
            ("range", json!([1, 2])),
        ] {
            let v = evaluate(&pred("biomarker.EGFR", op, value, None), &f, EvalOptions::STRICT);
            assert_eq!(v.verdict, Verdict::Unknown, "operator {}", op);
            assert_eq!(v.cause, Some(UnknownCause::MissingField));
        }
    }

    #[test]
    fn test_absent_on_missing_field_is_satisfied_by_default() {
        let p = pred("comorbidity.hiv", "absent", json!(null), None);
        let v = evaluate(&p, &FeatureMap::default(), EvalOptions::default());
        assert_eq!(v.verdict, Verdict::Satisfied);
        assert!(v.observed.is_none());

        let v = evaluate(&p, &FeatureMap::default(), EvalOptions::STRICT);
        assert_eq!(v.verdict, Verdict::Unknown);

        let p = pred("comorbidity.hiv", "present", json!(null), None);
        let v = evaluate(&p, &FeatureMap::default(), EvalOptions::default());
        assert_eq!(v.verdict, Verdict::Unknown);
    }

    #[test]
    fn test_presence_operators() {
        let f = features(vec![
            ("comorbidity.diabetes", FeatureValue::presence(true)),
            ("comorbidity.hepatitis", FeatureValue::presence(false)),
        ]);
        assert_eq!(eval(&pred("comorbidity.diabetes", "==", json!("present"), None), &f).verdict, Verdict::Satisfied);
        assert_eq!(eval(&pred("comorbidity.diabetes", "present", json!(null), None), &f).verdict, Verdict::Satisfied);
        assert_eq!(eval(&pred("comorbidity.hepatitis", "absent", json!(null), None), &f).verdict, Verdict::Satisfied);
        assert_eq!(eval(&pred("comorbidity.hepatitis", "==", json!(true), None), &f).verdict, Verdict::Violated);
    }

    #[test]
    fn test_set_membership_normalises_both_sides() {
        let f = features(vec![("demographics.gender", FeatureValue::enumerated("F"))]);
        assert_eq!(
            eval(&pred("demographics.gender", "in", json!(["Woman", "other"]), None), &f).verdict,
            Verdict::Satisfied
        );
        assert_eq!(
            eval(&pred("demographics.gender", "not_in", json!(["male"]), None), &f).verdict,
            Verdict::Satisfied
        );
    }

    #[test]
    fn test_unconvertible_unit_is_unknown() {
        let p = pred("lab.hemoglobin", ">=", json!(10), Some("furlongs"));
        let f = features(vec![("lab.hemoglobin", FeatureValue::numeric(130.0, Some("g/L")))]);
        let v = eval(&p, &f);
        assert_eq!(v.verdict, Verdict::Unknown);
        assert!(matches!(
            v.cause,
            Some(UnknownCause::Failed { error: MatchError::UnsupportedUnit { .. } })
        ));
    }

    #[test]
    fn test_type_mismatch_is_unknown_not_panic() {
        let p = pred("biomarker.HER2", ">", json!(2), None);
        let f = features(vec![("biomarker.HER2", FeatureValue::enumerated("positive"))]);
        let v = eval(&p, &f);
        assert_eq!(v.verdict, Verdict::Unknown);
        assert!(matches!(
            v.cause,
            Some(UnknownCause::Failed { error: MatchError::TypeMismatch { .. } })
        ));
    }

    #[test]
    fn test_unmapped_patient_value_is_unknown() {
        let p = pred("biomarker.HER2", "==", json!("positive"), None);
        let f = features(vec![("biomarker.HER2", FeatureValue::enumerated("sort of"))]);
        let v = eval(&p, &f);
        assert!(matches!(
            v.cause,
            Some(UnknownCause::Failed { error: MatchError::UnmappedEnumValue { .. } })
        ));
    }

    #[test]
    fn test_numeric_boundaries_and_range() {
        let f = features(vec![("performance.ecog", FeatureValue::numeric(2.0, None))]);
        assert_eq!(eval(&pred("performance.ecog", "<=", json!(2), None), &f).verdict, Verdict::Satisfied);
        assert_eq!(eval(&pred("performance.ecog", "<", json!(2), None), &f).verdict, Verdict::Violated);
        assert_eq!(eval(&pred("performance.ecog", "range", json!([0, 1]), None), &f).verdict, Verdict::Violated);
        assert_eq!(eval(&pred("performance.ecog", "==", json!(2.0000000001), None), &f).verdict, Verdict::Satisfied);
    }

    #[test]
    fn test_date_comparison() {
        let born = NaiveDate::from_ymd_opt(1990, 5, 1).unwrap();
        let f = features(vec![("demographics.birth_date", FeatureValue::Date { value: born })]);
        assert_eq!(
            eval(&pred("demographics.birth_date", "<", json!("2006-01-01"), None), &f).verdict,
            Verdict::Satisfied
        );
    }

    #[test]
    fn test_unit_without_feature_unit_is_unknown() {
        let p = pred("vital.body_weight", ">", json!(50), Some("kg"));
        let f = features(vec![("vital.body_weight", FeatureValue::numeric(70.0, None))]);
        assert_eq!(eval(&p, &f).verdict, Verdict::Unknown);
    }
}
