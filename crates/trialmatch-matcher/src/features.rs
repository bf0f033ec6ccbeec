//! Feature extraction.
//!
//! Flattens a FHIR-shaped patient bundle into a typed mapping keyed by
//! dotted field paths (`lab.hemoglobin`, `biomarker.HER2`,
//! `comorbidity.diabetes`). Lab values are stored in their canonical unit;
//! categorical values are stored as canonical tokens where the domain
//! recognises them. The mapping is built once per patient and never mutated.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;
use trialmatch_common::fhir::{self, Bundle, Condition, Observation, Patient, Resource};

use crate::normalise::{self, EnumDomain};

// ---------------------------------------------------------------------------
// Feature values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureValue {
    Numeric {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Enumerated { value: String },
    Presence { present: bool },
    Date { value: NaiveDate },
}

impl FeatureValue {
    pub fn numeric(value: f64, unit: Option<&str>) -> Self {
        FeatureValue::Numeric { value, unit: unit.map(str::to_string) }
    }

    pub fn enumerated(value: impl Into<String>) -> Self {
        FeatureValue::Enumerated { value: value.into() }
    }

    pub fn presence(present: bool) -> Self {
        FeatureValue::Presence { present }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeatureValue::Numeric { .. } => "numeric",
            FeatureValue::Enumerated { .. } => "enumerated",
            FeatureValue::Presence { .. } => "presence",
            FeatureValue::Date { .. } => "date",
        }
    }

    /// False only for a field recorded as explicitly absent.
    pub fn is_present(&self) -> bool {
        !matches!(self, FeatureValue::Presence { present: false })
    }
}

impl std::fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureValue::Numeric { value, unit: Some(unit) } => write!(f, "{} {}", round4(*value), unit),
            FeatureValue::Numeric { value, unit: None } => write!(f, "{}", round4(*value)),
            FeatureValue::Enumerated { value } => f.write_str(value),
            FeatureValue::Presence { present: true } => f.write_str("present"),
            FeatureValue::Presence { present: false } => f.write_str("absent"),
            FeatureValue::Date { value } => write!(f, "{}", value),
        }
    }
}

pub(crate) fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}

/// Immutable field path → value mapping for one patient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureMap {
    fields: BTreeMap<String, FeatureValue>,
}

impl FeatureMap {
    pub fn get(&self, field: &str) -> Option<&FeatureValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, FeatureValue)> for FeatureMap {
    fn from_iter<I: IntoIterator<Item = (K, FeatureValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Field path helpers
// ---------------------------------------------------------------------------

/// Lowercase identifier with runs of non-alphanumerics collapsed to `_`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Canonical spelling of a field path as written in criteria:
/// `biomarker.pd-l1` → `biomarker.PDL1`, `lab.HGB` → `lab.hemoglobin`,
/// `Comorbidity.Heart Disease` → `comorbidity.heart_disease`.
pub fn canonical_field(path: &str) -> String {
    let path = path.trim();
    let Some((prefix, rest)) = path.split_once('.') else {
        return slug(path);
    };
    let prefix = prefix.trim().to_lowercase();
    match prefix.as_str() {
        "biomarker" => {
            let symbol = biomarker_symbol(rest)
                .map(str::to_string)
                .unwrap_or_else(|| compact(rest).to_uppercase());
            format!("biomarker.{}", symbol)
        }
        "lab" => match normalise::canonical_test_type(rest) {
            Some(test) => format!("lab.{}", test),
            None => format!("lab.{}", slug(rest)),
        },
        _ => format!("{}.{}", prefix, slug(rest)),
    }
}

fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ── Vocabularies ─────────────────────────────────────────────────────────────

/// Biomarker symbol → compacted aliases.
const BIOMARKERS: &[(&str, &[&str])] = &[
    ("HER2", &["her2", "erbb2", "her2neu", "neu"]),
    ("EGFR", &["egfr"]),
    ("ALK", &["alk"]),
    ("KRAS", &["kras"]),
    ("BRAF", &["braf"]),
    ("PDL1", &["pdl1", "cd274"]),
    ("MSI", &["msi", "microsatelliteinstability"]),
    ("TMB", &["tmb", "tumormutationalburden", "tumourmutationalburden"]),
    ("ER", &["er", "estrogen", "oestrogen"]),
    ("PR", &["pr", "progesterone"]),
    ("ROS1", &["ros1"]),
    ("NTRK", &["ntrk"]),
    ("BRCA1", &["brca1"]),
    ("BRCA2", &["brca2"]),
];

/// Biomarkers reported as a measured quantity rather than a status.
const QUANTITATIVE_BIOMARKERS: &[&str] = &["PDL1", "TMB"];

const BIOMARKER_NOISE: &[&str] = &[
    "status", "mutation", "expression", "result", "test", "gene", "amplification",
    "receptor", "rearrangement", "fusion", "ihc", "fish", "ish", "level",
];

fn biomarker_symbol(name: &str) -> Option<&'static str> {
    let lowered = name.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let significant: String = words
        .iter()
        .copied()
        .filter(|w| !BIOMARKER_NOISE.contains(w))
        .collect();
    let first = words.first().copied().unwrap_or_default();
    let symbol = [significant.as_str(), first]
        .into_iter()
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| {
            BIOMARKERS
                .iter()
                .find(|(_, aliases)| aliases.contains(&candidate))
                .map(|(symbol, _)| *symbol)
        });
    symbol
}

/// Comorbidity slug → phrases that identify it inside a condition name.
const COMORBIDITIES: &[(&str, &[&str])] = &[
    ("diabetes", &["diabetes"]),
    ("hypertension", &["hypertension", "high blood pressure"]),
    ("heart_disease", &["heart disease", "heart failure", "coronary", "myocardial infarction", "cardiomyopathy"]),
    ("kidney_disease", &["kidney disease", "renal disease", "renal failure", "renal insufficiency"]),
    ("liver_disease", &["liver disease", "cirrhosis", "hepatic failure"]),
    ("lung_disease", &["lung disease", "copd", "pulmonary fibrosis", "emphysema"]),
    ("autoimmune_disease", &["autoimmune", "lupus", "rheumatoid arthritis"]),
    ("hiv", &["hiv", "human immunodeficiency virus"]),
    ("hepatitis", &["hepatitis"]),
    ("tuberculosis", &["tuberculosis"]),
];

fn comorbidity_slug(name: &str) -> Option<&'static str> {
    let folded = normalise::fold(name);
    COMORBIDITIES
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|p| contains_phrase(&folded, p)))
        .map(|(slug, _)| *slug)
}

/// Word-boundary phrase search on already-folded text.
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Words that name a different analyte or specimen than the plain test
/// ("Cholesterol in HDL", "Creatinine [Mass/volume] in Urine").
const LAB_QUALIFIERS: &[&str] = &[
    "hdl", "ldl", "vldl", "urine", "urinary", "24h", "24 hour", "24 hr", "csf", "cerebrospinal",
    "pleural", "peritoneal", "ascites", "clearance", "ratio", "a1c", "glycated", "ionized",
    "direct", "indirect", "conjugated",
];

fn has_lab_qualifier(name: &str) -> bool {
    let folded = normalise::fold(name);
    LAB_QUALIFIERS.iter().any(|q| contains_phrase(&folded, q))
}

/// Resolve an observation name to a supported lab test: the whole name,
/// then its first two words. Bracketed property/scale parts ("Hemoglobin
/// [Mass/volume] in Blood") are ignored, but a qualifier anywhere in the
/// name rules the mapping out.
fn lab_test_for(name: &str) -> Option<&'static str> {
    if has_lab_qualifier(name) {
        return None;
    }
    let head = name.split('[').next().unwrap_or(name);
    let words: Vec<&str> = head.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    normalise::canonical_test_type(head)
        .or_else(|| words.get(..2).and_then(|w| normalise::canonical_test_type(&w.join(" "))))
}

/// LOINC codes for the two performance scales.
const ECOG_LOINC: &str = "89247-1";
const KARNOFSKY_LOINC: &str = "89243-0";

/// Lowest Karnofsky score for each ECOG grade, best grade first.
const KARNOFSKY_TO_ECOG: &[(u32, u32)] = &[(90, 0), (70, 1), (50, 2), (30, 3), (10, 4), (0, 5)];

#[derive(Debug, Clone, Copy, PartialEq)]
enum PerformanceScale {
    Ecog,
    Karnofsky,
}

fn mentions(code: &fhir::CodeableConcept, phrases: &[&str]) -> bool {
    code.names()
        .map(normalise::fold)
        .any(|n| phrases.iter().any(|p| contains_phrase(&n, p)))
}

fn performance_scale(code: &fhir::CodeableConcept) -> Option<PerformanceScale> {
    if code.has_code(ECOG_LOINC) || mentions(code, &["ecog", "zubrod", "who performance status"]) {
        Some(PerformanceScale::Ecog)
    } else if code.has_code(KARNOFSKY_LOINC) || mentions(code, &["karnofsky", "kps"]) {
        Some(PerformanceScale::Karnofsky)
    } else {
        None
    }
}

fn karnofsky_to_ecog(kps: u32) -> Option<u32> {
    if kps > 100 || kps % 10 != 0 {
        return None;
    }
    KARNOFSKY_TO_ECOG
        .iter()
        .find(|(floor, _)| kps >= *floor)
        .map(|(_, ecog)| *ecog)
}

const INACTIVE_CONDITION_STATUSES: &[&str] = &["resolved", "inactive", "remission"];
const REFUTED_VERIFICATION_STATUSES: &[&str] = &["refuted", "entered-in-error"];
const INACTIVE_MEDICATION_STATUSES: &[&str] = &["stopped", "cancelled", "completed", "entered-in-error"];
const VOID_OBSERVATION_STATUSES: &[&str] = &["cancelled", "entered-in-error"];

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Accumulates candidate values. A dated candidate replaces an undated or
/// older one; on equal or missing dates the first one seen is kept.
#[derive(Default)]
struct Builder {
    fields: BTreeMap<String, (Option<NaiveDate>, FeatureValue)>,
}

impl Builder {
    fn offer(&mut self, key: String, date: Option<NaiveDate>, value: FeatureValue) {
        if let Some((existing, _)) = self.fields.get(&key) {
            let newer = match (date, existing) {
                (Some(d), Some(e)) => d > *e,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !newer {
                return;
            }
        }
        self.fields.insert(key, (date, value));
    }

    /// Presence merged across records: one active record marks the field
    /// present whatever order the records come in.
    fn offer_presence(&mut self, key: String, date: Option<NaiveDate>, present: bool) {
        match self.fields.get_mut(&key) {
            Some((existing_date, FeatureValue::Presence { present: existing })) => {
                *existing |= present;
                if date > *existing_date {
                    *existing_date = date;
                }
            }
            _ => self.offer(key, date, FeatureValue::presence(present)),
        }
    }

    fn finish(self) -> FeatureMap {
        FeatureMap {
            fields: self.fields.into_iter().map(|(k, (_, v))| (k, v)).collect(),
        }
    }
}

/// Build the feature mapping for a patient bundle.
///
/// `reference_date` anchors `demographics.age`; the extractor never reads
/// the clock, so identical inputs always produce identical mappings.
pub fn extract_features(bundle: &Bundle, reference_date: NaiveDate) -> FeatureMap {
    let mut builder = Builder::default();
    for resource in bundle.resources() {
        match resource {
            Resource::Patient(p) => extract_patient(&mut builder, p, reference_date),
            Resource::Observation(o) => extract_observation(&mut builder, o),
            Resource::Condition(c) => extract_condition(&mut builder, c),
            Resource::MedicationRequest(m) => extract_medication(
                &mut builder,
                m.medication_codeable_concept.as_ref().and_then(|cc| cc.label()),
                m.status.as_deref(),
                m.authored_on.as_deref().and_then(fhir::parse_date),
            ),
            Resource::MedicationStatement(m) => extract_medication(
                &mut builder,
                m.medication_codeable_concept.as_ref().and_then(|cc| cc.label()),
                m.status.as_deref(),
                m.effective_date_time.as_deref().and_then(fhir::parse_date),
            ),
            Resource::Other => {}
        }
    }
    let features = builder.finish();
    debug!("Extracted {} features", features.len());
    features
}

fn extract_patient(b: &mut Builder, patient: &Patient, reference_date: NaiveDate) {
    if let Some(gender) = patient.gender.as_deref() {
        let value = normalise::normalise_enum(gender, EnumDomain::Gender)
            .map(str::to_string)
            .unwrap_or_else(|e| {
                debug!("Keeping raw gender: {}", e);
                normalise::fold(gender)
            });
        b.offer("demographics.gender".to_string(), None, FeatureValue::enumerated(value));
    }

    let Some(raw) = patient.birth_date.as_deref() else { return };
    let Some(birth) = fhir::parse_date(raw) else {
        debug!("Unparseable birthDate '{}' ignored", raw);
        return;
    };
    b.offer("demographics.birth_date".to_string(), None, FeatureValue::Date { value: birth });
    if let Some(age) = age_in_years(birth, reference_date) {
        b.offer("demographics.age".to_string(), None, FeatureValue::numeric(age as f64, Some("a")));
    }
}

fn age_in_years(birth: NaiveDate, on: NaiveDate) -> Option<u32> {
    if birth > on {
        return None;
    }
    let mut years = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

fn extract_observation(b: &mut Builder, obs: &Observation) {
    if obs
        .status
        .as_deref()
        .is_some_and(|s| VOID_OBSERVATION_STATUSES.contains(&s))
    {
        return;
    }
    let Some(name) = obs.code.label() else {
        debug!("Observation without code skipped");
        return;
    };
    let date = obs.effective_date();

    if let Some(scale) = performance_scale(&obs.code) {
        let ecog = performance_score(obs).and_then(|score| match scale {
            PerformanceScale::Ecog => (score <= 5).then_some(score),
            PerformanceScale::Karnofsky => karnofsky_to_ecog(score),
        });
        match ecog {
            Some(ecog) => b.offer("performance.ecog".to_string(), date, FeatureValue::numeric(f64::from(ecog), None)),
            None => debug!("{:?} observation '{}' without a valid score skipped", scale, name),
        }
        return;
    }

    let biomarker = biomarker_symbol(name);

    if let Some(q) = &obs.value_quantity {
        let Some(value) = q.value else { return };
        let unit = q.unit_label();

        if let Some(test) = lab_test_for(name) {
            match normalise::normalise(value, unit.unwrap_or_default(), test) {
                Ok((v, canonical)) => {
                    b.offer(format!("lab.{}", test), date, FeatureValue::numeric(v, Some(canonical)))
                }
                Err(e) => debug!("Dropping lab.{}: {}", test, e),
            }
        } else if let Some(symbol) = biomarker.filter(|s| QUANTITATIVE_BIOMARKERS.contains(s)) {
            b.offer(format!("biomarker.{}", symbol), date, FeatureValue::numeric(value, unit));
        } else if obs.is_laboratory() || has_lab_qualifier(name) {
            debug!("Dropping lab observation '{}': unsupported test type", name);
        } else {
            b.offer(format!("vital.{}", slug(name)), date, FeatureValue::numeric(value, unit));
        }
        return;
    }

    let coded = obs
        .value_codeable_concept
        .as_ref()
        .and_then(|cc| cc.label())
        .or(obs.value_string.as_deref());

    if let Some(symbol) = biomarker {
        let status = match (coded, obs.value_boolean) {
            (Some(raw), _) => Some(
                normalise::normalise_enum(raw, EnumDomain::BiomarkerStatus)
                    .map(str::to_string)
                    .unwrap_or_else(|e| {
                        debug!("Keeping raw biomarker value: {}", e);
                        normalise::fold(raw)
                    }),
            ),
            (None, Some(true)) => Some("positive".to_string()),
            (None, Some(false)) => Some("negative".to_string()),
            (None, None) => None,
        };
        if let Some(status) = status {
            b.offer(format!("biomarker.{}", symbol), date, FeatureValue::enumerated(status));
            return;
        }
    }

    let key = format!("observation.{}", slug(name));
    if let Some(raw) = coded {
        b.offer(key, date, FeatureValue::enumerated(normalise::fold(raw)));
    } else if let Some(flag) = obs.value_boolean {
        b.offer(key, date, FeatureValue::presence(flag));
    } else if let Some(when) = obs.value_date_time.as_deref().and_then(fhir::parse_date) {
        b.offer(key, date, FeatureValue::Date { value: when });
    } else if let Some(n) = obs.value_integer {
        b.offer(key, date, FeatureValue::numeric(n as f64, None));
    }
}

/// Whole-number score from the observation value. Text values must hold a
/// single number ("1", "Grade 2"); fractional quantities are rejected.
fn performance_score(obs: &Observation) -> Option<u32> {
    let from_text = |s: &str| {
        let mut numbers = s.split(|c: char| !c.is_ascii_digit()).filter(|t| !t.is_empty());
        let first = numbers.next()?.parse::<u32>().ok();
        if numbers.next().is_some() {
            return None;
        }
        first
    };
    let from_concept = |cc: &fhir::CodeableConcept| {
        cc.text
            .as_deref()
            .into_iter()
            .chain(cc.coding.iter().filter_map(|c| c.display.as_deref()))
            .find_map(from_text)
    };
    obs.value_integer
        .and_then(|n| u32::try_from(n).ok())
        .or_else(|| {
            obs.value_quantity
                .as_ref()
                .and_then(|q| q.value)
                .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                .map(|v| v as u32)
        })
        .or_else(|| obs.value_codeable_concept.as_ref().and_then(from_concept))
        .or_else(|| obs.value_string.as_deref().and_then(from_text))
}

fn extract_condition(b: &mut Builder, condition: &Condition) {
    let Some(name) = condition.code.label() else {
        debug!("Condition without code skipped");
        return;
    };
    let inactive = condition
        .clinical_status
        .as_ref()
        .is_some_and(|cs| INACTIVE_CONDITION_STATUSES.iter().any(|s| cs.has_code(s)))
        || condition
            .verification_status
            .as_ref()
            .is_some_and(|vs| REFUTED_VERIFICATION_STATUSES.iter().any(|s| vs.has_code(s)));
    let date = condition.effective_date();

    if let Some(comorbidity) = comorbidity_slug(name) {
        b.offer_presence(format!("comorbidity.{}", comorbidity), date, !inactive);
    }
    b.offer_presence(format!("condition.{}", slug(name)), date, !inactive);
}

fn extract_medication(b: &mut Builder, name: Option<&str>, status: Option<&str>, date: Option<NaiveDate>) {
    let Some(name) = name else {
        debug!("Medication without code skipped");
        return;
    };
    let active = !status.is_some_and(|s| INACTIVE_MEDICATION_STATUSES.contains(&s));
    b.offer(format!("medication.{}", slug(name)), date, FeatureValue::presence(active));
}
