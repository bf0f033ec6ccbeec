//! FHIR-shaped patient bundle types.
//! Only the resources and elements the matcher reads are modelled; anything
//! else in the incoming JSON is ignored during deserialisation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "default_bundle_resource_type")]
    pub resource_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

fn default_bundle_resource_type() -> String { "Bundle".to_string() }

impl Bundle {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            resource_type: default_bundle_resource_type(),
            id: None,
            entry: resources
                .into_iter()
                .map(|resource| BundleEntry { full_url: None, resource })
                .collect(),
        }
    }

    /// Resources in bundle order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.entry.iter().map(|e| &e.resource)
    }

    pub fn patient(&self) -> Option<&Patient> {
        self.resources().find_map(|r| match r {
            Resource::Patient(p) => Some(p),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    pub resource: Resource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    Patient(Patient),
    Observation(Observation),
    Condition(Condition),
    MedicationRequest(MedicationRequest),
    MedicationStatement(MedicationStatement),
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,  // YYYY, YYYY-MM or YYYY-MM-DD
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Vec<CodeableConcept>,
    #[serde(default)]
    pub code: CodeableConcept,
    #[serde(default)]
    pub effective_date_time: Option<String>,
    #[serde(default)]
    pub issued: Option<String>,
    #[serde(default)]
    pub value_quantity: Option<Quantity>,
    #[serde(default)]
    pub value_codeable_concept: Option<CodeableConcept>,
    #[serde(default)]
    pub value_string: Option<String>,
    #[serde(default)]
    pub value_boolean: Option<bool>,
    #[serde(default)]
    pub value_integer: Option<i64>,
    #[serde(default)]
    pub value_date_time: Option<String>,
}

impl Observation {
    /// Date the observation applies to, falling back to when it was issued.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.effective_date_time
            .as_deref()
            .or(self.issued.as_deref())
            .and_then(parse_date)
    }

    /// True when any category coding is `laboratory`.
    pub fn is_laboratory(&self) -> bool {
        self.category.iter().any(|c| c.has_code("laboratory"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub code: CodeableConcept,
    #[serde(default)]
    pub clinical_status: Option<CodeableConcept>,
    #[serde(default)]
    pub verification_status: Option<CodeableConcept>,
    #[serde(default)]
    pub onset_date_time: Option<String>,
    #[serde(default)]
    pub recorded_date: Option<String>,
}

impl Condition {
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.onset_date_time
            .as_deref()
            .or(self.recorded_date.as_deref())
            .and_then(parse_date)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub medication_codeable_concept: Option<CodeableConcept>,
    #[serde(default)]
    pub authored_on: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationStatement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub medication_codeable_concept: Option<CodeableConcept>,
    #[serde(default)]
    pub effective_date_time: Option<String>,
}

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConcept {
    #[serde(default)]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn text(text: impl Into<String>) -> Self {
        Self { coding: Vec::new(), text: Some(text.into()) }
    }

    /// Human-readable label: `text`, else the first coding display, else the first code.
    pub fn label(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.coding.iter().find_map(|c| c.display.as_deref()))
            .or_else(|| self.coding.iter().find_map(|c| c.code.as_deref()))
    }

    /// Every code and display string attached to the concept.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.text
            .as_deref()
            .into_iter()
            .chain(self.coding.iter().flat_map(|c| c.display.as_deref().into_iter().chain(c.code.as_deref())))
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.coding
            .iter()
            .filter_map(|c| c.code.as_deref())
            .chain(self.text.as_deref())
            .any(|c| c.eq_ignore_ascii_case(code))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Quantity {
    /// Display unit, falling back to the UCUM code.
    pub fn unit_label(&self) -> Option<&str> {
        self.unit
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or(self.code.as_deref())
    }
}

/// Parse a FHIR date or dateTime. Partial dates resolve to the first day of
/// the period (`2020` → 2020-01-01, `2020-06` → 2020-06-01).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    if let Ok(d) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        return Some(d);
    }
    let mut parts = raw.splitn(3, '-');
    let year: i32 = parts.next()?.get(..4)?.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(m) => m.get(..2)?.parse().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_minimal_bundle() {
        let json = r#"{
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "p1", "gender": "female", "birthDate": "1970-03-14"}},
                {"resource": {"resourceType": "Observation",
                              "code": {"text": "Hemoglobin"},
                              "valueQuantity": {"value": 130, "unit": "g/L"}}},
                {"resource": {"resourceType": "Encounter", "id": "e1"}}
            ]
        }"#;
        let bundle = Bundle::from_json(json).unwrap();
        assert_eq!(bundle.entry.len(), 3);
        assert_eq!(bundle.patient().and_then(|p| p.gender.as_deref()), Some("female"));
        assert!(matches!(bundle.entry[2].resource, Resource::Other));

        match &bundle.entry[1].resource {
            Resource::Observation(obs) => {
                assert_eq!(obs.code.label(), Some("Hemoglobin"));
                assert_eq!(obs.value_quantity.as_ref().and_then(|q| q.value), Some(130.0));
            }
            other => panic!("expected observation, got {:?}", other),
        }
    }

    #[test]
    fn test_codeable_concept_label_fallbacks() {
        let cc = CodeableConcept {
            coding: vec![Coding { system: None, code: Some("718-7".into()), display: None }],
            text: None,
        };
        assert_eq!(cc.label(), Some("718-7"));

        let cc = CodeableConcept {
            coding: vec![Coding { system: None, code: Some("718-7".into()), display: Some("Hemoglobin".into()) }],
            text: Some("  ".into()),
        };
        assert_eq!(cc.label(), Some("Hemoglobin"));
        assert!(cc.has_code("718-7"));
    }

    #[test]
    fn test_parse_partial_dates() {
        assert_eq!(parse_date("2021-05-03T10:00:00Z"), NaiveDate::from_ymd_opt(2021, 5, 3));
        assert_eq!(parse_date("1980-07"), NaiveDate::from_ymd_opt(1980, 7, 1));
        assert_eq!(parse_date("1980"), NaiveDate::from_ymd_opt(1980, 1, 1));
        assert_eq!(parse_date("yesterday"), None);
    }
}
