//! Eligibility predicates.
//!
//! Criteria arrive as loosely-typed [`PredicateDef`]s (operator as a string,
//! operand as arbitrary JSON) and are compiled per trial into [`Predicate`]s
//! with a closed operator set. A definition that cannot be compiled fails
//! its own trial with `InvalidCriteria` and nothing else.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use trialmatch_common::fhir::parse_date;
use trialmatch_common::{MatchError, ScoringConfig};

use crate::features::canonical_field;
use crate::weights;

// ---------------------------------------------------------------------------
// Category / Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Demographics,
    Condition,
    Comorbidity,
    Biomarker,
    Lab,
    Medication,
    Performance,
    Vital,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Demographics => "demographics",
            Category::Condition => "condition",
            Category::Comorbidity => "comorbidity",
            Category::Biomarker => "biomarker",
            Category::Lab => "lab",
            Category::Medication => "medication",
            Category::Performance => "performance",
            Category::Vital => "vital",
            Category::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "demographics" | "demographic" => Some(Category::Demographics),
            "condition" | "conditions" | "diagnosis" => Some(Category::Condition),
            "comorbidity" | "comorbidities" => Some(Category::Comorbidity),
            "biomarker" | "biomarkers" => Some(Category::Biomarker),
            "lab" | "labs" | "lab_test" => Some(Category::Lab),
            "medication" | "medications" => Some(Category::Medication),
            "performance" => Some(Category::Performance),
            "vital" | "vitals" => Some(Category::Vital),
            "other" | "observation" => Some(Category::Other),
            _ => None,
        }
    }

    /// Category implied by the first segment of a field path.
    pub fn from_field(field: &str) -> Self {
        let prefix = field.split('.').next().unwrap_or(field);
        match prefix {
            "demographics" => Category::Demographics,
            "condition" => Category::Condition,
            "comorbidity" => Category::Comorbidity,
            "biomarker" => Category::Biomarker,
            "lab" => Category::Lab,
            "medication" => Category::Medication,
            "performance" => Category::Performance,
            "vital" => Category::Vital,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Inclusion,
    Exclusion,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Inclusion => "inclusion",
            Role::Exclusion => "exclusion",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            Role::Inclusion => "inc",
            Role::Exclusion => "exc",
        }
    }
}

// ---------------------------------------------------------------------------
// Operators and operands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gte,
    Lte,
    Gt,
    Lt,
    Present,
    Absent,
    InSet,
    NotInSet,
    Range,
}

impl Operator {
    /// Accepts symbolic (`>=`) and named (`gte`) spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        let op = match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "==" | "=" | "eq" | "equals" => Operator::Eq,
            "!=" | "<>" | "ne" | "neq" | "not_equals" => Operator::Ne,
            ">=" | "gte" | "ge" => Operator::Gte,
            "<=" | "lte" | "le" => Operator::Lte,
            ">" | "gt" => Operator::Gt,
            "<" | "lt" => Operator::Lt,
            "present" | "exists" => Operator::Present,
            "absent" | "not_present" => Operator::Absent,
            "in" | "in_set" | "one_of" => Operator::InSet,
            "not_in" | "not_in_set" | "none_of" => Operator::NotInSet,
            "range" | "between" => Operator::Range,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Present => "present",
            Operator::Absent => "absent",
            Operator::InSet => "in",
            Operator::NotInSet => "not in",
            Operator::Range => "between",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, Operator::Gte | Operator::Lte | Operator::Gt | Operator::Lt)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Literal {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Literal::Number),
            Value::String(s) => Some(Literal::Text(s.clone())),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Literal::Bool(_) => "boolean",
            Literal::Number(_) => "number",
            Literal::Text(_) => "text",
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    #[default]
    None,
    Single(Literal),
    Set(Vec<Literal>),
    Range { min: f64, max: f64 },
}

impl Operand {
    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }

    fn is_numeric(&self) -> bool {
        match self {
            Operand::Single(Literal::Number(_)) | Operand::Range { .. } => true,
            Operand::Set(items) => items.iter().all(|l| matches!(l, Literal::Number(_))),
            _ => false,
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Single(lit) => write!(f, "{}", lit),
            Operand::Set(items) => {
                let parts: Vec<String> = items.iter().map(Literal::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Operand::Range { min, max } => write!(f, "{}..{}", min, max),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled predicate
// ---------------------------------------------------------------------------

/// A single machine-checkable eligibility rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    /// Position within its trial, e.g. `inc-2`.
    pub id: String,
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Operand::is_none")]
    pub operand: Operand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub category: Category,
    pub weight: f64,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Predicate {
    /// Criterion rendered as text, e.g. `lab.hemoglobin >= 10 g/dL`.
    pub fn describe(&self) -> String {
        let mut out = format!("{} {}", self.field, self.operator.symbol());
        if !self.operand.is_none() {
            out.push(' ');
            out.push_str(&self.operand.to_string());
        }
        if let Some(unit) = &self.unit {
            out.push(' ');
            out.push_str(unit);
        }
        out
    }
}

/// A predicate as written in a trial catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredicateDef {
    pub field: String,
    #[serde(alias = "operator")]
    pub op: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PredicateDef {
    pub fn new(field: impl Into<String>, op: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: op.into(),
            value,
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Compile into a [`Predicate`]. `index` is the zero-based position in
    /// the trial's inclusion or exclusion list.
    pub fn compile(
        &self,
        trial_id: &str,
        role: Role,
        index: usize,
        scoring: &ScoringConfig,
    ) -> Result<Predicate, MatchError> {
        let id = format!("{}-{}", role.id_prefix(), index + 1);
        let invalid = |reason: String| MatchError::invalid_criteria(trial_id, format!("{}: {}", id, reason));

        let raw_field = self.field.trim();
        if raw_field.is_empty() || raw_field.split('.').any(|seg| seg.trim().is_empty()) {
            return Err(invalid(format!("malformed field path '{}'", self.field)));
        }
        let field = canonical_field(raw_field);

        let operator = Operator::parse(&self.op)
            .ok_or_else(|| invalid(format!("unknown operator '{}'", self.op)))?;
        let operand = compile_operand(operator, &self.value).map_err(&invalid)?;

        let unit = self
            .unit
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        if let Some(unit) = &unit {
            if !operand.is_numeric() {
                return Err(invalid(format!("unit '{}' given for a non-numeric operand", unit)));
            }
        }

        let category = match self.category.as_deref() {
            Some(raw) => Category::parse(raw).ok_or_else(|| invalid(format!("unknown category '{}'", raw)))?,
            None => Category::from_field(&field),
        };

        let weight = match self.weight {
            Some(w) if w.is_finite() && w >= 0.0 => w,
            Some(w) => return Err(invalid(format!("weight {} must be finite and non-negative", w))),
            None => weights::default_weight(scoring, category),
        };

        Ok(Predicate {
            id,
            field,
            operator,
            operand,
            unit,
            category,
            weight,
            role,
            reason: self.reason.clone(),
        })
    }
}

fn compile_operand(operator: Operator, value: &Value) -> Result<Operand, String> {
    match operator {
        Operator::Present | Operator::Absent => Ok(Operand::None),

        Operator::Eq | Operator::Ne => Literal::from_json(value)
            .map(Operand::Single)
            .ok_or_else(|| format!("operator '{}' needs a single scalar value, got {}", operator, value)),

        Operator::Gte | Operator::Lte | Operator::Gt | Operator::Lt => match value {
            Value::Number(n) => n
                .as_f64()
                .map(|f| Operand::Single(Literal::Number(f)))
                .ok_or_else(|| format!("number {} is out of range", n)),
            Value::String(s) => {
                if let Ok(f) = s.trim().parse::<f64>() {
                    Ok(Operand::Single(Literal::Number(f)))
                } else if parse_date(s).is_some() {
                    Ok(Operand::Single(Literal::Text(s.trim().to_string())))
                } else {
                    Err(format!("operator '{}' needs a number or ISO date, got '{}'", operator, s))
                }
            }
            other => Err(format!("operator '{}' needs a number or ISO date, got {}", operator, other)),
        },

        Operator::InSet | Operator::NotInSet => {
            let items = value
                .as_array()
                .filter(|items| !items.is_empty())
                .ok_or_else(|| format!("operator '{}' needs a non-empty list, got {}", operator, value))?;
            items
                .iter()
                .map(|item| {
                    Literal::from_json(item)
                        .ok_or_else(|| format!("set members must be scalars, got {}", item))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Operand::Set)
        }

        Operator::Range => {
            let bounds = match value {
                Value::Array(items) if items.len() == 2 => (items[0].as_f64(), items[1].as_f64()),
                Value::Object(map) => (
                    map.get("min").and_then(Value::as_f64),
                    map.get("max").and_then(Value::as_f64),
                ),
                _ => (None, None),
            };
            match bounds {
                (Some(min), Some(max)) if min.is_finite() && max.is_finite() && min <= max => {
                    Ok(Operand::Range { min, max })
                }
                (Some(min), Some(max)) => Err(format!("range bounds {}..{} are inverted or not finite", min, max)),
                _ => Err(format!("range needs [min, max] or {{min, max}}, got {}", value)),
            }
        }
    }
}
