//! Lab unit conversion.
//!
//! Every supported test type has exactly one canonical unit and a table of
//! linear factors taking a value in any accepted unit to the canonical one.
//! Unit→unit conversion composes through the canonical unit:
//! `v · f_from / f_to`.
//!
//! Usage:
//! ```ignore
//! let (v, unit) = normalise(13.0, "g/dL", "hemoglobin")?;   // (130.0, "g/L")
//! let g_dl = convert(130.0, "g/L", "g/dL", "hgb")?;         // 13.0
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Serialize;
use trialmatch_common::MatchError;

struct LabTestDef {
    name: &'static str,
    canonical: &'static str,
    aliases: &'static [&'static str],
    /// (accepted unit, factor to canonical)
    factors: &'static [(&'static str, f64)],
}

const LAB_TESTS: &[LabTestDef] = &[
    LabTestDef {
        name: "hemoglobin",
        canonical: "g/L",
        aliases: &["haemoglobin", "hgb", "hb"],
        factors: &[("g/L", 1.0), ("g/dL", 10.0), ("mg/dL", 0.01), ("mmol/L", 16.113)],
    },
    LabTestDef {
        name: "glucose",
        canonical: "mmol/L",
        aliases: &["blood glucose", "fasting glucose", "glu"],
        factors: &[("mmol/L", 1.0), ("mg/dL", 0.0555), ("g/L", 5.55)],
    },
    LabTestDef {
        name: "creatinine",
        canonical: "umol/L",
        aliases: &["serum creatinine", "creat", "cr"],
        factors: &[("umol/L", 1.0), ("mg/dL", 88.4), ("mmol/L", 1000.0)],
    },
    LabTestDef {
        name: "cholesterol",
        canonical: "mmol/L",
        aliases: &["total cholesterol", "chol"],
        factors: &[("mmol/L", 1.0), ("mg/dL", 0.0259), ("g/L", 2.59)],
    },
    LabTestDef {
        name: "triglycerides",
        canonical: "mmol/L",
        aliases: &["triglyceride", "trig", "tg"],
        factors: &[("mmol/L", 1.0), ("mg/dL", 0.0113), ("g/L", 1.13)],
    },
    LabTestDef {
        name: "bilirubin",
        canonical: "umol/L",
        aliases: &["total bilirubin", "tbil", "bili"],
        factors: &[("umol/L", 1.0), ("mg/dL", 17.1), ("mmol/L", 1000.0)],
    },
    LabTestDef {
        name: "albumin",
        canonical: "g/L",
        aliases: &["serum albumin", "alb"],
        factors: &[("g/L", 1.0), ("g/dL", 10.0), ("mmol/L", 69.0)],
    },
    LabTestDef {
        name: "calcium",
        canonical: "mmol/L",
        aliases: &["serum calcium"],
        factors: &[("mmol/L", 1.0), ("mg/dL", 0.25)],
    },
    LabTestDef {
        name: "total_protein",
        canonical: "g/L",
        aliases: &["tp"],
        factors: &[("g/L", 1.0), ("g/dL", 10.0)],
    },
    LabTestDef {
        name: "bun",
        canonical: "mmol/L",
        aliases: &["blood urea nitrogen", "urea nitrogen"],
        factors: &[("mmol/L", 1.0), ("mg/dL", 0.357)],
    },
    LabTestDef {
        name: "uric_acid",
        canonical: "umol/L",
        aliases: &["urate"],
        factors: &[("umol/L", 1.0), ("mg/dL", 59.5), ("mmol/L", 1000.0)],
    },
];

struct UnitTables {
    /// Folded test name or alias → test definition.
    tests: HashMap<String, &'static LabTestDef>,
    /// Test name → (unit key → factor to canonical).
    factors: HashMap<&'static str, HashMap<String, f64>>,
}

fn tables() -> &'static UnitTables {
    static TABLES: OnceLock<UnitTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut tests = HashMap::new();
        let mut factors = HashMap::new();
        for def in LAB_TESTS {
            tests.insert(fold_test_name(def.name), def);
            for alias in def.aliases {
                tests.insert(fold_test_name(alias), def);
            }
            let by_unit: HashMap<String, f64> = def
                .factors
                .iter()
                .map(|(unit, f)| (unit_key(unit), *f))
                .collect();
            factors.insert(def.name, by_unit);
        }
        tracing::debug!("Unit tables built: {} lab tests, {} names", LAB_TESTS.len(), tests.len());
        UnitTables { tests, factors }
    })
}

/// Lookup key for a unit: whitespace removed, lowercased, micro signs as `u`.
pub fn unit_key(unit: &str) -> String {
    unit.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '\u{00B5}' | '\u{03BC}' => 'u',
            c => c,
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// True when both strings name the same unit.
pub fn same_unit(a: &str, b: &str) -> bool {
    unit_key(a) == unit_key(b)
}

fn fold_test_name(name: &str) -> String {
    name.to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn lookup(test_type: &str) -> Result<&'static LabTestDef, MatchError> {
    tables()
        .tests
        .get(&fold_test_name(test_type))
        .copied()
        .ok_or_else(|| MatchError::UnsupportedTestType { test_type: test_type.to_string() })
}

fn factor(def: &'static LabTestDef, unit: &str) -> Result<f64, MatchError> {
    tables()
        .factors
        .get(def.name)
        .and_then(|units| units.get(&unit_key(unit)))
        .copied()
        .ok_or_else(|| MatchError::unsupported_unit(def.name, unit))
}

/// Resolve a test name or alias to its canonical test type.
pub fn canonical_test_type(name: &str) -> Option<&'static str> {
    lookup(name).ok().map(|def| def.name)
}

pub fn canonical_unit(test_type: &str) -> Result<&'static str, MatchError> {
    lookup(test_type).map(|def| def.canonical)
}

/// Convert `value` in `unit` to the canonical unit of `test_type`.
pub fn normalise(value: f64, unit: &str, test_type: &str) -> Result<(f64, &'static str), MatchError> {
    let def = lookup(test_type)?;
    let f = factor(def, unit)?;
    Ok((value * f, def.canonical))
}

/// Convert `value` between two units accepted for `test_type`.
pub fn convert(value: f64, from: &str, to: &str, test_type: &str) -> Result<f64, MatchError> {
    let def = lookup(test_type)?;
    let f_from = factor(def, from)?;
    let f_to = factor(def, to)?;
    Ok(value * f_from / f_to)
}

/// One row of the supported-units listing.
#[derive(Debug, Clone, Serialize)]
pub struct LabUnits {
    pub test_type: &'static str,
    pub canonical_unit: &'static str,
    pub units: Vec<&'static str>,
    pub aliases: Vec<&'static str>,
}

pub fn unit_catalogue() -> Vec<LabUnits> {
    LAB_TESTS
        .iter()
        .map(|def| LabUnits {
            test_type: def.name,
            canonical_unit: def.canonical,
            units: def.factors.iter().map(|(u, _)| *u).collect(),
            aliases: def.aliases.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_hemoglobin_g_per_litre_to_g_per_decilitre() {
        let v = convert(130.0, "g/L", "g/dL", "hemoglobin").unwrap();
        assert!(approx(v, 13.0), "got {}", v);
    }

    #[test]
    fn test_normalise_returns_canonical_unit() {
        let (v, unit) = normalise(100.0, "mg/dL", "glucose").unwrap();
        assert_eq!(unit, "mmol/L");
        assert!(approx(v, 5.55));

        let (v, unit) = normalise(1.2, "mg/dL", "serum creatinine").unwrap();
        assert_eq!(unit, "umol/L");
        assert!(approx(v, 106.08));
    }

    #[test]
    fn test_unit_spelling_variants() {
        assert!(same_unit("µmol/L", "umol/l"));
        assert!(same_unit("\u{03BC}mol/L", "UMOL/L"));
        assert!(same_unit(" g / dL ", "g/dl"));
        let (v, _) = normalise(2.0, "µmol/L", "bilirubin").unwrap();
        assert!(approx(v, 2.0));
    }

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(canonical_test_type("HGB"), Some("hemoglobin"));
        assert_eq!(canonical_test_type("Blood Urea Nitrogen"), Some("bun"));
        assert_eq!(canonical_test_type("uric-acid"), Some("uric_acid"));
        assert_eq!(canonical_test_type("total protein"), Some("total_protein"));
        assert_eq!(canonical_test_type("ldh"), None);
    }

    #[test]
    fn test_unsupported_unit_and_test() {
        assert_eq!(
            normalise(1.0, "furlongs", "hemoglobin").unwrap_err(),
            MatchError::unsupported_unit("hemoglobin", "furlongs"),
        );
        assert!(matches!(
            canonical_unit("troponin"),
            Err(MatchError::UnsupportedTestType { .. })
        ));
    }

    #[test]
    fn test_every_canonical_unit_has_unit_factor() {
        for row in unit_catalogue() {
            let (v, unit) = normalise(42.0, row.canonical_unit, row.test_type).unwrap();
            assert_eq!(unit, row.canonical_unit);
            assert!(approx(v, 42.0), "{} canonical factor is not 1", row.test_type);
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip_within_tolerance(
            t in 0usize..LAB_TESTS.len(),
            a in 0usize..8,
            b in 0usize..8,
            x in 1e-3f64..1e5,
        ) {
            let def = &LAB_TESTS[t];
            let (ua, _) = def.factors[a % def.factors.len()];
            let (ub, _) = def.factors[b % def.factors.len()];
            let there = convert(x, ua, ub, def.name).unwrap();
            let back = convert(there, ub, ua, def.name).unwrap();
            prop_assert!(((back - x) / x).abs() < 1e-6, "{} {}->{}: {} -> {}", def.name, ua, ub, x, back);
        }
    }
}
