use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::data::model::{Parameter, Sex};
use crate::error::{ReferenceError, Result};

/// Upstream spellings of "no value extracted".
const NOT_FOUND_SENTINELS: [&str; 5] = ["valor no encontrado", "not found", "n/a", "na", "-"];

// ---------------------------------------------------------------------------
// Observation / MeasurementRecord
// ---------------------------------------------------------------------------

/// Pre- and post-bronchodilator readings of one parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    pub pre: Option<f64>,
    pub post: Option<f64>,
}

/// Patient-level inputs to the analyzer.
///
/// Deserializes from the flat field map produced by upstream extraction:
///
/// ```json
/// { "Edad": "40", "Altura": "170", "Sexo": "Masculino",
///   "FEV1 pre": "3,50", "FEV1 post": "3.90", "FVC pre": "Valor no encontrado",
///   "DLCO": 25.1 }
/// ```
///
/// A bare `<PARAM>` key supplies the pre value when `<PARAM> pre` is absent.
/// Keys that name no supported parameter are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, JsonValue>")]
pub struct MeasurementRecord {
    pub age: Option<f64>,
    pub height: Option<f64>,
    pub sex: Option<Sex>,
    pub observations: BTreeMap<Parameter, Observation>,
}

impl MeasurementRecord {
    pub fn new(age: f64, height: f64, sex: Sex) -> Self {
        Self {
            age: Some(age),
            height: Some(height),
            sex: Some(sex),
            observations: BTreeMap::new(),
        }
    }

    pub fn with_pre(mut self, parameter: Parameter, value: f64) -> Self {
        self.observations.entry(parameter).or_default().pre = Some(value);
        self
    }

    pub fn with_post(mut self, parameter: Parameter, value: f64) -> Self {
        self.observations.entry(parameter).or_default().post = Some(value);
        self
    }

    pub fn pre(&self, parameter: Parameter) -> Option<f64> {
        self.observations.get(&parameter).and_then(|o| o.pre)
    }

    pub fn post(&self, parameter: Parameter) -> Option<f64> {
        self.observations.get(&parameter).and_then(|o| o.post)
    }

    /// Age, height and sex, provided all are present and age/height positive.
    pub fn demographics(&self) -> Result<(f64, f64, Sex)> {
        match (self.age, self.height, self.sex) {
            (Some(age), Some(height), Some(sex)) if age > 0.0 && height > 0.0 => {
                Ok((age, height, sex))
            }
            _ => Err(ReferenceError::Validation(
                "insufficient demographic data for analysis".to_string(),
            )),
        }
    }

    /// Build a record from upstream fields. Values may be numbers, numeric
    /// strings (decimal comma accepted), `null`, or a "not found" sentinel.
    pub fn from_fields(fields: &BTreeMap<String, JsonValue>) -> Result<Self> {
        let mut record = Self::default();
        let mut bare: BTreeMap<Parameter, f64> = BTreeMap::new();

        for (key, value) in fields {
            let lowered = key.trim().to_lowercase();
            match lowered.as_str() {
                "edad" | "age" => record.age = parse_value(key, value)?,
                "altura" | "height" => record.height = parse_value(key, value)?,
                "sexo" | "sex" => record.sex = parse_sex(key, value)?,
                _ => {
                    let (name, slot) = if let Some(name) = lowered.strip_suffix(" pre") {
                        (name, Slot::Pre)
                    } else if let Some(name) = lowered.strip_suffix(" post") {
                        (name, Slot::Post)
                    } else {
                        (lowered.as_str(), Slot::Bare)
                    };
                    let Ok(parameter) = name.parse::<Parameter>() else {
                        continue;
                    };
                    let Some(v) = parse_value(key, value)? else {
                        continue;
                    };
                    let obs = record.observations.entry(parameter).or_default();
                    match slot {
                        Slot::Pre => obs.pre = Some(v),
                        Slot::Post => obs.post = Some(v),
                        Slot::Bare => {
                            bare.insert(parameter, v);
                        }
                    }
                }
            }
        }

        for (parameter, v) in bare {
            let obs = record.observations.entry(parameter).or_default();
            obs.pre.get_or_insert(v);
        }
        Ok(record)
    }
}

impl TryFrom<BTreeMap<String, JsonValue>> for MeasurementRecord {
    type Error = ReferenceError;

    fn try_from(fields: BTreeMap<String, JsonValue>) -> Result<Self> {
        Self::from_fields(&fields)
    }
}

enum Slot {
    Pre,
    Post,
    Bare,
}

fn is_sentinel(s: &str) -> bool {
    let lowered = s.trim().to_lowercase();
    lowered.is_empty() || NOT_FOUND_SENTINELS.contains(&lowered.as_str())
}

fn parse_value(key: &str, value: &JsonValue) -> Result<Option<f64>> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::Number(n) => Ok(n.as_f64()),
        JsonValue::String(s) if is_sentinel(s) => Ok(None),
        JsonValue::String(s) => match s.trim().replace(',', ".").parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            Ok(_) => Err(ReferenceError::Validation(format!(
                "field '{key}': '{s}' is not a finite number"
            ))),
            Err(_) => Err(ReferenceError::Validation(format!(
                "field '{key}': '{s}' is not a number"
            ))),
        },
        other => Err(ReferenceError::Validation(format!(
            "field '{key}': expected a number, got {other}"
        ))),
    }
}

fn parse_sex(key: &str, value: &JsonValue) -> Result<Option<Sex>> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) if is_sentinel(s) => Ok(None),
        JsonValue::String(s) => s.parse().map(Some),
        other => Err(ReferenceError::Validation(format!(
            "field '{key}': expected text, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: JsonValue) -> Result<MeasurementRecord> {
        serde_json::from_value::<MeasurementRecord>(value)
            .map_err(|e| ReferenceError::Validation(e.to_string()))
    }

    #[test]
    fn parses_upstream_fields() {
        let r = record(json!({
            "Edad": "40",
            "Altura": 170,
            "Sexo": "Masculino",
            "FEV1 pre": "3,50",
            "FEV1 post": "3.90",
            "FVC pre": "Valor no encontrado",
            "FEF25-75% pre": null,
            "Peso": "80",
        }))
        .unwrap();

        assert_eq!(r.age, Some(40.0));
        assert_eq!(r.height, Some(170.0));
        assert_eq!(r.sex, Some(Sex::Male));
        assert_eq!(r.pre(Parameter::Fev1), Some(3.5));
        assert_eq!(r.post(Parameter::Fev1), Some(3.9));
        assert_eq!(r.pre(Parameter::Fvc), None);
        assert_eq!(r.pre(Parameter::Fef2575), None);
    }

    #[test]
    fn bare_key_fills_missing_pre() {
        let r = record(json!({
            "DLCO": "25.1",
            "TLC": "6.0",
            "TLC pre": "5.5",
            "RV/TLC": 30.0,
        }))
        .unwrap();
        assert_eq!(r.pre(Parameter::Dlco), Some(25.1));
        assert_eq!(r.pre(Parameter::Tlc), Some(5.5));
        assert_eq!(r.pre(Parameter::RvTlc), Some(30.0));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let r = record(json!({ "FEV1/FVC pre": "0.7", "FeNO": "12" })).unwrap();
        assert!(r.observations.is_empty());
    }

    #[test]
    fn garbage_value_is_a_validation_error() {
        let err = MeasurementRecord::from_fields(
            &[("FEV1 pre".to_string(), json!("abc"))].into_iter().collect(),
        )
        .unwrap_err();
        assert!(matches!(err, ReferenceError::Validation(_)));
    }

    #[test]
    fn non_finite_strings_are_rejected() {
        for text in ["NaN", "inf", "-infinity"] {
            let err = record(json!({
                "Edad": "40",
                "Altura": "170",
                "Sexo": "Masculino",
                "FEV1 pre": text,
                "FVC pre": "4.0",
            }))
            .unwrap_err();
            assert!(err.to_string().contains("not a finite number"), "{text}: {err}");
        }
        assert!(MeasurementRecord::from_fields(
            &[("Altura".to_string(), json!("inf"))].into_iter().collect(),
        )
        .is_err());
    }

    #[test]
    fn demographics_require_positive_values() {
        assert!(MeasurementRecord::new(40.0, 170.0, Sex::Female).demographics().is_ok());
        assert!(MeasurementRecord::new(0.0, 170.0, Sex::Female).demographics().is_err());
        let mut r = MeasurementRecord::new(40.0, 170.0, Sex::Female);
        r.sex = None;
        assert!(r.demographics().is_err());
    }
}
