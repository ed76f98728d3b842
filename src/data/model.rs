use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReferenceError;

// ---------------------------------------------------------------------------
// Parameter – the closed set of supported measurements
// ---------------------------------------------------------------------------

/// A pulmonary function parameter with a published GLI equation.
///
/// Declaration order is the display order of result maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "FEV1")]
    Fev1,
    #[serde(rename = "FVC")]
    Fvc,
    #[serde(rename = "FEF25-75%")]
    Fef2575,
    #[serde(rename = "DLCO")]
    Dlco,
    #[serde(rename = "KCO")]
    Kco,
    #[serde(rename = "VA")]
    Va,
    #[serde(rename = "TLC")]
    Tlc,
    #[serde(rename = "VC")]
    Vc,
    #[serde(rename = "RV")]
    Rv,
    #[serde(rename = "RV/TLC")]
    RvTlc,
}

impl Parameter {
    pub const ALL: [Parameter; 10] = [
        Parameter::Fev1,
        Parameter::Fvc,
        Parameter::Fef2575,
        Parameter::Dlco,
        Parameter::Kco,
        Parameter::Va,
        Parameter::Tlc,
        Parameter::Vc,
        Parameter::Rv,
        Parameter::RvTlc,
    ];

    /// Name used in reports and upstream records.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Fev1 => "FEV1",
            Parameter::Fvc => "FVC",
            Parameter::Fef2575 => "FEF25-75%",
            Parameter::Dlco => "DLCO",
            Parameter::Kco => "KCO",
            Parameter::Va => "VA",
            Parameter::Tlc => "TLC",
            Parameter::Vc => "VC",
            Parameter::Rv => "RV",
            Parameter::RvTlc => "RV/TLC",
        }
    }

    /// The panel (and reference source) this parameter belongs to.
    pub fn panel(self) -> Panel {
        match self {
            Parameter::Fev1 | Parameter::Fvc | Parameter::Fef2575 => Panel::Spirometry,
            Parameter::Dlco | Parameter::Kco | Parameter::Va => Panel::Diffusion,
            Parameter::Tlc | Parameter::Vc | Parameter::Rv | Parameter::RvTlc => Panel::Volumes,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = ReferenceError;

    /// Accepts the display name and loose spellings such as `fef2575`,
    /// `FEF 25-75` or `rv_tlc`. Only whitespace, `-`, `/` and `_` are
    /// ignored, so unit-qualified keys like `FEV1 (L)` or `FEV1 %` are
    /// rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(*c, '-' | '/' | '_'))
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "FEV1" => Ok(Parameter::Fev1),
            "FVC" => Ok(Parameter::Fvc),
            "FEF2575" | "FEF2575%" => Ok(Parameter::Fef2575),
            "DLCO" => Ok(Parameter::Dlco),
            "KCO" => Ok(Parameter::Kco),
            "VA" => Ok(Parameter::Va),
            "TLC" => Ok(Parameter::Tlc),
            "VC" => Ok(Parameter::Vc),
            "RV" => Ok(Parameter::Rv),
            "RVTLC" => Ok(Parameter::RvTlc),
            _ => Err(ReferenceError::UnknownParameter(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Sex
// ---------------------------------------------------------------------------

/// The two-category sex encoding used by the GLI equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => f.write_str("male"),
            Sex::Female => f.write_str("female"),
        }
    }
}

impl FromStr for Sex {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "males" | "m" | "masculino" | "hombre" => Ok(Sex::Male),
            "female" | "females" | "f" | "femenino" | "mujer" => Ok(Sex::Female),
            other => Err(ReferenceError::Validation(format!(
                "unrecognised sex: '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Panel – a group of parameters sharing one reference source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    Spirometry,
    Diffusion,
    Volumes,
}

impl Panel {
    pub const ALL: [Panel; 3] = [Panel::Spirometry, Panel::Diffusion, Panel::Volumes];

    pub fn parameters(self) -> &'static [Parameter] {
        match self {
            Panel::Spirometry => &[Parameter::Fev1, Parameter::Fvc, Parameter::Fef2575],
            Panel::Diffusion => &[Parameter::Dlco, Parameter::Kco, Parameter::Va],
            Panel::Volumes => &[
                Parameter::Tlc,
                Parameter::Vc,
                Parameter::Rv,
                Parameter::RvTlc,
            ],
        }
    }

    /// Every (parameter, sex) sheet a source for this panel must provide.
    pub fn required_keys(self) -> impl Iterator<Item = TableKey> {
        self.parameters().iter().flat_map(|&parameter| {
            [Sex::Male, Sex::Female]
                .into_iter()
                .map(move |sex| TableKey { parameter, sex })
        })
    }

    /// Position in [`Panel::ALL`], used to index per-panel slots.
    pub fn index(self) -> usize {
        match self {
            Panel::Spirometry => 0,
            Panel::Diffusion => 1,
            Panel::Volumes => 2,
        }
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Panel::Spirometry => f.write_str("spirometry"),
            Panel::Diffusion => f.write_str("diffusion"),
            Panel::Volumes => f.write_str("volumes"),
        }
    }
}

impl FromStr for Panel {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spirometry" | "espirometria" | "spiro" => Ok(Panel::Spirometry),
            "diffusion" | "dlco" => Ok(Panel::Diffusion),
            "volumes" | "volumenes" | "vol" => Ok(Panel::Volumes),
            other => Err(ReferenceError::Validation(format!("unknown panel: '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// TableKey / CoefficientSet
// ---------------------------------------------------------------------------

/// Identifies one reference sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableKey {
    pub parameter: Parameter,
    pub sex: Sex,
}

impl TableKey {
    pub fn new(parameter: Parameter, sex: Sex) -> Self {
        Self { parameter, sex }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.parameter, self.sex)
    }
}

/// Regression constants of one log-linear equation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSet {
    pub a: f64,
    pub p: f64,
    pub q: f64,
}

impl CoefficientSet {
    pub const fn new(a: f64, p: f64, q: f64) -> Self {
        Self { a, p, q }
    }
}

// ---------------------------------------------------------------------------
// SplineTable – age-indexed Mspline corrections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    pub age: f64,
    pub spline: f64,
}

/// Age-indexed spline corrections in source order. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineTable {
    points: Vec<ReferencePoint>,
}

impl SplineTable {
    /// Returns `None` for an empty point list.
    pub fn new(points: Vec<ReferencePoint>) -> Option<Self> {
        if points.is_empty() {
            None
        } else {
            Some(Self { points })
        }
    }

    pub fn points(&self) -> &[ReferencePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Spline value of the entry whose age is closest to `age`.
    ///
    /// Ties go to the entry that comes first in table order. There is no
    /// interpolation between neighbouring ages.
    pub fn nearest_spline(&self, age: f64) -> f64 {
        let mut best = &self.points[0];
        let mut best_diff = (best.age - age).abs();
        for point in &self.points[1..] {
            let diff = (point.age - age).abs();
            if diff < best_diff {
                best = point;
                best_diff = diff;
            }
        }
        best.spline
    }
}

/// One parsed sheet of a reference source.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSheet {
    pub key: TableKey,
    pub table: SplineTable,
    /// Fixed-coefficient block embedded in the sheet (spirometry sources).
    pub coefficients: Option<CoefficientSet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(points: &[(f64, f64)]) -> SplineTable {
        SplineTable::new(
            points
                .iter()
                .map(|&(age, spline)| ReferencePoint { age, spline })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn nearest_spline_exact_match() {
        let t = table(&[(3.0, 0.1), (3.25, 0.2), (4.0, 0.3)]);
        assert_eq!(t.nearest_spline(3.25), 0.2);
        assert_eq!(t.nearest_spline(3.0), 0.1);
        assert_eq!(t.nearest_spline(4.0), 0.3);
    }

    #[test]
    fn nearest_spline_picks_closest_age() {
        let t = table(&[(10.0, 1.0), (20.0, 2.0), (40.0, 4.0)]);
        assert_eq!(t.nearest_spline(14.9), 1.0);
        assert_eq!(t.nearest_spline(15.1), 2.0);
        assert_eq!(t.nearest_spline(100.0), 4.0);
        assert_eq!(t.nearest_spline(-5.0), 1.0);
    }

    #[test]
    fn nearest_spline_tie_goes_to_first_in_table_order() {
        let t = table(&[(10.0, 1.0), (20.0, 2.0)]);
        assert_eq!(t.nearest_spline(15.0), 1.0);

        // Table order, not age order, decides ties.
        let reversed = table(&[(20.0, 2.0), (10.0, 1.0)]);
        assert_eq!(reversed.nearest_spline(15.0), 2.0);
    }

    #[test]
    fn nearest_spline_is_idempotent() {
        let t = table(&[(5.0, -0.01), (5.5, 0.02), (6.0, 0.03)]);
        let first = t.nearest_spline(5.6);
        for _ in 0..10 {
            assert_eq!(t.nearest_spline(5.6), first);
        }
    }

    #[test]
    fn empty_table_is_rejected() {
        assert!(SplineTable::new(Vec::new()).is_none());
    }

    #[test]
    fn parameter_parsing_accepts_aliases() {
        assert_eq!("FEV1".parse::<Parameter>().unwrap(), Parameter::Fev1);
        assert_eq!("fef2575".parse::<Parameter>().unwrap(), Parameter::Fef2575);
        assert_eq!("FEF25-75%".parse::<Parameter>().unwrap(), Parameter::Fef2575);
        assert_eq!("RV/TLC".parse::<Parameter>().unwrap(), Parameter::RvTlc);
        assert_eq!("rvtlc".parse::<Parameter>().unwrap(), Parameter::RvTlc);
        assert!(matches!(
            "PEF".parse::<Parameter>(),
            Err(ReferenceError::UnknownParameter(_))
        ));
    }

    #[test]
    fn parameter_parsing_rejects_qualified_names() {
        for name in ["FEV1 %", "FEV1 (L)", "FVC%", "DLCO (ml/min/mmHg)", "TLC.1"] {
            assert!(
                matches!(name.parse::<Parameter>(), Err(ReferenceError::UnknownParameter(_))),
                "{name}"
            );
        }
        assert_eq!("FEF 25-75".parse::<Parameter>().unwrap(), Parameter::Fef2575);
        assert_eq!("fef_25_75%".parse::<Parameter>().unwrap(), Parameter::Fef2575);
        assert_eq!("rv_tlc".parse::<Parameter>().unwrap(), Parameter::RvTlc);
        assert_eq!(" RV / TLC ".parse::<Parameter>().unwrap(), Parameter::RvTlc);
    }

    #[test]
    fn display_name_round_trips() {
        for p in Parameter::ALL {
            assert_eq!(p.name().parse::<Parameter>().unwrap(), p);
        }
    }

    #[test]
    fn sex_parsing() {
        assert_eq!("Masculino".parse::<Sex>().unwrap(), Sex::Male);
        assert_eq!("FEMENINO".parse::<Sex>().unwrap(), Sex::Female);
        assert_eq!("f".parse::<Sex>().unwrap(), Sex::Female);
        assert!("other".parse::<Sex>().is_err());
    }

    #[test]
    fn every_parameter_belongs_to_its_panel() {
        for panel in Panel::ALL {
            for p in panel.parameters() {
                assert_eq!(p.panel(), panel);
            }
        }
        assert_eq!(Panel::Volumes.required_keys().count(), 8);
    }
}
