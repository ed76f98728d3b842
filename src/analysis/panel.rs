use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::record::MeasurementRecord;
use crate::data::model::{Panel, Parameter, Sex};
use crate::data::store::ReferenceStore;
use crate::equations::classify::{round2, RSE_DEFAULT, RSE_DIFFUSION};
use crate::equations::{classify, z_score, Evaluator, Interpretation, Severity};
use crate::error::{ReferenceError, Result};

/// Height range shared by every panel (cm).
pub const HEIGHT_RANGE: RangeInclusive<f64> = 100.0..=250.0;

/// Clinical age range a panel's equations were fitted on (years).
pub fn age_range(panel: Panel) -> RangeInclusive<f64> {
    match panel {
        Panel::Spirometry => 3.0..=95.0,
        Panel::Diffusion | Panel::Volumes => 5.0..=90.0,
    }
}

/// Residual standard error used to standardize a parameter.
pub fn rse(parameter: Parameter) -> f64 {
    match parameter {
        Parameter::Dlco | Parameter::Kco | Parameter::Rv | Parameter::RvTlc => RSE_DIFFUSION,
        Parameter::Fev1
        | Parameter::Fvc
        | Parameter::Fef2575
        | Parameter::Va
        | Parameter::Tlc
        | Parameter::Vc => RSE_DEFAULT,
    }
}

// ---------------------------------------------------------------------------
// ParameterResult / PanelReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterResult {
    pub observed: f64,
    /// Rounded to two decimals.
    pub predicted: f64,
    /// Rounded to two decimals; the labels come from the unrounded value.
    pub z_score: f64,
    pub interpretation: Interpretation,
    pub severity: Severity,
}

/// Outcome of one panel: per-parameter results, or a single error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PanelReport {
    Error { error: String },
    Results(BTreeMap<Parameter, ParameterResult>),
}

impl PanelReport {
    pub fn is_error(&self) -> bool {
        matches!(self, PanelReport::Error { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PanelReport::Error { error } => Some(error),
            PanelReport::Results(_) => None,
        }
    }

    pub fn results(&self) -> Option<&BTreeMap<Parameter, ParameterResult>> {
        match self {
            PanelReport::Results(results) => Some(results),
            PanelReport::Error { .. } => None,
        }
    }

    pub fn get(&self, parameter: Parameter) -> Option<&ParameterResult> {
        self.results().and_then(|r| r.get(&parameter))
    }

    pub fn z(&self, parameter: Parameter) -> Option<f64> {
        self.get(parameter).map(|r| r.z_score)
    }

    /// z-score with absent parameters counted as zero.
    pub fn z_or_zero(&self, parameter: Parameter) -> f64 {
        self.z(parameter).unwrap_or(0.0)
    }
}

/// The three panel reports for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSet {
    pub spirometry: PanelReport,
    pub diffusion: PanelReport,
    pub volumes: PanelReport,
}

impl PanelSet {
    pub fn get(&self, panel: Panel) -> &PanelReport {
        match panel {
            Panel::Spirometry => &self.spirometry,
            Panel::Diffusion => &self.diffusion,
            Panel::Volumes => &self.volumes,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Panel, &PanelReport)> {
        Panel::ALL.into_iter().map(move |panel| (panel, self.get(panel)))
    }
}

// ---------------------------------------------------------------------------
// PanelAnalyzer
// ---------------------------------------------------------------------------

/// Runs panels of a [`MeasurementRecord`] against a [`ReferenceStore`].
///
/// Never fails: every error is folded into [`PanelReport::Error`].
pub struct PanelAnalyzer {
    store: ReferenceStore,
}

impl PanelAnalyzer {
    pub fn new(store: ReferenceStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ReferenceStore {
        &self.store
    }

    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.store)
    }

    pub fn analyze_panel(&self, record: &MeasurementRecord, panel: Panel) -> PanelReport {
        match self.try_analyze(record, panel) {
            Ok(results) => PanelReport::Results(results),
            Err(e) => {
                warn!("{panel} panel rejected: {e}");
                PanelReport::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn analyze_all(&self, record: &MeasurementRecord) -> PanelSet {
        PanelSet {
            spirometry: self.analyze_panel(record, Panel::Spirometry),
            diffusion: self.analyze_panel(record, Panel::Diffusion),
            volumes: self.analyze_panel(record, Panel::Volumes),
        }
    }

    /// Predict, standardize and classify one observed value.
    pub fn evaluate(
        &self,
        parameter: Parameter,
        observed: f64,
        age: f64,
        height: f64,
        sex: Sex,
    ) -> Result<ParameterResult> {
        let predicted = self.evaluator().predict(age, height, sex, parameter)?;
        let z = z_score(observed, predicted, rse(parameter));
        let (interpretation, severity) = classify(z);
        Ok(ParameterResult {
            observed,
            predicted: round2(predicted),
            z_score: round2(z),
            interpretation,
            severity,
        })
    }

    fn try_analyze(
        &self,
        record: &MeasurementRecord,
        panel: Panel,
    ) -> Result<BTreeMap<Parameter, ParameterResult>> {
        let (age, height, sex) = record.demographics()?;
        check_ranges(panel, age, height)?;

        let mut results = BTreeMap::new();
        for &parameter in panel.parameters() {
            let Some(observed) = record.pre(parameter) else {
                debug!("{panel}: no {parameter} observation, skipped");
                continue;
            };
            results.insert(parameter, self.evaluate(parameter, observed, age, height, sex)?);
        }
        Ok(results)
    }
}

fn check_ranges(panel: Panel, age: f64, height: f64) -> Result<()> {
    let ages = age_range(panel);
    if !ages.contains(&age) {
        return Err(ReferenceError::Validation(format!(
            "age {age} outside the valid range for {panel} ({}-{} years)",
            ages.start(),
            ages.end()
        )));
    }
    if !HEIGHT_RANGE.contains(&height) {
        return Err(ReferenceError::Validation(format!(
            "height {height} outside the valid range ({}-{} cm)",
            HEIGHT_RANGE.start(),
            HEIGHT_RANGE.end()
        )));
    }
    Ok(())
}
