use std::fmt;

use serde::{Deserialize, Serialize};

use super::bronchodilator::BronchodilatorAssessment;
use super::panel::{PanelAnalyzer, PanelReport, PanelSet};
use super::patterns::{self, DiffusionImpairment, VentilatoryPattern};
use super::record::MeasurementRecord;
use crate::data::model::{Panel, Parameter};
use crate::equations::classify::LLN_Z;

/// Parameters that can drive the overall status (everything but FEF25-75%).
pub const STATUS_PARAMETERS: [Parameter; 9] = [
    Parameter::Fev1,
    Parameter::Fvc,
    Parameter::Dlco,
    Parameter::Kco,
    Parameter::Va,
    Parameter::Tlc,
    Parameter::Vc,
    Parameter::Rv,
    Parameter::RvTlc,
];

// ---------------------------------------------------------------------------
// Overall status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLight {
    Green,
    Yellow,
    Red,
    Gray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallLevel {
    Normal,
    Mild,
    ModerateToSevere,
    VerySevere,
    Unknown,
}

impl OverallLevel {
    pub fn from_z(z: Option<f64>) -> Self {
        match z {
            None => OverallLevel::Unknown,
            Some(z) if z >= LLN_Z => OverallLevel::Normal,
            Some(z) if z >= -2.5 => OverallLevel::Mild,
            Some(z) if z >= -4.0 => OverallLevel::ModerateToSevere,
            Some(_) => OverallLevel::VerySevere,
        }
    }

    pub fn light(self) -> TrafficLight {
        match self {
            OverallLevel::Normal => TrafficLight::Green,
            OverallLevel::Mild => TrafficLight::Yellow,
            OverallLevel::ModerateToSevere | OverallLevel::VerySevere => TrafficLight::Red,
            OverallLevel::Unknown => TrafficLight::Gray,
        }
    }
}

impl fmt::Display for OverallLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallLevel::Normal => f.write_str("Normal"),
            OverallLevel::Mild => f.write_str("Mild impairment"),
            OverallLevel::ModerateToSevere => f.write_str("Moderate to severe impairment"),
            OverallLevel::VerySevere => f.write_str("Very severe impairment"),
            OverallLevel::Unknown => f.write_str("Insufficient data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverallStatus {
    pub level: OverallLevel,
    pub light: TrafficLight,
    pub worst_z: Option<f64>,
    pub driver: Option<Parameter>,
}

/// Worst z-score among [`STATUS_PARAMETERS`] of the panels that evaluated.
/// The first parameter reaching the minimum names the driver.
pub fn overall_status(panels: &PanelSet) -> OverallStatus {
    let mut worst: Option<(Parameter, f64)> = None;
    for (_, report) in panels.iter() {
        for parameter in STATUS_PARAMETERS {
            let Some(z) = report.z(parameter) else {
                continue;
            };
            if worst.map_or(true, |(_, w)| z < w) {
                worst = Some((parameter, z));
            }
        }
    }
    let worst_z = worst.map(|(_, z)| z);
    let level = OverallLevel::from_z(worst_z);
    OverallStatus {
        level,
        light: level.light(),
        worst_z,
        driver: worst.map(|(p, _)| p),
    }
}

// ---------------------------------------------------------------------------
// Summary metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub worst_spirometry: Option<f64>,
    pub worst_diffusion: Option<f64>,
    pub worst_volumes: Option<f64>,
    pub worst_overall: Option<f64>,
    /// Panels whose worst z-score is below the lower limit of normal.
    pub panels_below_lln: usize,
    pub panels_evaluated: usize,
    pub percent_below_lln: f64,
}

/// Worst z of an evaluated panel; FEF25-75% does not count and absent
/// parameters are taken as zero.
fn worst_z(report: &PanelReport, panel: Panel) -> Option<f64> {
    if report.is_error() {
        return None;
    }
    panel
        .parameters()
        .iter()
        .filter(|p| **p != Parameter::Fef2575)
        .map(|p| report.z_or_zero(*p))
        .reduce(f64::min)
}

pub fn summary_metrics(panels: &PanelSet) -> SummaryMetrics {
    let worst_spirometry = worst_z(&panels.spirometry, Panel::Spirometry);
    let worst_diffusion = worst_z(&panels.diffusion, Panel::Diffusion);
    let worst_volumes = worst_z(&panels.volumes, Panel::Volumes);

    let evaluated: Vec<f64> = [worst_spirometry, worst_diffusion, worst_volumes]
        .into_iter()
        .flatten()
        .collect();
    let below = evaluated.iter().filter(|z| **z < LLN_Z).count();
    let percent = if evaluated.is_empty() {
        0.0
    } else {
        below as f64 / evaluated.len() as f64 * 100.0
    };

    SummaryMetrics {
        worst_spirometry,
        worst_diffusion,
        worst_volumes,
        worst_overall: evaluated.iter().copied().reduce(f64::min),
        panels_below_lln: below,
        panels_evaluated: evaluated.len(),
        percent_below_lln: percent,
    }
}

// ---------------------------------------------------------------------------
// DiagnosticReport
// ---------------------------------------------------------------------------

/// Everything the engine can say about one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub panels: PanelSet,
    pub overall: OverallStatus,
    pub metrics: SummaryMetrics,
    pub ventilatory_pattern: VentilatoryPattern,
    pub diffusion_impairment: Option<DiffusionImpairment>,
    pub bronchodilator: BronchodilatorAssessment,
    pub findings: Vec<String>,
}

impl DiagnosticReport {
    pub fn from_panels(panels: PanelSet, bronchodilator: BronchodilatorAssessment) -> Self {
        let ventilatory_pattern = patterns::ventilatory_pattern(&panels.spirometry, &panels.volumes);
        let diffusion_impairment = patterns::diffusion_impairment(&panels.diffusion);

        let mut findings = patterns::panel_findings(&panels);
        if ventilatory_pattern != VentilatoryPattern::Indeterminate {
            findings.push(format!("Ventilatory assessment: {ventilatory_pattern}"));
        }
        if let Some(impairment) = diffusion_impairment {
            findings.push(format!("Diffusion assessment: {impairment}"));
        }
        findings.push(bronchodilator.summary());

        Self {
            overall: overall_status(&panels),
            metrics: summary_metrics(&panels),
            panels,
            ventilatory_pattern,
            diffusion_impairment,
            bronchodilator,
            findings,
        }
    }
}

impl PanelAnalyzer {
    /// Run every panel and derive the combined diagnostic picture.
    pub fn report(&self, record: &MeasurementRecord) -> DiagnosticReport {
        DiagnosticReport::from_panels(self.analyze_all(record), self.bronchodilator(record))
    }
}
