//! Follow-up comparison across several reports of the same patient.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::report::{DiagnosticReport, TrafficLight};
use crate::data::model::Parameter;
use crate::equations::classify::round2;
use crate::error::{ReferenceError, Result};

/// Parameters tracked across reports.
pub const TREND_PARAMETERS: [Parameter; 4] =
    [Parameter::Fev1, Parameter::Fvc, Parameter::Dlco, Parameter::Tlc];

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// One parameter as seen in one report. Both fields are absent when the
/// panel failed or the parameter was not measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub label: String,
    pub observed: Option<f64>,
    pub z_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTrend {
    pub parameter: Parameter,
    pub points: Vec<TrendPoint>,
    /// Last minus first available z-score; needs two evaluated reports.
    pub z_change: Option<f64>,
    /// Same, for the observed value.
    pub observed_change: Option<f64>,
}

impl ParameterTrend {
    pub fn from_reports(parameter: Parameter, reports: &[(String, DiagnosticReport)]) -> Self {
        let points: Vec<TrendPoint> = reports
            .iter()
            .map(|(label, report)| {
                let result = report.panels.get(parameter.panel()).get(parameter);
                TrendPoint {
                    label: label.clone(),
                    observed: result.map(|r| r.observed),
                    z_score: result.map(|r| r.z_score),
                }
            })
            .collect();

        let evaluated: Vec<&TrendPoint> = points.iter().filter(|p| p.z_score.is_some()).collect();
        let change = |pick: fn(&TrendPoint) -> Option<f64>| match evaluated.as_slice() {
            [first, .., last] => Some(round2(pick(last)? - pick(first)?)),
            _ => None,
        };

        Self {
            parameter,
            z_change: change(|p| p.z_score),
            observed_change: change(|p| p.observed),
            points,
        }
    }
}

// ---------------------------------------------------------------------------
// TemporalComparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub label: String,
    pub light: TrafficLight,
    pub worst_z: Option<f64>,
    pub driver: Option<Parameter>,
}

/// Reports in the order given, with one series per tracked parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalComparison {
    pub records: Vec<RecordSummary>,
    pub trends: Vec<ParameterTrend>,
}

/// Compare labelled reports over [`TREND_PARAMETERS`]. At least two reports
/// are required.
pub fn compare_reports(reports: &[(String, DiagnosticReport)]) -> Result<TemporalComparison> {
    compare_parameters(reports, &TREND_PARAMETERS)
}

pub fn compare_parameters(
    reports: &[(String, DiagnosticReport)],
    parameters: &[Parameter],
) -> Result<TemporalComparison> {
    if reports.len() < 2 {
        return Err(ReferenceError::Validation(format!(
            "a temporal comparison needs at least two records, got {}",
            reports.len()
        )));
    }

    let records = reports
        .iter()
        .map(|(label, report)| RecordSummary {
            label: label.clone(),
            light: report.overall.light,
            worst_z: report.overall.worst_z,
            driver: report.overall.driver,
        })
        .collect();
    let trends = parameters
        .iter()
        .map(|&p| ParameterTrend::from_reports(p, reports))
        .collect();

    Ok(TemporalComparison { records, trends })
}

/// Label for a record file: the part of the file name before the first `_`
/// (usually the study date, as in `2024-03-01_smith.json`), else the stem.
pub fn record_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    match stem.split_once('_') {
        Some((prefix, _)) if !prefix.is_empty() => prefix.to_string(),
        _ => stem,
    }
}
