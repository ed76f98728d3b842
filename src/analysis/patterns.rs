use std::fmt;

use serde::{Deserialize, Serialize};

use super::panel::{PanelReport, PanelSet};
use crate::data::model::Parameter;
use crate::equations::classify::{LLN_Z, ULN_Z};

/// FEV1/FVC cut-off between obstructive and non-obstructive spirometry.
pub const RATIO_THRESHOLD: f64 = 0.70;

/// Three-step grade shared by the ventilatory and diffusion patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Mild,
    Moderate,
    Severe,
}

impl Grade {
    pub fn from_z(z: f64) -> Self {
        if z < -3.0 {
            Grade::Severe
        } else if z < -2.5 {
            Grade::Moderate
        } else {
            Grade::Mild
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Mild => f.write_str("mild"),
            Grade::Moderate => f.write_str("moderate"),
            Grade::Severe => f.write_str("severe"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ventilatory pattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", content = "grade", rename_all = "snake_case")]
pub enum VentilatoryPattern {
    Normal,
    Obstructive(Grade),
    Restrictive(Grade),
    Mixed,
    /// Spirometry or volumes could not be evaluated.
    Indeterminate,
}

impl fmt::Display for VentilatoryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VentilatoryPattern::Normal => f.write_str("no ventilatory defect"),
            VentilatoryPattern::Obstructive(g) => write!(f, "{g} obstructive pattern"),
            VentilatoryPattern::Restrictive(g) => write!(f, "{g} restrictive pattern"),
            VentilatoryPattern::Mixed => f.write_str("mixed obstructive-restrictive pattern"),
            VentilatoryPattern::Indeterminate => f.write_str("ventilatory pattern indeterminate"),
        }
    }
}

/// Observed FEV1 / observed FVC, when both were measured and FVC is positive.
pub fn fev1_fvc_ratio(spirometry: &PanelReport) -> Option<f64> {
    let fev1 = spirometry.get(Parameter::Fev1)?.observed;
    let fvc = spirometry.get(Parameter::Fvc)?.observed;
    (fvc > 0.0).then(|| fev1 / fvc)
}

/// Grade of an obstructive defect: low FEV1, low ratio, preserved TLC.
pub fn obstructive(spirometry: &PanelReport, volumes: &PanelReport) -> Option<Grade> {
    if spirometry.is_error() || volumes.is_error() {
        return None;
    }
    let ratio = fev1_fvc_ratio(spirometry)?;
    let fev1 = spirometry.z_or_zero(Parameter::Fev1);
    let tlc = volumes.z_or_zero(Parameter::Tlc);
    (fev1 < LLN_Z && ratio < RATIO_THRESHOLD && tlc >= LLN_Z).then(|| Grade::from_z(fev1))
}

/// Grade of a restrictive defect: low FVC and TLC with a preserved ratio.
pub fn restrictive(spirometry: &PanelReport, volumes: &PanelReport) -> Option<Grade> {
    if spirometry.is_error() || volumes.is_error() {
        return None;
    }
    let ratio = fev1_fvc_ratio(spirometry)?;
    let fvc = spirometry.z_or_zero(Parameter::Fvc);
    let tlc = volumes.z_or_zero(Parameter::Tlc);
    (fvc < LLN_Z && tlc < LLN_Z && ratio >= RATIO_THRESHOLD).then(|| Grade::from_z(tlc))
}

/// Obstruction (low FEV1 and ratio) together with a restrictive volume
/// profile (low FVC and TLC).
pub fn mixed(spirometry: &PanelReport, volumes: &PanelReport) -> bool {
    if spirometry.is_error() || volumes.is_error() {
        return false;
    }
    let Some(ratio) = fev1_fvc_ratio(spirometry) else {
        return false;
    };
    let low = |report: &PanelReport, p| report.z_or_zero(p) < LLN_Z;
    low(spirometry, Parameter::Fev1)
        && ratio < RATIO_THRESHOLD
        && low(spirometry, Parameter::Fvc)
        && low(volumes, Parameter::Tlc)
}

pub fn ventilatory_pattern(spirometry: &PanelReport, volumes: &PanelReport) -> VentilatoryPattern {
    if spirometry.is_error() || volumes.is_error() {
        return VentilatoryPattern::Indeterminate;
    }
    if mixed(spirometry, volumes) {
        VentilatoryPattern::Mixed
    } else if let Some(grade) = obstructive(spirometry, volumes) {
        VentilatoryPattern::Obstructive(grade)
    } else if let Some(grade) = restrictive(spirometry, volumes) {
        VentilatoryPattern::Restrictive(grade)
    } else {
        VentilatoryPattern::Normal
    }
}

// ---------------------------------------------------------------------------
// Diffusion impairment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffusionKind {
    ReducedAlveolarVolume,
    ReducedTransferCoefficient,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffusionImpairment {
    pub grade: Grade,
    pub kind: DiffusionKind,
}

impl fmt::Display for DiffusionImpairment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} diffusion impairment", self.grade)?;
        match self.kind {
            DiffusionKind::ReducedAlveolarVolume => f.write_str(" with reduced alveolar volume"),
            DiffusionKind::ReducedTransferCoefficient => {
                f.write_str(" with reduced transfer coefficient")
            }
            DiffusionKind::Unspecified => Ok(()),
        }
    }
}

pub fn diffusion_impairment(diffusion: &PanelReport) -> Option<DiffusionImpairment> {
    if diffusion.is_error() {
        return None;
    }
    let dlco = diffusion.z_or_zero(Parameter::Dlco);
    if dlco >= LLN_Z {
        return None;
    }
    let kind = if diffusion.z_or_zero(Parameter::Va) < LLN_Z {
        DiffusionKind::ReducedAlveolarVolume
    } else if diffusion.z_or_zero(Parameter::Kco) < LLN_Z {
        DiffusionKind::ReducedTransferCoefficient
    } else {
        DiffusionKind::Unspecified
    };
    Some(DiffusionImpairment {
        grade: Grade::from_z(dlco),
        kind,
    })
}

// ---------------------------------------------------------------------------
// Narrative findings
// ---------------------------------------------------------------------------

/// Per-panel narrative lines followed by one flag line per abnormal
/// parameter. Panels that failed contribute their error message. A panel is
/// only narrated when its anchor parameter (FEV1, DLCO, TLC) was evaluated;
/// other absent parameters count as normal.
pub fn panel_findings(panels: &PanelSet) -> Vec<String> {
    let mut lines = Vec::new();

    for (panel, report) in panels.iter() {
        if let Some(error) = report.error() {
            lines.push(format!("{panel}: not evaluated ({error})"));
        }
    }

    let spiro = &panels.spirometry;
    if spiro.z(Parameter::Fev1).is_some() {
        let low = |p| spiro.z_or_zero(p) < LLN_Z;
        let line = match (low(Parameter::Fev1), low(Parameter::Fvc), low(Parameter::Fef2575)) {
            (false, false, false) => Some("Spirometry within normal limits"),
            (true, true, false) => Some("Spirometry suggests a restrictive pattern"),
            (true, false, true) => Some("Spirometry suggests an obstructive pattern"),
            (true, true, true) => Some("Spirometry suggests a mixed pattern"),
            _ => None,
        };
        lines.extend(line.map(str::to_string));
    }

    let diff = &panels.diffusion;
    if diff.z(Parameter::Dlco).is_some() {
        let low = |p| diff.z_or_zero(p) < LLN_Z;
        let line = match (low(Parameter::Dlco), low(Parameter::Kco), low(Parameter::Va)) {
            (false, false, false) => Some("Diffusing capacity within normal limits"),
            (true, true, false) => Some("Reduced diffusion suggests a membrane defect"),
            (true, false, true) => Some("Reduced diffusion from reduced alveolar volume"),
            (true, true, true) => Some("Reduced diffusion with both membrane and volume components"),
            _ => None,
        };
        lines.extend(line.map(str::to_string));
    }

    let vol = &panels.volumes;
    if let Some(tlc) = vol.z(Parameter::Tlc) {
        // An unmeasured VC defers to TLC.
        let vc = vol.z(Parameter::Vc);
        let restricted = tlc < LLN_Z && vc.map_or(true, |z| z < LLN_Z);
        let preserved = tlc >= LLN_Z && vc.map_or(true, |z| z >= LLN_Z);
        let trapping =
            vol.z_or_zero(Parameter::Rv) > ULN_Z || vol.z_or_zero(Parameter::RvTlc) > ULN_Z;
        let line = match (preserved, restricted, trapping) {
            (true, _, false) => Some("Lung volumes within normal limits"),
            (_, true, false) => Some("Reduced TLC and VC consistent with restriction"),
            (true, _, true) => Some("Increased residual volume suggests hyperinflation or air trapping"),
            (_, true, true) => Some("Mixed volume abnormality: restriction with air trapping"),
            _ => None,
        };
        lines.extend(line.map(str::to_string));
    }

    for (_, report) in panels.iter() {
        let Some(results) = report.results() else {
            continue;
        };
        for (parameter, result) in results {
            if *parameter == Parameter::RvTlc {
                if result.z_score > ULN_Z {
                    lines.push(format!("{parameter} above upper limit (z = {:.2})", result.z_score));
                }
            } else if result.z_score < LLN_Z {
                lines.push(format!(
                    "{parameter} below lower limit (z = {:.2}, {})",
                    result.z_score,
                    result.interpretation.label().to_lowercase()
                ));
            }
        }
    }

    lines
}
