use std::fmt;

use serde::{Deserialize, Serialize};

/// Lower limit of normal expressed as a z-score.
pub const LLN_Z: f64 = -1.64;

/// Upper limit of normal, used for parameters where high values are abnormal.
pub const ULN_Z: f64 = 1.64;

/// Default residual standard error for spirometry and most volumes.
pub const RSE_DEFAULT: f64 = 0.12;

/// Residual standard error for DLCO, KCO, RV and RV/TLC.
pub const RSE_DIFFUSION: f64 = 0.15;

/// Standardized log-difference between an observed and a predicted value.
///
/// Non-positive or non-finite inputs give `0.0` instead of an error: upstream
/// extraction is noisy and one bad value must not abort a whole panel.
pub fn z_score(observed: f64, predicted: f64, rse: f64) -> f64 {
    if !observed.is_finite() || !predicted.is_finite() || observed <= 0.0 || predicted <= 0.0 {
        return 0.0;
    }
    (observed.ln() - predicted.ln()) / rse
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interpretation {
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "Mildly reduced")]
    MildlyReduced,
    #[serde(rename = "Moderately reduced")]
    ModeratelyReduced,
    #[serde(rename = "Severely reduced")]
    SeverelyReduced,
    #[serde(rename = "Very severely reduced")]
    VerySeverelyReduced,
}

impl Interpretation {
    pub fn label(self) -> &'static str {
        match self {
            Interpretation::Normal => "Normal",
            Interpretation::MildlyReduced => "Mildly reduced",
            Interpretation::ModeratelyReduced => "Moderately reduced",
            Interpretation::SeverelyReduced => "Severely reduced",
            Interpretation::VerySeverelyReduced => "Very severely reduced",
        }
    }
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordinal severity, `None` < `Mild` < ... < `VerySevere`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    None,
    Mild,
    Moderate,
    Severe,
    #[serde(rename = "Very severe")]
    VerySevere,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::None => "None",
            Severity::Mild => "Mild",
            Severity::Moderate => "Moderate",
            Severity::Severe => "Severe",
            Severity::VerySevere => "Very severe",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a z-score onto the five severity bands. Each band includes its lower
/// bound.
pub fn classify(z: f64) -> (Interpretation, Severity) {
    if z >= LLN_Z {
        (Interpretation::Normal, Severity::None)
    } else if z >= -2.5 {
        (Interpretation::MildlyReduced, Severity::Mild)
    } else if z >= -4.0 {
        (Interpretation::ModeratelyReduced, Severity::Moderate)
    } else if z >= -6.0 {
        (Interpretation::SeverelyReduced, Severity::Severe)
    } else {
        (Interpretation::VerySeverelyReduced, Severity::VerySevere)
    }
}

/// Round to two decimals for display. Halves go to the even neighbour.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}
