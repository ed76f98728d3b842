use log::debug;

use super::coefficients::coefficients_for;
use crate::data::model::{CoefficientSet, Parameter, Sex, TableKey};
use crate::data::store::ReferenceStore;
use crate::error::{ReferenceError, Result};

// ---------------------------------------------------------------------------
// EquationForm – which age/height terms a parameter's regression uses
// ---------------------------------------------------------------------------

/// Closed-form shape of a published GLI equation. Every form returns
/// `ln(predicted)`; `spline` is the nearest-age Mspline correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationForm {
    /// `a + p·ln(h) − q·ln(age) + spline` (DLCO)
    DiffusionDlco,
    /// `a − p·ln(h) − q·ln(age) + spline` (KCO)
    DiffusionKco,
    /// `a + p·ln(h) + q·ln(age) + spline` (VA, FEV1, FVC, FEF25-75%)
    LogHeightLogAge,
    /// `a + p·ln(age) + q·ln(h) + spline` (TLC)
    LogAgeLogHeight,
    /// `a + p·age + q·ln(h) + spline` (VC)
    LinearAgeLogHeight,
    /// `a + p·age + q·h + spline` (RV, RV/TLC)
    LinearAgeLinearHeight,
}

impl EquationForm {
    pub fn of(parameter: Parameter) -> Self {
        match parameter {
            Parameter::Dlco => EquationForm::DiffusionDlco,
            Parameter::Kco => EquationForm::DiffusionKco,
            Parameter::Va | Parameter::Fev1 | Parameter::Fvc | Parameter::Fef2575 => {
                EquationForm::LogHeightLogAge
            }
            Parameter::Tlc => EquationForm::LogAgeLogHeight,
            Parameter::Vc => EquationForm::LinearAgeLogHeight,
            Parameter::Rv | Parameter::RvTlc => EquationForm::LinearAgeLinearHeight,
        }
    }

    /// Evaluate `ln(predicted)`. Age and height must already be positive.
    pub fn ln_predicted(self, c: CoefficientSet, age: f64, height: f64, spline: f64) -> f64 {
        match self {
            EquationForm::DiffusionDlco => c.a + c.p * height.ln() - c.q * age.ln() + spline,
            EquationForm::DiffusionKco => c.a - c.p * height.ln() - c.q * age.ln() + spline,
            EquationForm::LogHeightLogAge => c.a + c.p * height.ln() + c.q * age.ln() + spline,
            EquationForm::LogAgeLogHeight => c.a + c.p * age.ln() + c.q * height.ln() + spline,
            EquationForm::LinearAgeLogHeight => c.a + c.p * age + c.q * height.ln() + spline,
            EquationForm::LinearAgeLinearHeight => c.a + c.p * age + c.q * height + spline,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Predicted-value calculator over a [`ReferenceStore`].
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    store: &'a ReferenceStore,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a ReferenceStore) -> Self {
        Self { store }
    }

    /// Predicted value of `parameter` for a subject of this age (years),
    /// height (cm) and sex. Always strictly positive on success.
    pub fn predict(&self, age: f64, height: f64, sex: Sex, parameter: Parameter) -> Result<f64> {
        if !(age.is_finite() && height.is_finite() && age > 0.0 && height > 0.0) {
            return Err(ReferenceError::Domain { age, height });
        }

        let coefficients = coefficients_for(self.store, parameter, sex)?;
        let spline = self.store.spline(TableKey::new(parameter, sex), age)?;
        let ln_value = EquationForm::of(parameter).ln_predicted(coefficients, age, height, spline);
        let predicted = ln_value.exp();

        debug!("{parameter} {sex} age={age} height={height}: spline={spline} predicted={predicted}");
        Ok(predicted)
    }
}
