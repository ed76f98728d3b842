//! GLI reference equations: coefficient registry, predicted-value
//! evaluation, and z-score classification.

pub mod classify;
pub mod coefficients;
pub mod evaluator;

pub use classify::{Interpretation, Severity, classify, z_score};
pub use evaluator::{EquationForm, Evaluator};
