//! Patient-level analysis on top of the reference equations.
//!
//! [`PanelAnalyzer`] turns a [`MeasurementRecord`] into one [`PanelReport`]
//! per panel; the remaining modules derive bronchodilator response,
//! ventilatory/diffusion patterns and a combined [`DiagnosticReport`] from
//! those reports. [`compare_reports`] lines several reports up over time.

pub mod bronchodilator;
pub mod panel;
pub mod patterns;
pub mod record;
pub mod report;
pub mod trend;

pub use bronchodilator::{assess_bronchodilator, BronchodilatorAssessment};
pub use panel::{PanelAnalyzer, PanelReport, PanelSet, ParameterResult};
pub use record::{MeasurementRecord, Observation};
pub use report::DiagnosticReport;
pub use trend::{compare_reports, TemporalComparison};
