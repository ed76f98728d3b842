//! GLI reference engine for pulmonary function tests.
//!
//! Loads the GLI age-spline lookup tables, evaluates the predicted value of
//! spirometry, diffusion and lung-volume parameters for a subject, and
//! classifies observed values by z-score.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use gli_reference::{
//!     MeasurementRecord, Panel, PanelAnalyzer, Parameter, ReferenceConfig, ReferenceStore, Sex,
//! };
//!
//! let config = ReferenceConfig::from_dir(Path::new("tables"));
//! let analyzer = PanelAnalyzer::new(ReferenceStore::from_config(config));
//! let record = MeasurementRecord::new(40.0, 170.0, Sex::Male).with_pre(Parameter::Fev1, 3.5);
//! let report = analyzer.analyze_panel(&record, Panel::Spirometry);
//! println!("{}", serde_json::to_string_pretty(&report).unwrap());
//! ```

pub mod analysis;
pub mod config;
pub mod data;
pub mod equations;
pub mod error;

pub use analysis::{
    compare_reports, BronchodilatorAssessment, DiagnosticReport, MeasurementRecord, PanelAnalyzer,
    PanelReport, PanelSet, ParameterResult, TemporalComparison,
};
pub use config::ReferenceConfig;
pub use data::model::{Panel, Parameter, Sex};
pub use data::store::{FileSource, MemorySource, ReferenceSource, ReferenceStore};
pub use equations::{classify, z_score, Evaluator, Interpretation, Severity};
pub use error::{ReferenceError, Result};
