use std::path::PathBuf;

use thiserror::Error;

use crate::data::model::TableKey;

// ---------------------------------------------------------------------------
// ReferenceError – every failure the engine can report
// ---------------------------------------------------------------------------

/// Errors raised while loading reference data or evaluating equations.
///
/// The panel analyzer never lets these escape: it turns them into a
/// `PanelReport::Error` value for the caller to display.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// A reference source is missing or malformed. `reason` carries the full
    /// context chain of the underlying failure.
    #[error("failed to load reference tables from {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// Unsupported parameter name, or no coefficients registered for it.
    #[error("unknown or unsupported parameter: {0}")]
    UnknownParameter(String),

    /// Non-positive (or non-finite) age/height reached a logarithmic equation.
    #[error("age and height must be positive (age = {age}, height = {height})")]
    Domain { age: f64, height: f64 },

    /// Demographics missing or outside the clinical range of a panel.
    #[error("{0}")]
    Validation(String),

    /// A loaded source has no sheet for this key.
    #[error("no reference table loaded for {0}")]
    MissingTable(TableKey),

    /// The load guard was poisoned by a panicking loader.
    #[error("reference store lock poisoned")]
    Poisoned,
}

impl ReferenceError {
    /// Wrap a loader failure, keeping its whole context chain as text.
    pub fn load(path: impl Into<PathBuf>, err: &anyhow::Error) -> Self {
        Self::Load {
            path: path.into(),
            reason: format!("{err:#}"),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ReferenceError>;
