//! Domain-specific error types for flow-triage.
//!
//! Uses `thiserror` for ergonomic error definitions that integrate
//! with the broader `anyhow` error handling strategy.

use thiserror::Error;

/// Errors that can occur while reading a flow export.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to open flow export '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Required column '{0}' is missing from the flow export")]
    MissingColumn(&'static str),

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors raised while fitting the outlier model.
#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("Cannot fit the outlier model on an empty feature table")]
    EmptyDataset,

    #[error("Invalid scorer configuration: {0}")]
    InvalidConfig(String),
}

/// Rejections on the interactive single-record path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Session duration cannot be zero. Please enter a valid session duration.")]
    ZeroDuration,

    #[error("Session duration must be a finite number of seconds (got {0})")]
    InvalidDuration(f64),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
