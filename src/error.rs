//! Error types for ikgen-rs.
//!
//! Every failure inside the trainers propagates with `?` and terminates the
//! run; nothing is caught and recovered locally, so the operator always sees
//! the full error context.

use thiserror::Error;

/// Result type alias for ikgen-rs operations.
pub type Result<T> = std::result::Result<T, IkGenError>;

/// Errors that can occur in ikgen-rs.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IkGenError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Dataset error.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// Checkpoint error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Loss log error.
    #[error("loss log error: {0}")]
    LossLog(#[from] csv::Error),

    /// Progress bar template error.
    #[error("template error: {0}")]
    Template(String),
}

impl From<indicatif::style::TemplateError> for IkGenError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        IkGenError::Template(err.to_string())
    }
}
