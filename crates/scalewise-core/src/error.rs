//! Error types for scalewise.

use thiserror::Error;

/// Result type alias for boundary validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A value rejected at the data-model boundary before it reaches the
/// decision engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("field {field} must be finite")]
    NonFinite { field: &'static str },

    #[error("field {field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("available memory ({available}) cannot exceed total memory ({total})")]
    MemoryExceedsTotal { available: f64, total: f64 },

    #[error("field {field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid value for {key}: {value}")]
    Override { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure of an external forecast or anomaly provider.
///
/// Never propagated past the controller: a failed provider degrades the
/// decision instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("provider returned invalid output: {0}")]
    InvalidOutput(String),
}

/// Failure reading from a telemetry source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("telemetry source I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed telemetry record on line {line}: {message}")]
    Malformed { line: usize, message: String },
}
