//! scalewise-core: shared types for the scalewise autoscaler.
//!
//! Holds the telemetry/decision data model, boundary validation, the
//! `scalewise.toml` configuration surface, and the capability traits
//! through which external forecast/anomaly models and telemetry feeds
//! are consumed.

pub mod config;
pub mod error;
pub mod provider;
pub mod types;

pub use config::{ScalewiseConfig, ScalingConfig, parse_duration};
pub use error::{ConfigError, ProviderError, SourceError, ValidationError, ValidationResult};
pub use provider::{AnomalyProvider, BoxFuture, ForecastProvider, TelemetrySource};
pub use types::*;
