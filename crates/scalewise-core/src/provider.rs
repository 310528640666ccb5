//! Capability interfaces for external collaborators.
//!
//! The forecasting and anomaly models, and the telemetry feed, live
//! outside scalewise. They are consumed only through these traits; the
//! controller wraps every call in a timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{ProviderError, SourceError};
use crate::types::{AnomalyScore, ForecastPoint, TelemetrySample};

/// Boxed, sendable future returned by the capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces a forecast point for `horizon` past the given sample.
pub trait ForecastProvider: Send + Sync {
    /// Identifier reported as `model_id` on forecast points.
    fn model_id(&self) -> &str;

    fn forecast<'a>(
        &'a self,
        sample: &'a TelemetrySample,
        horizon: Duration,
    ) -> BoxFuture<'a, Result<ForecastPoint, ProviderError>>;
}

/// Scores how anomalous a sample is.
pub trait AnomalyProvider: Send + Sync {
    fn model_id(&self) -> &str;

    fn score<'a>(
        &'a self,
        sample: &'a TelemetrySample,
    ) -> BoxFuture<'a, Result<AnomalyScore, ProviderError>>;
}

/// Supplies telemetry samples in arrival order.
///
/// `Ok(None)` means the source is exhausted.
pub trait TelemetrySource: Send {
    fn next_sample(&mut self) -> BoxFuture<'_, Result<Option<TelemetrySample>, SourceError>>;
}
