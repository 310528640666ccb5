//! Built-in provider adapters.
//!
//! Each adapter is constructed once at startup from deserialized
//! parameters (`ModelParams`, usually read from a JSON file) and then
//! consumed through the `ForecastProvider` / `AnomalyProvider` traits.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use scalewise_core::{
    AnomalyProvider, AnomalyScore, BoxFuture, ForecastPoint, ForecastProvider, ProviderError,
    TelemetrySample,
};
use scalewise_metrics::DerivedMetrics;

/// Parameters for the built-in adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelParams {
    pub forecast: SmoothingParams,
    /// When absent the heuristic pressure scorer is used instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<BaselineParams>,
}

impl ModelParams {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let params: ModelParams = serde_json::from_str(&content)?;
        info!(?path, "model parameters loaded");
        Ok(params)
    }

    /// Build the forecast and anomaly providers described by these params.
    pub fn build(&self) -> Providers {
        let forecast: Arc<dyn ForecastProvider> =
            Arc::new(SmoothingForecaster::new(self.forecast.clone()));
        match &self.anomaly {
            Some(baseline) => Providers {
                forecast,
                anomaly: Arc::new(BaselineAnomalyDetector::new(baseline.clone())),
                anomaly_gates_decisions: true,
            },
            None => Providers {
                forecast,
                anomaly: Arc::new(HeuristicAnomalyScorer),
                anomaly_gates_decisions: false,
            },
        }
    }
}

/// Providers built from `ModelParams`.
pub struct Providers {
    pub forecast: Arc<dyn ForecastProvider>,
    pub anomaly: Arc<dyn AnomalyProvider>,
    /// False for the heuristic scorer: pressure rises with load, so it
    /// answers on-demand anomaly checks but must not turn a saturated host
    /// into a security alert.
    pub anomaly_gates_decisions: bool,
}

// ── Forecast ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmoothingParams {
    pub model_id: String,
    /// Smoothing factor in (0, 1].
    pub alpha: f64,
    /// Weight of the 1m-vs-15m load slope, per forecast hour.
    pub trend_weight: f64,
    /// Raw load that maps to a normalized load of 1.0.
    pub load_saturation: f64,
    pub base_confidence: f64,
    /// Confidence lost per hour of horizon.
    pub confidence_decay_per_hour: f64,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            model_id: "exp_smoothing".to_string(),
            alpha: 0.3,
            trend_weight: 0.5,
            load_saturation: 10.0,
            base_confidence: 0.85,
            confidence_decay_per_hour: 0.05,
        }
    }
}

/// Exponential-smoothing forecaster over the normalized 1m load, with a
/// linear trend term taken from the 1m/15m load slope.
pub struct SmoothingForecaster {
    params: SmoothingParams,
    /// Smoothed normalized load; `None` until the first sample.
    level: Mutex<Option<Level>>,
}

#[derive(Debug, Clone, Copy)]
struct Level {
    observed_at: DateTime<Utc>,
    value: f64,
}

impl SmoothingForecaster {
    pub fn new(params: SmoothingParams) -> Self {
        Self {
            params,
            level: Mutex::new(None),
        }
    }

    /// Fold a sample into the level. A sample already folded in (same
    /// timestamp) is not applied twice, so multi-horizon forecasts of one
    /// sample share a level.
    fn observe(&self, observed_at: DateTime<Utc>, normalized: f64) -> f64 {
        let mut level = self.level.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let alpha = self.params.alpha.clamp(f64::EPSILON, 1.0);
        let value = match *level {
            Some(prev) if prev.observed_at == observed_at => return prev.value,
            Some(prev) => alpha * normalized + (1.0 - alpha) * prev.value,
            None => normalized,
        };
        *level = Some(Level { observed_at, value });
        value
    }

    fn predict(&self, sample: &TelemetrySample, horizon: Duration) -> ForecastPoint {
        let saturation = self.params.load_saturation.max(f64::EPSILON);
        let level = self.observe(sample.timestamp, sample.load_1m / saturation);
        let slope = (sample.load_1m - sample.load_15m) / saturation;
        let hours = horizon.as_secs_f64() / 3600.0;

        let predicted = level + slope * self.params.trend_weight * hours;
        let confidence =
            self.params.base_confidence - self.params.confidence_decay_per_hour * hours;

        let timestamp = chrono::Duration::from_std(horizon)
            .ok()
            .and_then(|h| sample.timestamp.checked_add_signed(h))
            .unwrap_or(sample.timestamp);

        ForecastPoint::new(timestamp, predicted, confidence, self.params.model_id.clone())
    }
}

impl ForecastProvider for SmoothingForecaster {
    fn model_id(&self) -> &str {
        &self.params.model_id
    }

    fn forecast<'a>(
        &'a self,
        sample: &'a TelemetrySample,
        horizon: Duration,
    ) -> BoxFuture<'a, Result<ForecastPoint, ProviderError>> {
        Box::pin(async move {
            let point = self.predict(sample, horizon);
            debug!(
                model = %self.params.model_id,
                predicted_load = point.predicted_load,
                confidence = point.confidence,
                "forecast produced"
            );
            Ok(point)
        })
    }
}

// ── Anomaly ────────────────────────────────────────────────────────

/// Mean and spread of one telemetry field under normal operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureBaseline {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineParams {
    #[serde(default = "default_baseline_model_id")]
    pub model_id: String,
    /// Baselines keyed by telemetry field name (e.g. "load_1m").
    pub features: BTreeMap<String, FeatureBaseline>,
    /// Mean |z| at which the normalized score is 0.5.
    #[serde(default = "default_pivot")]
    pub pivot: f64,
    #[serde(default = "default_steepness")]
    pub steepness: f64,
}

fn default_baseline_model_id() -> String {
    "baseline_zscore".to_string()
}

fn default_pivot() -> f64 {
    3.0
}

fn default_steepness() -> f64 {
    2.0
}

/// Scores a sample by its mean absolute z-score against a learned
/// per-field baseline.
pub struct BaselineAnomalyDetector {
    params: BaselineParams,
}

impl BaselineAnomalyDetector {
    pub fn new(params: BaselineParams) -> Self {
        Self { params }
    }

    fn raw_score(&self, sample: &TelemetrySample) -> Option<f64> {
        let optional = [
            ("requests_per_ip", sample.requests_per_ip),
            ("source_variety", sample.source_variety),
        ];
        let fields = sample
            .numeric_fields()
            .into_iter()
            .chain(optional.into_iter().filter_map(|(f, v)| v.map(|v| (f, v))));

        let mut total = 0.0;
        let mut matched = 0usize;
        for (field, value) in fields {
            if let Some(b) = self.params.features.get(field) {
                total += (value - b.mean).abs() / b.std.max(f64::EPSILON);
                matched += 1;
            }
        }
        (matched > 0).then(|| total / matched as f64)
    }
}

impl AnomalyProvider for BaselineAnomalyDetector {
    fn model_id(&self) -> &str {
        &self.params.model_id
    }

    fn score<'a>(
        &'a self,
        sample: &'a TelemetrySample,
    ) -> BoxFuture<'a, Result<AnomalyScore, ProviderError>> {
        Box::pin(async move {
            let raw = self.raw_score(sample).ok_or_else(|| {
                ProviderError::InvalidOutput("no baseline features matched the sample".into())
            })?;
            let steepness = self.params.steepness.max(f64::EPSILON);
            Ok(AnomalyScore::from_raw_centered(raw, self.params.pivot, steepness))
        })
    }
}

/// Fallback scorer: weighted load/CPU/memory pressure.
///
/// Raw and normalized scores are the same value.
pub struct HeuristicAnomalyScorer;

impl AnomalyProvider for HeuristicAnomalyScorer {
    fn model_id(&self) -> &str {
        "heuristic_pressure"
    }

    fn score<'a>(
        &'a self,
        sample: &'a TelemetrySample,
    ) -> BoxFuture<'a, Result<AnomalyScore, ProviderError>> {
        Box::pin(async move {
            let pressure = DerivedMetrics::from_sample(sample).pressure_score(sample.load_1m);
            Ok(AnomalyScore {
                raw_score: pressure,
                normalized_score: pressure,
            })
        })
    }
}
