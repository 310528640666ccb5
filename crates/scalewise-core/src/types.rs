//! Domain types for scalewise.
//!
//! These types describe telemetry samples, the outputs of the external
//! forecast/anomaly providers, fused scaling decisions, and the records
//! of applied decisions. All of them serialize to/from JSON for the REST
//! and websocket surfaces.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScalingConfig;
use crate::error::{ValidationError, ValidationResult};

// ── Telemetry ──────────────────────────────────────────────────────

/// One timestamped observation of system load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySample {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub load_1m: f64,
    pub load_5m: f64,
    pub load_15m: f64,
    /// CPU time percentages.
    pub cpu_user: f64,
    pub cpu_system: f64,
    pub cpu_iowait: f64,
    /// Memory in bytes.
    pub sys_mem_available: f64,
    pub sys_mem_total: f64,
    /// Disk I/O counters.
    pub disk_io_time: f64,
    pub disk_io_read: f64,
    pub disk_io_write: f64,
    /// Request-source statistics, when the ingress layer reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_ip: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_variety: Option<f64>,
}

/// Names of the required numeric fields, in `numeric_fields()` order.
pub const NUMERIC_FIELDS: [&str; 11] = [
    "load_1m",
    "load_5m",
    "load_15m",
    "cpu_user",
    "cpu_system",
    "cpu_iowait",
    "sys_mem_available",
    "sys_mem_total",
    "disk_io_time",
    "disk_io_read",
    "disk_io_write",
];

impl Default for TelemetrySample {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            load_1m: 0.0,
            load_5m: 0.0,
            load_15m: 0.0,
            cpu_user: 0.0,
            cpu_system: 0.0,
            cpu_iowait: 0.0,
            sys_mem_available: 0.0,
            sys_mem_total: 0.0,
            disk_io_time: 0.0,
            disk_io_read: 0.0,
            disk_io_write: 0.0,
            requests_per_ip: None,
            source_variety: None,
        }
    }
}

impl TelemetrySample {
    /// The required numeric fields as `(name, value)` pairs.
    pub fn numeric_fields(&self) -> [(&'static str, f64); 11] {
        let values = [
            self.load_1m,
            self.load_5m,
            self.load_15m,
            self.cpu_user,
            self.cpu_system,
            self.cpu_iowait,
            self.sys_mem_available,
            self.sys_mem_total,
            self.disk_io_time,
            self.disk_io_read,
            self.disk_io_write,
        ];
        let mut out = [("", 0.0); 11];
        for (i, value) in values.into_iter().enumerate() {
            out[i] = (NUMERIC_FIELDS[i], value);
        }
        out
    }

    /// Check the sample against the data-model invariants.
    ///
    /// Every numeric field must be finite and non-negative, and available
    /// memory may not exceed total memory. Out-of-range input is rejected,
    /// never clamped.
    pub fn validate(self) -> ValidationResult<ValidSample> {
        let optional = [
            ("requests_per_ip", self.requests_per_ip),
            ("source_variety", self.source_variety),
        ];
        let fields = self
            .numeric_fields()
            .into_iter()
            .chain(optional.into_iter().filter_map(|(f, v)| v.map(|v| (f, v))));

        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite { field });
            }
            if value < 0.0 {
                return Err(ValidationError::Negative { field, value });
            }
        }

        if self.sys_mem_available > self.sys_mem_total {
            return Err(ValidationError::MemoryExceedsTotal {
                available: self.sys_mem_available,
                total: self.sys_mem_total,
            });
        }

        Ok(ValidSample(self))
    }
}

/// A `TelemetrySample` that passed `validate()`.
///
/// The decision engine only accepts this type, so unvalidated input
/// cannot reach it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidSample(TelemetrySample);

impl ValidSample {
    pub fn into_inner(self) -> TelemetrySample {
        self.0
    }
}

impl Deref for ValidSample {
    type Target = TelemetrySample;

    fn deref(&self) -> &TelemetrySample {
        &self.0
    }
}

// ── Provider outputs ───────────────────────────────────────────────

/// Predicted near-future load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    /// Predicted load on the normalized scale, never negative.
    pub predicted_load: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    #[serde(alias = "model_used")]
    pub model_id: String,
}

impl ForecastPoint {
    /// Build a forecast point, clipping `confidence` to [0, 1] and
    /// `predicted_load` to [0, ∞).
    pub fn new(
        timestamp: DateTime<Utc>,
        predicted_load: f64,
        confidence: f64,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            predicted_load: non_negative(predicted_load),
            confidence: unit_interval(confidence),
            model_id: model_id.into(),
        }
    }
}

/// Output of an anomaly detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AnomalyScore {
    pub raw_score: f64,
    /// Logistic transform of `raw_score`, in [0, 1].
    pub normalized_score: f64,
}

impl AnomalyScore {
    /// Normalize a raw detector score with the standard logistic function.
    pub fn from_raw(raw_score: f64) -> Self {
        Self::from_raw_centered(raw_score, 0.0, 1.0)
    }

    /// Normalize with a logistic centred on `pivot` with slope `steepness`.
    ///
    /// Strictly increasing in `raw_score` for any positive `steepness`.
    pub fn from_raw_centered(raw_score: f64, pivot: f64, steepness: f64) -> Self {
        let normalized = 1.0 / (1.0 + (-(raw_score - pivot) * steepness).exp());
        Self {
            raw_score,
            normalized_score: unit_interval(normalized),
        }
    }

    /// Build a score from an already-normalized value, recovering the raw
    /// score through the inverse logistic.
    pub fn from_normalized(normalized_score: f64) -> Self {
        let n = unit_interval(normalized_score);
        let bounded = n.clamp(1e-12, 1.0 - 1e-12);
        Self {
            raw_score: (bounded / (1.0 - bounded)).ln(),
            normalized_score: n,
        }
    }

    pub fn exceeds(&self, threshold: f64) -> bool {
        self.normalized_score > threshold
    }
}

// ── Decisions ──────────────────────────────────────────────────────

/// What a scaling decision recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    Maintain,
    SecurityAlert,
}

impl ScalingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingAction::ScaleUp => "scale_up",
            ScalingAction::ScaleDown => "scale_down",
            ScalingAction::Maintain => "maintain",
            ScalingAction::SecurityAlert => "security_alert",
        }
    }
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which signals produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Load plus every configured provider answered.
    MlEnsemble,
    /// No providers are configured; load alone, at full trust.
    LoadOnly,
    /// A provider failed or timed out; load alone, confidence capped.
    Degraded,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecisionSource::MlEnsemble => "ml_ensemble",
            DecisionSource::LoadOnly => "load_only",
            DecisionSource::Degraded => "degraded",
        })
    }
}

/// One fused scaling recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub confidence: f64,
    /// Contributing causes in fixed order.
    pub reason: Vec<String>,
    pub source: DecisionSource,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    /// Always present on engine output; optional on the wire so that
    /// `execute` can reject decisions that omit it.
    #[serde(default)]
    pub target_instances: Option<u32>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ScalingDecision {
    /// Check a decision against the configured instance bounds before it
    /// is applied.
    ///
    /// Engine output always passes; decisions arriving over the wire may
    /// not. A missing target is not a range error and is left to the
    /// caller.
    pub fn validate(&self, bounds: &ScalingConfig) -> ValidationResult<()> {
        if !self.confidence.is_finite() {
            return Err(ValidationError::NonFinite { field: "confidence" });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::OutOfRange {
                field: "confidence",
                value: self.confidence,
                min: 0.0,
                max: 1.0,
            });
        }
        if let Some(target) = self.target_instances {
            if target < bounds.min_instances || target > bounds.max_instances {
                return Err(ValidationError::OutOfRange {
                    field: "target_instances",
                    value: f64::from(target),
                    min: f64::from(bounds.min_instances),
                    max: f64::from(bounds.max_instances),
                });
            }
        }
        Ok(())
    }
}

/// An applied decision. Appended to the execution log and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingExecutionRecord {
    pub action: ScalingAction,
    pub confidence: f64,
    pub reason: Vec<String>,
    pub source: DecisionSource,
    pub target_instances: u32,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    pub applied_at: DateTime<Utc>,
}

impl ScalingExecutionRecord {
    /// Record `decision` as applied now. `None` if it carries no target.
    pub fn from_decision(decision: &ScalingDecision, applied_at: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            action: decision.action,
            confidence: decision.confidence,
            reason: decision.reason.clone(),
            source: decision.source,
            target_instances: decision.target_instances?,
            timestamp: decision.timestamp,
            applied_at,
        })
    }
}

fn unit_interval(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

fn non_negative(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.max(0.0) }
}
