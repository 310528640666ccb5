//! scalewise-decision: fuses load, forecast, and anomaly signals into a
//! scaling decision.
//!
//! # Decision Policy
//!
//! ```text
//! load_score     = min(load_1m / load_saturation, 1)
//! effective_load = max(load_score, forecast.predicted_load)   // forecast only raises
//!
//! if anomaly.normalized_score > anomaly_threshold:
//!     effective_load *= anomaly_amplification
//!     action = security_alert                                   // overrides everything
//!
//! target = clamp(ceil(effective_load * instances_per_load_unit), min, max)
//! action = scale_up | scale_down | maintain   (target vs. active)
//! ```
//!
//! A failed or timed-out provider never fails the decision: the engine
//! falls back to `load_score` alone, tags the decision `degraded`, and
//! caps its confidence.

pub mod engine;
pub mod models;

pub use engine::{DecisionEngine, Signal, Signals, decide};
pub use models::{
    BaselineAnomalyDetector, HeuristicAnomalyScorer, ModelParams, Providers,
    SmoothingForecaster,
};
