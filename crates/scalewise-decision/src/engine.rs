//! Decision engine: stateless fusion of load, forecast, and anomaly
//! signals into a bounded instance target.
//!
//! `decide()` has no suspension points and touches no shared state, so
//! any number of evaluations may run concurrently.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use scalewise_core::{
    AnomalyScore, DecisionSource, ForecastPoint, ProviderError, ScalingAction, ScalingConfig,
    ScalingDecision, ValidSample,
};

pub const REASON_HIGH_LOAD: &str = "high system load";
pub const REASON_PREDICTED_HIGH_LOAD: &str = "predicted high load";
pub const REASON_ANOMALY: &str = "anomaly detected";
pub const REASON_NORMAL: &str = "normal load conditions";

/// Outcome of asking one provider for its signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    Available(T),
    /// No provider is configured for this signal.
    Absent,
    /// The provider failed or timed out.
    Failed(ProviderError),
}

impl<T> Signal<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            Signal::Available(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Signal::Failed(_))
    }
}

impl<T> From<Result<T, ProviderError>> for Signal<T> {
    fn from(result: Result<T, ProviderError>) -> Self {
        match result {
            Ok(v) => Signal::Available(v),
            Err(e) => Signal::Failed(e),
        }
    }
}

/// Provider outputs for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    pub forecast: Signal<ForecastPoint>,
    pub anomaly: Signal<AnomalyScore>,
}

impl Signals {
    /// Load-only evaluation: no providers consulted.
    pub fn none() -> Self {
        Self {
            forecast: Signal::Absent,
            anomaly: Signal::Absent,
        }
    }

    pub fn new(forecast: Option<ForecastPoint>, anomaly: Option<AnomalyScore>) -> Self {
        Self {
            forecast: forecast.map_or(Signal::Absent, Signal::Available),
            anomaly: anomaly.map_or(Signal::Absent, Signal::Available),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.forecast.is_failed() || self.anomaly.is_failed()
    }
}

/// Holds the policy parameters; `decide` is otherwise pure.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: ScalingConfig,
}

impl DecisionEngine {
    pub fn new(config: ScalingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    pub fn decide(
        &self,
        sample: &ValidSample,
        signals: &Signals,
        active_instances: u32,
    ) -> ScalingDecision {
        decide(sample, signals, active_instances, &self.config)
    }
}

/// Map raw `load_1m` onto [0, 1] against the configured saturation point.
pub fn load_score(load_1m: f64, config: &ScalingConfig) -> f64 {
    (load_1m / config.load_saturation).clamp(0.0, 1.0)
}

/// Fuse one sample and its provider signals into a decision.
///
/// The forecast can only raise the load estimate, never lower it, and an
/// anomaly above threshold forces `security_alert` whatever the load and
/// forecast say. If either provider failed, both signals are ignored.
pub fn decide(
    sample: &ValidSample,
    signals: &Signals,
    active_instances: u32,
    config: &ScalingConfig,
) -> ScalingDecision {
    let load_score = load_score(sample.load_1m, config);
    let degraded = signals.is_degraded();

    let (forecast, anomaly) = if degraded {
        (None, None)
    } else {
        (signals.forecast.available(), signals.anomaly.available())
    };

    let mut effective_load = match forecast {
        Some(f) => load_score.max(f.predicted_load),
        None => load_score,
    };

    let anomalous = anomaly.is_some_and(|a| a.exceeds(config.anomaly_threshold));
    if anomalous {
        effective_load *= config.anomaly_amplification;
    }

    // Float-to-int casts saturate (NaN -> 0), and the clamp bounds the rest.
    let raw_target = (effective_load * f64::from(config.instances_per_load_unit)).ceil();
    let target_instances = config.clamp_instances(raw_target as u32);

    let action = if anomalous {
        ScalingAction::SecurityAlert
    } else if target_instances > active_instances {
        ScalingAction::ScaleUp
    } else if target_instances < active_instances {
        ScalingAction::ScaleDown
    } else {
        ScalingAction::Maintain
    };

    let base_confidence = forecast.map_or(config.default_confidence, |f| f.confidence);
    let mut confidence = base_confidence;
    if anomalous {
        confidence *= config.anomaly_confidence_penalty;
    }
    confidence = confidence.clamp(0.0, 1.0);
    if degraded {
        confidence = confidence.min(config.degraded_confidence_cap);
    }

    let mut reason = Vec::new();
    if load_score > config.high_load_threshold {
        reason.push(REASON_HIGH_LOAD.to_string());
    }
    if forecast.is_some_and(|f| f.predicted_load > config.high_load_threshold) {
        reason.push(REASON_PREDICTED_HIGH_LOAD.to_string());
    }
    if anomalous {
        reason.push(REASON_ANOMALY.to_string());
    }
    if reason.is_empty() {
        reason.push(REASON_NORMAL.to_string());
    }

    let source = if degraded {
        DecisionSource::Degraded
    } else if forecast.is_none() && anomaly.is_none() {
        DecisionSource::LoadOnly
    } else {
        DecisionSource::MlEnsemble
    };

    let mut scores = BTreeMap::new();
    scores.insert("load_score".to_string(), load_score);
    scores.insert("effective_load".to_string(), effective_load);
    scores.insert("forecast_confidence".to_string(), base_confidence);
    if let Some(f) = forecast {
        scores.insert("predicted_load".to_string(), f.predicted_load);
    }
    if let Some(a) = anomaly {
        scores.insert("anomaly_score".to_string(), a.normalized_score);
    }

    debug!(
        %action,
        %source,
        target_instances,
        active_instances,
        load_score,
        effective_load,
        "scaling decision"
    );

    ScalingDecision {
        action,
        confidence,
        reason,
        source,
        scores,
        target_instances: Some(target_instances),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalewise_core::TelemetrySample;

    fn config() -> ScalingConfig {
        ScalingConfig::default()
    }

    fn sample(load_1m: f64) -> ValidSample {
        TelemetrySample {
            load_1m,
            load_5m: load_1m,
            load_15m: load_1m,
            sys_mem_available: 1.0,
            sys_mem_total: 2.0,
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn forecast(predicted_load: f64, confidence: f64) -> ForecastPoint {
        ForecastPoint::new(Utc::now(), predicted_load, confidence, "test")
    }

    fn target(d: &ScalingDecision) -> u32 {
        d.target_instances.unwrap()
    }

    #[test]
    fn high_load_scales_up_from_four() {
        let d = decide(&sample(9.5), &Signals::none(), 4, &config());
        assert!((d.scores["load_score"] - 0.95).abs() < 1e-9);
        assert_eq!(target(&d), 10);
        assert_eq!(d.action, ScalingAction::ScaleUp);
        assert_eq!(d.reason, vec![REASON_HIGH_LOAD]);
        assert_eq!(d.source, DecisionSource::LoadOnly);
        assert_eq!(d.confidence, 0.8);
    }

    #[test]
    fn low_load_scales_down_to_minimum() {
        let d = decide(&sample(0.1), &Signals::none(), 4, &config());
        assert_eq!(target(&d), 2);
        assert_eq!(d.action, ScalingAction::ScaleDown);
        assert_eq!(d.reason, vec![REASON_NORMAL]);
    }

    #[test]
    fn matching_target_maintains() {
        // 0.35 * 10 = 3.5 -> 4
        let d = decide(&sample(3.5), &Signals::none(), 4, &config());
        assert_eq!(target(&d), 4);
        assert_eq!(d.action, ScalingAction::Maintain);
    }

    #[test]
    fn anomaly_forces_security_alert_with_penalty() {
        let signals = Signals::new(None, Some(AnomalyScore::from_normalized(0.97)));
        let d = decide(&sample(0.5), &signals, 4, &config());

        assert_eq!(d.action, ScalingAction::SecurityAlert);
        assert!(d.confidence <= 0.8 * 0.9 + 1e-12);
        assert_eq!(d.reason, vec![REASON_ANOMALY]);
        assert_eq!(d.source, DecisionSource::MlEnsemble);
    }

    #[test]
    fn anomaly_amplifies_load() {
        let signals = Signals::new(None, Some(AnomalyScore::from_normalized(0.99)));
        // 0.5 * 1.5 * 10 = 7.5 -> 8
        let d = decide(&sample(5.0), &signals, 4, &config());
        assert_eq!(target(&d), 8);
        assert_eq!(d.action, ScalingAction::SecurityAlert);
    }

    #[test]
    fn anomaly_at_threshold_is_not_anomalous() {
        let signals = Signals::new(None, Some(AnomalyScore::from_normalized(0.95)));
        let d = decide(&sample(0.5), &signals, 4, &config());
        assert_ne!(d.action, ScalingAction::SecurityAlert);
    }

    #[test]
    fn anomaly_overrides_any_load_and_forecast() {
        let cfg = config();
        let anomaly = AnomalyScore::from_normalized(0.96);
        for load in [0.0, 0.5, 3.0, 9.9, 40.0] {
            for predicted in [0.0, 0.4, 1.2] {
                for active in [2, 4, 20] {
                    let signals = Signals::new(Some(forecast(predicted, 0.7)), Some(anomaly));
                    let d = decide(&sample(load), &signals, active, &cfg);
                    assert_eq!(d.action, ScalingAction::SecurityAlert);
                }
            }
        }
    }

    #[test]
    fn forecast_only_raises_estimate() {
        let cfg = config();
        let without = decide(&sample(7.0), &Signals::none(), 4, &cfg);

        let low = Signals::new(Some(forecast(0.1, 0.9)), None);
        let with_low = decide(&sample(7.0), &low, 4, &cfg);
        assert_eq!(target(&with_low), target(&without));

        let high = Signals::new(Some(forecast(0.95, 0.9)), None);
        let with_high = decide(&sample(2.0), &high, 4, &cfg);
        assert_eq!(target(&with_high), 10);
        assert_eq!(with_high.reason, vec![REASON_PREDICTED_HIGH_LOAD]);
        assert_eq!(with_high.confidence, 0.9);
    }

    #[test]
    fn reasons_follow_fixed_order() {
        let signals = Signals::new(
            Some(forecast(0.9, 0.8)),
            Some(AnomalyScore::from_normalized(0.99)),
        );
        let d = decide(&sample(9.0), &signals, 4, &config());
        assert_eq!(
            d.reason,
            vec![REASON_HIGH_LOAD, REASON_PREDICTED_HIGH_LOAD, REASON_ANOMALY]
        );
    }

    #[test]
    fn target_always_within_bounds() {
        let cfg = ScalingConfig {
            min_instances: 3,
            max_instances: 7,
            ..config()
        };
        for load in [0.0, 0.01, 1.0, 5.0, 10.0, 1e6] {
            for predicted in [None, Some(0.0), Some(2.5), Some(f64::INFINITY)] {
                for anomaly in [None, Some(0.2), Some(0.999)] {
                    let signals = Signals::new(
                        predicted.map(|p| forecast(p, 0.8)),
                        anomaly.map(AnomalyScore::from_normalized),
                    );
                    let d = decide(&sample(load), &signals, 5, &cfg);
                    let t = target(&d);
                    assert!((3..=7).contains(&t), "target {t} out of bounds");
                }
            }
        }
    }

    #[test]
    fn identical_inputs_yield_identical_decisions() {
        let engine = DecisionEngine::new(config());
        let signals = Signals::new(
            Some(forecast(0.42, 0.75)),
            Some(AnomalyScore::from_normalized(0.3)),
        );
        for load in [0.0, 2.2, 4.9, 8.1, 12.0] {
            let first = engine.decide(&sample(load), &signals, 5);
            let second = engine.decide(&sample(load), &signals, 5);
            assert_eq!(first.action, second.action);
            assert_eq!(first.target_instances, second.target_instances);
            assert_eq!(first.confidence, second.confidence);
            assert_eq!(first.reason, second.reason);
        }
    }

    #[test]
    fn target_is_monotonic_in_load() {
        let cfg = config();
        let signals = Signals::new(Some(forecast(0.3, 0.8)), None);
        let mut prev = 0;
        for step in 0..=300 {
            let load = step as f64 * 0.05;
            let t = target(&decide(&sample(load), &signals, 4, &cfg));
            assert!(t >= prev, "target dropped from {prev} to {t} at load {load}");
            prev = t;
        }
    }

    #[test]
    fn sub_unit_jitter_does_not_move_target() {
        let cfg = config();
        let a = decide(&sample(5.51), &Signals::none(), 6, &cfg);
        let b = decide(&sample(5.58), &Signals::none(), 6, &cfg);
        assert_eq!(a.target_instances, b.target_instances);
        assert_eq!(a.action, ScalingAction::Maintain);
        assert_eq!(b.action, ScalingAction::Maintain);
    }

    #[test]
    fn failed_provider_degrades_to_load_only() {
        let signals = Signals {
            forecast: Signal::Failed(ProviderError::Unavailable("model missing".into())),
            anomaly: Signal::Available(AnomalyScore::from_normalized(0.99)),
        };
        let d = decide(&sample(9.5), &signals, 4, &config());

        assert_eq!(d.source, DecisionSource::Degraded);
        assert!(d.confidence <= 0.5);
        // The anomaly signal is ignored on the degraded path.
        assert_eq!(d.action, ScalingAction::ScaleUp);
        assert_eq!(target(&d), 10);
        assert!(!d.scores.contains_key("anomaly_score"));
    }

    #[test]
    fn timed_out_anomaly_also_degrades() {
        let signals = Signals {
            forecast: Signal::Available(forecast(0.99, 1.0)),
            anomaly: Signal::Failed(ProviderError::TimedOut(std::time::Duration::from_millis(5))),
        };
        let d = decide(&sample(1.0), &signals, 4, &config());
        assert_eq!(d.source, DecisionSource::Degraded);
        assert_eq!(d.confidence, 0.5);
        assert_eq!(target(&d), 2);
    }

    #[test]
    fn signal_from_result() {
        let ok: Signal<u32> = Ok(3).into();
        assert_eq!(ok.available(), Some(&3));
        let err: Signal<u32> = Err(ProviderError::Unavailable("x".into())).into();
        assert!(err.is_failed());
    }
}
