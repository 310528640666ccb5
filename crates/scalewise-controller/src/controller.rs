//! Scaling controller: the `active_instances` state machine.
//!
//! `evaluate` consults the providers (each under a timeout), runs the
//! decision engine against the current instance count and broadcasts the
//! result. It never mutates state. `execute` is the only transition and
//! runs inside one exclusive section, so racing executions cannot lose an
//! update or interleave the execution log.
//!
//! Events leave through one queue drained by a single broadcaster task,
//! so observers see them in the order they were produced.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use scalewise_core::{
    AnomalyProvider, AnomalyScore, ForecastPoint, ForecastProvider, ProviderError,
    ScalewiseConfig, ScalingAction, ScalingDecision, ScalingExecutionRecord, SourceError,
    TelemetrySample, TelemetrySource, ValidationError,
};
use scalewise_decision::{DecisionEngine, Providers, Signal, Signals};
use scalewise_fanout::{BroadcastReport, ConnectionRegistry, EventType, ServerFrame};
use scalewise_metrics::{DerivedMetrics, Exposition, SharedWindow, WindowAverage};

/// Execution records included in a status report.
pub const STATUS_HISTORY_LEN: usize = 10;

/// Trailing window averaged into `current_load` on a status report.
pub const STATUS_LOAD_WINDOW: Duration = Duration::from_secs(300);

/// Errors from the on-demand prediction operations.
///
/// `evaluate` never returns these: there a provider failure degrades the
/// decision instead.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no {0} provider configured")]
    NoProvider(&'static str),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScalingStatus {
    pub timestamp: DateTime<Utc>,
    pub active_instances: u32,
    pub total_executions: usize,
    /// Most recent executions, oldest first.
    pub scaling_history: Vec<ScalingExecutionRecord>,
    /// Field averages over the trailing five minutes of telemetry.
    pub current_load: WindowAverage,
    /// Ratios for the most recent sample, if any.
    pub current_metrics: Option<DerivedMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub timestamp: DateTime<Utc>,
    pub anomaly_detected: bool,
    /// Normalized score in [0, 1].
    pub anomaly_score: f64,
    pub raw_score: f64,
    pub threshold: f64,
    pub model_used: String,
}

/// Model ids of the configured providers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderInfo {
    pub forecast: Option<String>,
    pub anomaly: Option<String>,
    /// Whether the anomaly provider can force a `security_alert`.
    pub anomaly_gates_decisions: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// "healthy" with both providers loaded, "degraded" otherwise.
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub providers: ProviderInfo,
    pub active_instances: u32,
    pub observers: usize,
    pub window_samples: usize,
}

struct ControllerState {
    active_instances: u32,
    /// Append-only.
    history: Vec<ScalingExecutionRecord>,
}

/// Orchestrates evaluation, execution and notification.
///
/// Cheap to clone; clones share state, registry and window.
#[derive(Clone)]
pub struct ScalingController {
    engine: DecisionEngine,
    forecast: Option<Arc<dyn ForecastProvider>>,
    anomaly: Option<Arc<dyn AnomalyProvider>>,
    anomaly_gates_decisions: bool,
    provider_timeout: Duration,
    forecast_horizon: Duration,
    registry: ConnectionRegistry,
    window: SharedWindow,
    state: Arc<Mutex<ControllerState>>,
    events: mpsc::UnboundedSender<ServerFrame>,
    started_at: DateTime<Utc>,
}

impl ScalingController {
    /// Create a controller with no providers (load-only decisions).
    ///
    /// Spawns the event broadcaster, so this must run inside a tokio
    /// runtime. The broadcaster stops once every clone is dropped.
    pub fn new(config: &ScalewiseConfig, registry: ConnectionRegistry, window: SharedWindow) -> Self {
        let active_instances = config.scaling.initial_active();
        info!(
            active_instances,
            min = config.scaling.min_instances,
            max = config.scaling.max_instances,
            "scaling controller created"
        );
        let events = spawn_broadcaster(registry.clone());
        Self {
            engine: DecisionEngine::new(config.scaling.clone()),
            forecast: None,
            anomaly: None,
            anomaly_gates_decisions: false,
            provider_timeout: config.providers.timeout(),
            forecast_horizon: config.providers.forecast_horizon(),
            registry,
            window,
            state: Arc::new(Mutex::new(ControllerState {
                active_instances,
                history: Vec::new(),
            })),
            events,
            started_at: Utc::now(),
        }
    }

    pub fn with_forecast_provider(mut self, provider: Arc<dyn ForecastProvider>) -> Self {
        self.forecast = Some(provider);
        self
    }

    /// Use `provider` for anomaly checks and as a decision signal.
    pub fn with_anomaly_provider(mut self, provider: Arc<dyn AnomalyProvider>) -> Self {
        self.anomaly = Some(provider);
        self.anomaly_gates_decisions = true;
        self
    }

    /// Use `provider` for on-demand anomaly checks only. Decisions see no
    /// anomaly signal.
    pub fn with_advisory_anomaly_provider(mut self, provider: Arc<dyn AnomalyProvider>) -> Self {
        self.anomaly = Some(provider);
        self.anomaly_gates_decisions = false;
        self
    }

    pub fn with_providers(self, providers: Providers) -> Self {
        let this = self.with_forecast_provider(providers.forecast);
        if providers.anomaly_gates_decisions {
            this.with_anomaly_provider(providers.anomaly)
        } else {
            this.with_advisory_anomaly_provider(providers.anomaly)
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn window(&self) -> &SharedWindow {
        &self.window
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub async fn active_instances(&self) -> u32 {
        self.state.lock().await.active_instances
    }

    pub fn providers(&self) -> ProviderInfo {
        ProviderInfo {
            forecast: self.forecast.as_ref().map(|p| p.model_id().to_string()),
            anomaly: self.anomaly.as_ref().map(|p| p.model_id().to_string()),
            anomaly_gates_decisions: self.anomaly.is_some() && self.anomaly_gates_decisions,
        }
    }

    // ── Evaluation ─────────────────────────────────────────────────

    /// Compute a decision for `sample` against the current instance count.
    ///
    /// Neither mutates state nor notifies observers.
    pub async fn decide(&self, sample: TelemetrySample) -> Result<ScalingDecision, ValidationError> {
        self.decide_with_signals(sample).await.map(|(decision, _)| decision)
    }

    /// `decide`, then broadcast the decision (and an `anomaly_detection`
    /// event when the anomaly threshold was crossed).
    ///
    /// Broadcasting happens in the background; its outcome never reaches
    /// the caller.
    pub async fn evaluate(&self, sample: TelemetrySample) -> Result<ScalingDecision, ValidationError> {
        let (decision, signals) = self.decide_with_signals(sample).await?;

        let mut frames = vec![ServerFrame::event(EventType::ScalingDecision, &decision)];
        if decision.action == ScalingAction::SecurityAlert {
            if let Some(score) = signals.anomaly.available() {
                let threshold = self.engine.config().anomaly_threshold;
                let report = self.anomaly_report(score, threshold, self.anomaly_model_id());
                frames.push(ServerFrame::event(EventType::AnomalyDetection, &report));
            }
        }
        self.dispatch(frames);

        Ok(decision)
    }

    async fn decide_with_signals(
        &self,
        sample: TelemetrySample,
    ) -> Result<(ScalingDecision, Signals), ValidationError> {
        let sample = sample.validate()?;
        let signals = self.signals(&sample).await;
        let active = self.active_instances().await;
        let decision = self.engine.decide(&sample, &signals, active);
        Ok((decision, signals))
    }

    /// Ask both providers concurrently, each bounded by the provider timeout.
    async fn signals(&self, sample: &TelemetrySample) -> Signals {
        let forecast = async {
            match &self.forecast {
                Some(p) => {
                    let result = self.call_forecast(p.as_ref(), sample, self.forecast_horizon).await;
                    Signal::from(result)
                }
                None => Signal::Absent,
            }
        };
        let anomaly = async {
            match &self.anomaly {
                Some(p) if self.anomaly_gates_decisions => {
                    Signal::from(self.call_anomaly(p.as_ref(), sample).await)
                }
                _ => Signal::Absent,
            }
        };
        let (forecast, anomaly) = tokio::join!(forecast, anomaly);
        Signals { forecast, anomaly }
    }

    async fn call_forecast(
        &self,
        provider: &dyn ForecastProvider,
        sample: &TelemetrySample,
        horizon: Duration,
    ) -> Result<ForecastPoint, ProviderError> {
        let result = tokio::time::timeout(self.provider_timeout, provider.forecast(sample, horizon))
            .await
            .unwrap_or(Err(ProviderError::TimedOut(self.provider_timeout)));
        if let Err(e) = &result {
            warn!(model = provider.model_id(), error = %e, "forecast provider failed");
        }
        result
    }

    async fn call_anomaly(
        &self,
        provider: &dyn AnomalyProvider,
        sample: &TelemetrySample,
    ) -> Result<AnomalyScore, ProviderError> {
        let result = tokio::time::timeout(self.provider_timeout, provider.score(sample))
            .await
            .unwrap_or(Err(ProviderError::TimedOut(self.provider_timeout)));
        if let Err(e) = &result {
            warn!(model = provider.model_id(), error = %e, "anomaly provider failed");
        }
        result
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Apply a decision: set `active_instances` to its target and append
    /// an execution record.
    ///
    /// A decision without `target_instances`, with a target outside the
    /// configured bounds, or with a confidence outside [0, 1] is rejected
    /// and leaves state untouched.
    pub async fn execute(&self, decision: &ScalingDecision) -> bool {
        if decision.target_instances.is_none() {
            warn!(action = %decision.action, "rejected decision without target_instances");
            return false;
        }
        if let Err(e) = decision.validate(self.engine.config()) {
            warn!(action = %decision.action, error = %e, "rejected out-of-range decision");
            return false;
        }

        let (record, previous) = {
            let mut state = self.state.lock().await;
            let Some(record) = ScalingExecutionRecord::from_decision(decision, Utc::now()) else {
                return false;
            };
            let previous = state.active_instances;
            state.active_instances = record.target_instances;
            state.history.push(record.clone());
            // Queued under the lock so event order matches the log.
            self.notify(EventType::ScalingExecution, &record);
            (record, previous)
        };

        info!(
            action = %record.action,
            from = previous,
            to = record.target_instances,
            confidence = record.confidence,
            "scaling executed"
        );
        true
    }

    /// Full execution log, oldest first.
    pub async fn history(&self) -> Vec<ScalingExecutionRecord> {
        self.state.lock().await.history.clone()
    }

    pub async fn status(&self) -> ScalingStatus {
        let (active_instances, total_executions, scaling_history) = {
            let state = self.state.lock().await;
            let skip = state.history.len().saturating_sub(STATUS_HISTORY_LEN);
            (
                state.active_instances,
                state.history.len(),
                state.history[skip..].to_vec(),
            )
        };
        let (current_load, current_metrics) = {
            let window = self.window.read().await;
            (
                window.average(STATUS_LOAD_WINDOW),
                window.latest().map(DerivedMetrics::from_sample),
            )
        };
        ScalingStatus {
            timestamp: Utc::now(),
            active_instances,
            total_executions,
            scaling_history,
            current_load,
            current_metrics,
        }
    }

    // ── Telemetry and predictions ──────────────────────────────────

    /// Validate a sample and append it to the telemetry window.
    pub async fn record(&self, sample: TelemetrySample) -> Result<(), ValidationError> {
        let sample = sample.validate()?;
        let mut window = self.window.write().await;
        window.push(sample.into_inner());
        debug!(retained = window.len(), "telemetry sample recorded");
        Ok(())
    }

    /// Hourly forecast points for the next `hours` hours (at least one),
    /// broadcast as a `forecast_update`.
    pub async fn forecast(
        &self,
        sample: TelemetrySample,
        hours: u32,
    ) -> Result<Vec<ForecastPoint>, ControllerError> {
        let sample = sample.validate()?;
        let provider = self.forecast.as_ref().ok_or(ControllerError::NoProvider("forecast"))?;

        let hours = hours.max(1);
        let mut points = Vec::with_capacity(hours as usize);
        for h in 1..=hours {
            let horizon = Duration::from_secs(u64::from(h) * 3600);
            points.push(self.call_forecast(provider.as_ref(), &sample, horizon).await?);
        }

        self.notify(
            EventType::ForecastUpdate,
            &json!({ "forecast_hours": hours, "forecast": points }),
        );
        Ok(points)
    }

    /// Score a sample for anomalies, broadcasting `anomaly_detection` when
    /// the score crosses the threshold.
    pub async fn detect_anomaly(&self, sample: TelemetrySample) -> Result<AnomalyReport, ControllerError> {
        let sample = sample.validate()?;
        let provider = self.anomaly.as_ref().ok_or(ControllerError::NoProvider("anomaly"))?;
        let score = self.call_anomaly(provider.as_ref(), &sample).await?;

        let report = self.anomaly_report(&score, self.engine.config().anomaly_threshold, provider.model_id());
        if report.anomaly_detected {
            warn!(score = report.anomaly_score, model = %report.model_used, "anomaly detected");
            self.notify(EventType::AnomalyDetection, &report);
        }
        Ok(report)
    }

    fn anomaly_model_id(&self) -> &str {
        self.anomaly.as_ref().map_or("none", |p| p.model_id())
    }

    fn anomaly_report(&self, score: &AnomalyScore, threshold: f64, model: &str) -> AnomalyReport {
        AnomalyReport {
            timestamp: Utc::now(),
            anomaly_detected: score.exceeds(threshold),
            anomaly_score: score.normalized_score,
            raw_score: score.raw_score,
            threshold,
            model_used: model.to_string(),
        }
    }

    // ── Health and exposition ──────────────────────────────────────

    pub async fn health(&self) -> HealthReport {
        let providers = self.providers();
        let status = if providers.forecast.is_some() && providers.anomaly.is_some() {
            "healthy"
        } else {
            "degraded"
        };
        let now = Utc::now();
        HealthReport {
            status,
            timestamp: now,
            uptime_secs: (now - self.started_at).num_seconds(),
            providers,
            active_instances: self.active_instances().await,
            observers: self.registry.count().await,
            window_samples: self.window.read().await.len(),
        }
    }

    /// Broadcast a `health_status` event and wait for delivery.
    pub async fn publish_health(&self) -> BroadcastReport {
        let report = self.health().await;
        self.registry
            .broadcast(&ServerFrame::event(EventType::HealthStatus, &report))
            .await
    }

    pub async fn exposition(&self) -> Exposition {
        let (active_instances, executions_total) = {
            let state = self.state.lock().await;
            (state.active_instances, state.history.len())
        };
        let (window_samples, latest) = {
            let window = self.window.read().await;
            (window.len(), window.latest().cloned())
        };
        Exposition {
            active_instances,
            observers: self.registry.count().await,
            executions_total,
            window_samples,
            latest,
        }
    }

    // ── Notification ───────────────────────────────────────────────

    /// Queue one event for broadcast.
    pub fn notify(&self, event_type: EventType, data: &impl Serialize) {
        self.dispatch(vec![ServerFrame::event(event_type, data)]);
    }

    fn dispatch(&self, frames: Vec<ServerFrame>) {
        for frame in frames {
            if self.events.send(frame).is_err() {
                warn!("event broadcaster stopped, dropping event");
            }
        }
    }

    // ── Background loops ───────────────────────────────────────────

    /// Pull one sample per `interval` from `source`, record it, evaluate
    /// it, and execute the decision when `auto_execute` is set.
    ///
    /// Stops on shutdown, when the source is exhausted, or on an I/O
    /// failure. Malformed records are skipped.
    pub async fn run_replay<S: TelemetrySource>(
        &self,
        mut source: S,
        interval: Duration,
        auto_execute: bool,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(?interval, auto_execute, "telemetry replay started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    debug!("replay loop shutting down");
                    break;
                }
            }

            match source.next_sample().await {
                Ok(Some(sample)) => self.ingest(sample, auto_execute).await,
                Ok(None) => {
                    info!("telemetry source exhausted");
                    break;
                }
                Err(SourceError::Malformed { line, message }) => {
                    warn!(line, %message, "skipping malformed telemetry record");
                }
                Err(e) => {
                    warn!(error = %e, "telemetry source failed, stopping replay");
                    break;
                }
            }
        }
    }

    async fn ingest(&self, sample: TelemetrySample, auto_execute: bool) {
        if let Err(e) = self.record(sample.clone()).await {
            warn!(error = %e, "rejected telemetry sample");
            return;
        }
        match self.evaluate(sample).await {
            Ok(decision) => {
                debug!(
                    action = %decision.action,
                    target_instances = ?decision.target_instances,
                    "replayed sample evaluated"
                );
                if auto_execute && decision.action != ScalingAction::Maintain {
                    self.execute(&decision).await;
                }
            }
            Err(e) => warn!(error = %e, "replayed sample rejected"),
        }
    }

    /// Publish `health_status` every `interval` until shutdown.
    pub async fn run_heartbeat(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let report = self.publish_health().await;
                    debug!(delivered = report.delivered, evicted = report.evicted, "health status published");
                }
                _ = shutdown.changed() => {
                    debug!("heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Drain queued events into the registry, one broadcast at a time.
fn spawn_broadcaster(registry: ConnectionRegistry) -> mpsc::UnboundedSender<ServerFrame> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let report = registry.broadcast(&frame).await;
            if report.evicted > 0 {
                debug!(evicted = report.evicted, "observers evicted during broadcast");
            }
        }
        debug!("event broadcaster stopped");
    });
    tx
}
