//! REST API handlers.
//!
//! Each handler delegates to the `ScalingController` and returns JSON.
//! Failures use the `{success: false, error}` envelope: 422 for samples or
//! decisions that fail validation, 503 when a prediction provider is
//! unavailable.

use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use scalewise_controller::ControllerError;
use scalewise_core::{ForecastPoint, ScalingDecision, TelemetrySample, ValidationError};

use crate::ApiState;

/// Upper bound on `forecast_hours`.
pub const MAX_FORECAST_HOURS: u32 = 48;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn invalid_input(e: &ValidationError) -> Response {
    error_response(&e.to_string(), StatusCode::UNPROCESSABLE_ENTITY)
}

fn controller_error(e: &ControllerError) -> Response {
    match e {
        ControllerError::Validation(v) => invalid_input(v),
        ControllerError::NoProvider(_) | ControllerError::Provider(_) => {
            warn!(error = %e, "prediction unavailable");
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

// ── Service ────────────────────────────────────────────────────

/// GET /
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "scalewise",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/v1/health",
            "scaling": "/api/v1/scaling",
            "predictions": "/api/v1/predictions",
            "telemetry": "/api/v1/telemetry",
            "websocket": "/ws",
            "metrics": "/metrics",
        }
    }))
}

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.controller.health().await)
}

/// GET /api/v1/health/ready
pub async fn ready() -> impl IntoResponse {
    Json(json!({ "status": "ready" }))
}

/// GET /api/v1/health/live
pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

// ── Scaling ────────────────────────────────────────────────────

/// POST /api/v1/scaling/decide
pub async fn decide(
    State(state): State<ApiState>,
    Json(sample): Json<TelemetrySample>,
) -> Response {
    match state.controller.evaluate(sample).await {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => invalid_input(&e),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub action: String,
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/v1/scaling/execute
///
/// Decisions outside the configured bounds are rejected with 422 before
/// reaching the controller.
pub async fn execute(
    State(state): State<ApiState>,
    Json(decision): Json<ScalingDecision>,
) -> Response {
    if let Err(e) = decision.validate(state.controller.engine().config()) {
        warn!(action = %decision.action, error = %e, "rejected out-of-range decision");
        return invalid_input(&e);
    }
    let success = state.controller.execute(&decision).await;
    let message = match (success, decision.target_instances) {
        (true, Some(n)) => format!("Scaling {} executed ({n} instances)", decision.action),
        _ => "decision has no target_instances".to_string(),
    };
    Json(ExecuteResponse {
        action: decision.action.to_string(),
        success,
        message,
        timestamp: Utc::now(),
    })
    .into_response()
}

/// GET /api/v1/scaling/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.controller.status().await)
}

// ── Predictions ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    #[serde(default = "default_forecast_hours")]
    pub forecast_hours: u32,
}

fn default_forecast_hours() -> u32 {
    2
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub forecast_hours: u32,
    pub generated_at: DateTime<Utc>,
    pub forecast: Vec<ForecastPoint>,
}

/// POST /api/v1/predictions/forecast?forecast_hours=N
pub async fn forecast(
    State(state): State<ApiState>,
    Query(query): Query<ForecastQuery>,
    Json(sample): Json<TelemetrySample>,
) -> Response {
    let hours = query.forecast_hours;
    if !(1..=MAX_FORECAST_HOURS).contains(&hours) {
        return error_response(
            &format!("forecast_hours must be between 1 and {MAX_FORECAST_HOURS}, got {hours}"),
            StatusCode::UNPROCESSABLE_ENTITY,
        );
    }

    match state.controller.forecast(sample, hours).await {
        Ok(forecast) => Json(ForecastResponse {
            forecast_hours: hours,
            generated_at: Utc::now(),
            forecast,
        })
        .into_response(),
        Err(e) => controller_error(&e),
    }
}

/// POST /api/v1/predictions/anomaly
pub async fn anomaly(
    State(state): State<ApiState>,
    Json(sample): Json<TelemetrySample>,
) -> Response {
    match state.controller.detect_anomaly(sample).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => controller_error(&e),
    }
}

// ── Telemetry ──────────────────────────────────────────────────

/// POST /api/v1/telemetry
pub async fn record_telemetry(
    State(state): State<ApiState>,
    Json(sample): Json<TelemetrySample>,
) -> Response {
    match state.controller.record(sample).await {
        Ok(()) => {
            let retained = state.controller.window().read().await.len();
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(json!({ "retained": retained })),
            )
                .into_response()
        }
        Err(e) => invalid_input(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    pub since: Option<DateTime<Utc>>,
}

/// GET /api/v1/telemetry?since=<RFC3339>
pub async fn list_telemetry(
    State(state): State<ApiState>,
    Query(query): Query<SinceQuery>,
) -> impl IntoResponse {
    let since = query.since.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let samples: Vec<TelemetrySample> = state
        .controller
        .window()
        .read()
        .await
        .range(since)
        .cloned()
        .collect();
    Json(samples)
}

#[derive(Debug, Deserialize)]
pub struct AverageQuery {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    300
}

/// GET /api/v1/telemetry/average?window_secs=N
pub async fn telemetry_average(
    State(state): State<ApiState>,
    Query(query): Query<AverageQuery>,
) -> impl IntoResponse {
    let average = state
        .controller
        .window()
        .read()
        .await
        .average(Duration::from_secs(query.window_secs));
    Json(json!({
        "window_secs": query.window_secs,
        "average": average,
    }))
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = scalewise_metrics::render_prometheus(&state.controller.exposition().await);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
