//! scalewise-api: HTTP and websocket surface.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Service info and endpoint map |
//! | GET | `/api/v1/health` | Health report |
//! | GET | `/api/v1/health/ready` | Readiness probe |
//! | GET | `/api/v1/health/live` | Liveness probe |
//! | POST | `/api/v1/scaling/decide` | Evaluate a telemetry sample |
//! | POST | `/api/v1/scaling/execute` | Apply a scaling decision |
//! | GET | `/api/v1/scaling/status` | Active instances and recent executions |
//! | POST | `/api/v1/predictions/forecast` | Hourly load forecast |
//! | POST | `/api/v1/predictions/anomaly` | Anomaly check |
//! | POST | `/api/v1/telemetry` | Record a sample into the window |
//! | GET | `/api/v1/telemetry` | Retained samples since a timestamp |
//! | GET | `/api/v1/telemetry/average` | Field averages over a trailing window |
//! | GET | `/ws` | Websocket observer |
//! | GET | `/ws/connections` | Connected observers |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod ws;

use axum::Router;
use axum::routing::{get, post};
use scalewise_controller::ScalingController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: ScalingController,
}

/// Build the complete router (REST + websocket + metrics).
pub fn build_router(controller: ScalingController) -> Router {
    let state = ApiState { controller };

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::ready))
        .route("/health/live", get(handlers::live))
        .route("/scaling/decide", post(handlers::decide))
        .route("/scaling/execute", post(handlers::execute))
        .route("/scaling/status", get(handlers::status))
        .route("/predictions/forecast", post(handlers::forecast))
        .route("/predictions/anomaly", post(handlers::anomaly))
        .route(
            "/telemetry",
            get(handlers::list_telemetry).post(handlers::record_telemetry),
        )
        .route("/telemetry/average", get(handlers::telemetry_average));

    Router::new()
        .route("/", get(handlers::root))
        .nest("/api/v1", api_routes)
        .route("/ws", get(ws::upgrade))
        .route("/ws/connections", get(ws::connections))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
