//! Composition root for `scalewised serve`.

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use scalewise_controller::{ReplaySource, ScalingController};
use scalewise_core::ScalewiseConfig;
use scalewise_decision::ModelParams;
use scalewise_fanout::ConnectionRegistry;
use scalewise_metrics::MetricsWindow;

/// Build the controller with its registry, window and providers.
pub fn build_controller(config: &ScalewiseConfig) -> anyhow::Result<ScalingController> {
    let registry = ConnectionRegistry::new(
        config.fanout.broadcast_timeout(),
        config.fanout.observer_buffer,
    );
    let window = MetricsWindow::shared(config.history.capacity);
    info!(capacity = config.history.capacity, "telemetry window initialized");

    let params = match &config.providers.model_params {
        Some(path) => ModelParams::from_file(path)
            .with_context(|| format!("loading model parameters from {}", path.display()))?,
        None => ModelParams::default(),
    };
    let providers = params.build();
    info!(
        forecast = providers.forecast.model_id(),
        anomaly = providers.anomaly.model_id(),
        anomaly_gates_decisions = providers.anomaly_gates_decisions,
        "providers initialized"
    );

    Ok(ScalingController::new(config, registry, window).with_providers(providers))
}

pub async fn run(config: ScalewiseConfig) -> anyhow::Result<()> {
    info!("scalewise daemon starting");

    let controller = build_controller(&config)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let heartbeat_handle = {
        let controller = controller.clone();
        let shutdown = shutdown_rx.clone();
        let interval = config.fanout.health_interval();
        info!(?interval, "health heartbeat initialized");
        tokio::spawn(async move { controller.run_heartbeat(interval, shutdown).await })
    };

    let replay_handle = match &config.replay {
        Some(replay) => {
            let source = ReplaySource::open(&replay.file)
                .await
                .with_context(|| format!("opening replay file {}", replay.file.display()))?;
            let controller = controller.clone();
            let shutdown = shutdown_rx.clone();
            let interval = replay.interval();
            let auto_execute = replay.auto_execute;
            info!(file = ?replay.file, "telemetry replay initialized");
            Some(tokio::spawn(async move {
                controller
                    .run_replay(source, interval, auto_execute, shutdown)
                    .await
            }))
        }
        None => None,
    };

    // ── Start API server ───────────────────────────────────────

    let router = scalewise_api::build_router(controller);
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!(addr = %listener.local_addr()?, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for background tasks.
    let _ = heartbeat_handle.await;
    if let Some(handle) = replay_handle {
        let _ = handle.await;
    }

    info!("scalewise daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn default_config_loads_builtin_providers() {
        let controller = build_controller(&ScalewiseConfig::default()).unwrap();
        let providers = controller.providers();
        assert_eq!(providers.forecast.as_deref(), Some("exp_smoothing"));
        assert_eq!(providers.anomaly.as_deref(), Some("heuristic_pressure"));
        assert!(!providers.anomaly_gates_decisions);
        assert_eq!(controller.active_instances().await, 4);
    }

    #[tokio::test]
    async fn model_params_file_selects_baseline_detector() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"anomaly": {{"features": {{"load_1m": {{"mean": 1.0, "std": 0.5}}}}}}}}"#
        )
        .unwrap();

        let mut config = ScalewiseConfig::default();
        config.providers.model_params = Some(file.path().to_path_buf());
        let controller = build_controller(&config).unwrap();
        let providers = controller.providers();
        assert_eq!(providers.anomaly.as_deref(), Some("baseline_zscore"));
        assert!(providers.anomaly_gates_decisions);
    }

    #[tokio::test]
    async fn missing_model_params_is_an_error() {
        let mut config = ScalewiseConfig::default();
        config.providers.model_params = Some("/nonexistent/params.json".into());
        let err = build_controller(&config).err().unwrap();
        assert!(err.to_string().contains("loading model parameters"));
    }
}
