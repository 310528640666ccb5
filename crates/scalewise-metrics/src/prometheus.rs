//! Prometheus text exposition format.
//!
//! Renders the controller and registry state into the Prometheus text
//! exposition format for scraping by a Prometheus server or compatible
//! agent.

use scalewise_core::TelemetrySample;

/// Point-in-time figures exposed on `/metrics`.
#[derive(Debug, Clone, Default)]
pub struct Exposition {
    pub active_instances: u32,
    pub observers: usize,
    pub executions_total: usize,
    pub window_samples: usize,
    pub latest: Option<TelemetrySample>,
}

/// Render an exposition into Prometheus text format.
///
/// Load gauges are omitted until the window holds at least one sample.
pub fn render_prometheus(e: &Exposition) -> String {
    let mut out = String::new();

    gauge(
        &mut out,
        "scalewise_active_instances",
        "Number of active instances.",
        &e.active_instances.to_string(),
    );
    gauge(
        &mut out,
        "scalewise_connected_observers",
        "Websocket observers currently registered.",
        &e.observers.to_string(),
    );

    out.push_str("# HELP scalewise_executions_total Scaling decisions applied.\n");
    out.push_str("# TYPE scalewise_executions_total counter\n");
    out.push_str(&format!("scalewise_executions_total {}\n", e.executions_total));

    gauge(
        &mut out,
        "scalewise_window_samples",
        "Telemetry samples retained in the window.",
        &e.window_samples.to_string(),
    );

    out.push_str("# HELP scalewise_load_average Latest system load average.\n");
    out.push_str("# TYPE scalewise_load_average gauge\n");
    if let Some(s) = &e.latest {
        for (period, value) in [("1m", s.load_1m), ("5m", s.load_5m), ("15m", s.load_15m)] {
            out.push_str(&format!(
                "scalewise_load_average{{period=\"{period}\"}} {value:.2}\n"
            ));
        }
    }

    out
}

fn gauge(out: &mut String, name: &str, help: &str, value: &str) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name} {value}\n"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_samples() {
        let output = render_prometheus(&Exposition {
            active_instances: 4,
            ..Default::default()
        });
        assert!(output.contains("# TYPE scalewise_active_instances gauge"));
        assert!(output.contains("scalewise_active_instances 4\n"));
        assert!(output.contains("# HELP scalewise_load_average"));
        assert!(!output.contains("scalewise_load_average{"));
    }

    #[test]
    fn render_with_latest_sample() {
        let output = render_prometheus(&Exposition {
            active_instances: 6,
            observers: 3,
            executions_total: 12,
            window_samples: 40,
            latest: Some(TelemetrySample {
                load_1m: 1.25,
                load_5m: 0.5,
                load_15m: 0.333,
                ..Default::default()
            }),
        });

        assert!(output.contains("scalewise_connected_observers 3\n"));
        assert!(output.contains("scalewise_executions_total 12\n"));
        assert!(output.contains("scalewise_window_samples 40\n"));
        assert!(output.contains("scalewise_load_average{period=\"1m\"} 1.25"));
        assert!(output.contains("scalewise_load_average{period=\"15m\"} 0.33"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&Exposition::default());
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.rsplitn(2, ' ');
            let value = parts.next().unwrap();
            assert!(value.parse::<f64>().is_ok(), "bad value in line: {line}");
            assert!(parts.next().is_some(), "missing metric name: {line}");
        }
    }
}
