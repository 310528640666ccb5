//! scalewise.toml configuration parser.
//!
//! Every section is optional and falls back to defaults. A small set of
//! environment variables (`MIN_INSTANCES`, `MAX_INSTANCES`,
//! `ANOMALY_THRESHOLD`, `INSTANCES_PER_LOAD_UNIT`, `HISTORY_CAPACITY`,
//! `BROADCAST_TIMEOUT`, `HOST`, `PORT`) override the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalewiseConfig {
    pub server: ServerConfig,
    pub scaling: ScalingConfig,
    pub history: HistoryConfig,
    pub fanout: FanoutConfig,
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Decision-engine policy parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_instances: u32,
    pub max_instances: u32,
    /// Active instance count at startup, clamped to [min, max].
    pub initial_instances: u32,
    /// Normalized anomaly score above which a security alert is raised.
    pub anomaly_threshold: f64,
    pub instances_per_load_unit: u32,
    /// Raw `load_1m` that maps to a load score of 1.0.
    pub load_saturation: f64,
    /// Load score (or predicted load) above which load counts as high.
    pub high_load_threshold: f64,
    pub anomaly_amplification: f64,
    pub anomaly_confidence_penalty: f64,
    /// Confidence used when no forecast is available.
    pub default_confidence: f64,
    pub degraded_confidence_cap: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_instances: 2,
            max_instances: 20,
            initial_instances: 4,
            anomaly_threshold: 0.95,
            instances_per_load_unit: 10,
            load_saturation: 10.0,
            high_load_threshold: 0.8,
            anomaly_amplification: 1.5,
            anomaly_confidence_penalty: 0.9,
            default_confidence: 0.8,
            degraded_confidence_cap: 0.5,
        }
    }
}

impl ScalingConfig {
    pub fn clamp_instances(&self, n: u32) -> u32 {
        n.clamp(self.min_instances, self.max_instances)
    }

    pub fn initial_active(&self) -> u32 {
        self.clamp_instances(self.initial_instances)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Capacity of the telemetry window.
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FanoutConfig {
    /// Per-observer send bound (e.g., "2s").
    pub broadcast_timeout: String,
    /// Frames buffered per observer before sends start to wait.
    pub observer_buffer: usize,
    /// Period of the `health_status` heartbeat broadcast.
    pub health_interval: String,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            broadcast_timeout: "2s".to_string(),
            observer_buffer: 64,
            health_interval: "30s".to_string(),
        }
    }
}

impl FanoutConfig {
    pub fn broadcast_timeout(&self) -> Duration {
        parse_duration(&self.broadcast_timeout).unwrap_or(Duration::from_secs(2))
    }

    pub fn health_interval(&self) -> Duration {
        parse_duration(&self.health_interval).unwrap_or(Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Bound on each forecast/anomaly call (e.g., "500ms").
    pub timeout: String,
    /// How far ahead the decision forecast looks (e.g., "1h").
    pub forecast_horizon: String,
    /// JSON file with adapter parameters. Built-in defaults when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_params: Option<PathBuf>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout: "500ms".to_string(),
            forecast_horizon: "1h".to_string(),
            model_params: None,
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_millis(500))
    }

    pub fn forecast_horizon(&self) -> Duration {
        parse_duration(&self.forecast_horizon).unwrap_or(Duration::from_secs(3600))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,scalewised=debug,scalewise=debug".to_string(),
            json: false,
        }
    }
}

/// Replays recorded telemetry through the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    /// JSON-lines file of `TelemetrySample` records.
    pub file: PathBuf,
    #[serde(default = "default_replay_interval")]
    pub interval: String,
    #[serde(default)]
    pub auto_execute: bool,
}

fn default_replay_interval() -> String {
    "30s".to_string()
}

impl ReplayConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(30))
    }
}

impl ScalewiseConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from an optional file, apply process environment overrides,
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = parse_override("PORT", &v)?;
        }
        if let Some(v) = lookup("MIN_INSTANCES") {
            self.scaling.min_instances = parse_override("MIN_INSTANCES", &v)?;
        }
        if let Some(v) = lookup("MAX_INSTANCES") {
            self.scaling.max_instances = parse_override("MAX_INSTANCES", &v)?;
        }
        if let Some(v) = lookup("ANOMALY_THRESHOLD") {
            self.scaling.anomaly_threshold = parse_override("ANOMALY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("INSTANCES_PER_LOAD_UNIT") {
            self.scaling.instances_per_load_unit =
                parse_override("INSTANCES_PER_LOAD_UNIT", &v)?;
        }
        if let Some(v) = lookup("HISTORY_CAPACITY") {
            self.history.capacity = parse_override("HISTORY_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("BROADCAST_TIMEOUT") {
            let v = v.trim();
            // Bare numbers are milliseconds.
            let normalized = match v.parse::<u64>() {
                Ok(ms) => format!("{ms}ms"),
                Err(_) => v.to_string(),
            };
            if parse_duration(&normalized).is_none() {
                return Err(ConfigError::Override {
                    key: "BROADCAST_TIMEOUT".to_string(),
                    value: v.to_string(),
                });
            }
            self.fanout.broadcast_timeout = normalized;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scaling;
        if s.max_instances == 0 {
            return Err(invalid("scaling.max_instances must be at least 1"));
        }
        if s.min_instances > s.max_instances {
            return Err(invalid(format!(
                "scaling.min_instances ({}) exceeds max_instances ({})",
                s.min_instances, s.max_instances
            )));
        }
        for (name, value) in [
            ("anomaly_threshold", s.anomaly_threshold),
            ("high_load_threshold", s.high_load_threshold),
            ("anomaly_confidence_penalty", s.anomaly_confidence_penalty),
            ("default_confidence", s.default_confidence),
            ("degraded_confidence_cap", s.degraded_confidence_cap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("scaling.{name} must be within [0, 1], got {value}")));
            }
        }
        if !(s.load_saturation > 0.0 && s.load_saturation.is_finite()) {
            return Err(invalid("scaling.load_saturation must be positive"));
        }
        if s.instances_per_load_unit == 0 {
            return Err(invalid("scaling.instances_per_load_unit must be at least 1"));
        }
        if !(s.anomaly_amplification >= 1.0 && s.anomaly_amplification.is_finite()) {
            return Err(invalid("scaling.anomaly_amplification must be >= 1"));
        }
        if self.history.capacity == 0 {
            return Err(invalid("history.capacity must be at least 1"));
        }
        if self.fanout.observer_buffer == 0 {
            return Err(invalid("fanout.observer_buffer must be at least 1"));
        }

        let mut durations = vec![
            ("fanout.broadcast_timeout", &self.fanout.broadcast_timeout),
            ("fanout.health_interval", &self.fanout.health_interval),
            ("providers.timeout", &self.providers.timeout),
            ("providers.forecast_horizon", &self.providers.forecast_horizon),
        ];
        if let Some(replay) = &self.replay {
            durations.push(("replay.interval", &replay.interval));
        }
        for (name, value) in durations {
            if parse_duration(value).is_none() {
                return Err(invalid(format!("{name}: unrecognized duration {value:?}")));
            }
        }
        Ok(())
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins = mins.trim().parse::<u64>().ok()?;
        mins.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours = hours.trim().parse::<u64>().ok()?;
        hours.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::Override {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
