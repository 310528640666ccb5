//! scalewise-controller: owns the active instance count.
//!
//! `ScalingController` wires the decision engine to the external
//! providers, the telemetry window and the connection registry. It
//! evaluates samples without touching state, applies decisions under a
//! single exclusive lock, and notifies observers of both.

pub mod controller;
pub mod replay;

pub use controller::{
    AnomalyReport, ControllerError, HealthReport, ProviderInfo, ScalingController, ScalingStatus,
    STATUS_HISTORY_LEN, STATUS_LOAD_WINDOW,
};
pub use replay::ReplaySource;
