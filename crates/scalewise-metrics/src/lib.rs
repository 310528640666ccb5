//! scalewise-metrics: telemetry retention and exposition.
//!
//! # Architecture
//!
//! ```text
//! MetricsWindow (ring buffer, capacity N)
//!   ├── push()    ← telemetry ingestion, evicts oldest at capacity
//!   ├── range()   → lazy iterator over samples since a timestamp
//!   └── average() → per-field means over a trailing duration
//!
//! DerivedMetrics
//!   └── from_sample() → load trend, CPU/memory/disk ratios
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod derived;
pub mod prometheus;
pub mod window;

pub use derived::DerivedMetrics;
pub use prometheus::{Exposition, render_prometheus};
pub use window::{MetricsWindow, SharedWindow, WindowAverage};
