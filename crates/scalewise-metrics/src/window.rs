//! Metrics window: bounded, time-ordered buffer of recent samples.
//!
//! Insertion order is arrival order; once `capacity` is reached each
//! push evicts the oldest sample.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::trace;

use scalewise_core::TelemetrySample;

/// A window shared between the telemetry writer and its readers.
pub type SharedWindow = Arc<RwLock<MetricsWindow>>;

/// Per-field means, keyed by field name. Empty when no samples qualify.
pub type WindowAverage = BTreeMap<String, f64>;

/// Fixed-capacity FIFO of telemetry samples.
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
}

impl MetricsWindow {
    /// Create an empty window. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Create an empty window wrapped for sharing across tasks.
    pub fn shared(capacity: usize) -> SharedWindow {
        Arc::new(RwLock::new(Self::new(capacity)))
    }

    /// Append a sample, returning the evicted one if the window was full.
    pub fn push(&mut self, sample: TelemetrySample) -> Option<TelemetrySample> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            trace!(timestamp = %old.timestamp, "evicted oldest sample");
        }
        self.samples.push_back(sample);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed sample.
    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    /// All retained samples with `timestamp >= since`, in arrival order.
    ///
    /// The iterator is lazy and `Clone`, so a caller can restart it from
    /// the beginning without touching the window again.
    pub fn range(
        &self,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &TelemetrySample> + Clone + '_ {
        self.samples.iter().filter(move |s| s.timestamp >= since)
    }

    /// Means over samples in the trailing `window` ending now.
    pub fn average(&self, window: Duration) -> WindowAverage {
        self.average_at(window, Utc::now())
    }

    /// Means over samples with `timestamp >= now - window`.
    ///
    /// Optional fields are averaged over the samples that carry them.
    pub fn average_at(&self, window: Duration, now: DateTime<Utc>) -> WindowAverage {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut sums: BTreeMap<&'static str, (f64, usize)> = BTreeMap::new();
        for sample in self.range(cutoff) {
            let optional = [
                ("requests_per_ip", sample.requests_per_ip),
                ("source_variety", sample.source_variety),
            ];
            let fields = sample
                .numeric_fields()
                .into_iter()
                .chain(optional.into_iter().filter_map(|(f, v)| v.map(|v| (f, v))));
            for (field, value) in fields {
                let entry = sums.entry(field).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }

        sums.into_iter()
            .map(|(field, (sum, n))| (field.to_string(), sum / n as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(secs_ago: i64, load: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: base_time() - chrono::Duration::seconds(secs_ago),
            load_1m: load,
            load_5m: load / 2.0,
            ..Default::default()
        }
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut window = MetricsWindow::new(3);
        for i in 0..10 {
            window.push(sample_at(100 - i, i as f64));
            assert!(window.len() <= 3);
        }
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn oldest_evicted_first() {
        let capacity = 5;
        let mut window = MetricsWindow::new(capacity);
        for i in 0..capacity {
            assert!(window.push(sample_at(100, i as f64)).is_none());
        }

        let evicted = window.push(sample_at(0, 99.0)).unwrap();
        assert_eq!(evicted.load_1m, 0.0);

        let loads: Vec<f64> = window
            .range(DateTime::<Utc>::MIN_UTC)
            .map(|s| s.load_1m)
            .collect();
        assert!(!loads.contains(&0.0));
        assert_eq!(loads.last(), Some(&99.0));
        assert_eq!(window.latest().unwrap().load_1m, 99.0);
    }

    #[test]
    fn range_filters_and_preserves_order() {
        let mut window = MetricsWindow::new(10);
        window.push(sample_at(300, 1.0));
        window.push(sample_at(120, 2.0));
        window.push(sample_at(60, 3.0));
        window.push(sample_at(0, 4.0));

        let since = base_time() - chrono::Duration::seconds(120);
        let loads: Vec<f64> = window.range(since).map(|s| s.load_1m).collect();
        assert_eq!(loads, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn range_is_restartable() {
        let mut window = MetricsWindow::new(10);
        window.push(sample_at(10, 1.0));
        window.push(sample_at(5, 2.0));

        let iter = window.range(DateTime::<Utc>::MIN_UTC);
        let first: Vec<f64> = iter.clone().map(|s| s.load_1m).collect();
        let second: Vec<f64> = iter.map(|s| s.load_1m).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn average_over_trailing_window() {
        let mut window = MetricsWindow::new(10);
        window.push(sample_at(600, 100.0)); // outside a 5 minute window
        window.push(sample_at(120, 2.0));
        window.push(sample_at(30, 4.0));

        let avg = window.average_at(Duration::from_secs(300), base_time());
        assert_eq!(avg["load_1m"], 3.0);
        assert_eq!(avg["load_5m"], 1.5);
        assert!(!avg.contains_key("requests_per_ip"));
    }

    #[test]
    fn average_optional_fields_over_present_samples() {
        let mut window = MetricsWindow::new(10);
        let mut with_rpi = sample_at(10, 1.0);
        with_rpi.requests_per_ip = Some(12.0);
        window.push(with_rpi);
        window.push(sample_at(5, 1.0));

        let avg = window.average_at(Duration::from_secs(60), base_time());
        assert_eq!(avg["requests_per_ip"], 12.0);
    }

    #[test]
    fn average_empty_when_nothing_qualifies() {
        let mut window = MetricsWindow::new(10);
        assert!(window.average_at(Duration::from_secs(60), base_time()).is_empty());

        window.push(sample_at(3600, 1.0));
        assert!(window.average_at(Duration::from_secs(60), base_time()).is_empty());
    }

    #[tokio::test]
    async fn shared_window_accepts_concurrent_writers() {
        let window = MetricsWindow::shared(50);
        let mut handles = Vec::new();
        for task in 0..4 {
            let window = window.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    window.write().await.push(sample_at(0, (task * 100 + i) as f64));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(window.read().await.len(), 50);
    }
}
