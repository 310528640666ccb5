//! Derived load, CPU, memory, and disk figures for a single sample.

use serde::Serialize;

use scalewise_core::TelemetrySample;

/// Guard for ratio denominators.
const MIN_DENOMINATOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedMetrics {
    /// `(load_1m - load_15m) / load_15m`; positive when load is rising.
    pub load_trend: f64,
    pub cpu_total: f64,
    pub cpu_user_ratio: f64,
    pub cpu_system_ratio: f64,
    pub cpu_iowait_ratio: f64,
    pub memory_used: f64,
    pub memory_usage_ratio: f64,
    pub memory_available_ratio: f64,
    pub disk_total_io: f64,
    pub disk_read_ratio: f64,
    pub disk_write_ratio: f64,
}

impl DerivedMetrics {
    pub fn from_sample(s: &TelemetrySample) -> Self {
        let cpu_total = s.cpu_user + s.cpu_system + s.cpu_iowait;
        let memory_used = s.sys_mem_total - s.sys_mem_available;
        let disk_total_io = s.disk_io_read + s.disk_io_write;

        Self {
            load_trend: ratio(s.load_1m - s.load_15m, s.load_15m),
            cpu_total,
            cpu_user_ratio: ratio(s.cpu_user, cpu_total),
            cpu_system_ratio: ratio(s.cpu_system, cpu_total),
            cpu_iowait_ratio: ratio(s.cpu_iowait, cpu_total),
            memory_used,
            memory_usage_ratio: ratio(memory_used, s.sys_mem_total),
            memory_available_ratio: ratio(s.sys_mem_available, s.sys_mem_total),
            disk_total_io,
            disk_read_ratio: ratio(s.disk_io_read, disk_total_io),
            disk_write_ratio: ratio(s.disk_io_write, disk_total_io),
        }
    }

    /// Weighted load/CPU/memory pressure in [0, 1].
    ///
    /// `0.4 * min(load_1m / 10, 1) + 0.4 * min(cpu_total / 100, 1)
    ///  + 0.2 * memory_usage_ratio`, capped at 1.
    pub fn pressure_score(&self, load_1m: f64) -> f64 {
        let load_score = (load_1m / 10.0).min(1.0);
        let cpu_score = (self.cpu_total / 100.0).min(1.0);
        let score = load_score * 0.4 + cpu_score * 0.4 + self.memory_usage_ratio * 0.2;
        score.clamp(0.0, 1.0)
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    numerator / denominator.max(MIN_DENOMINATOR)
}
