//! Latency instrumentation
//!
//! A rolling window of recent samples per named metric. Recording never
//! blocks on I/O and never changes control flow.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Samples kept per metric
pub const MAX_SAMPLES: usize = 100;

pub const RENDER: &str = "render";
pub const CACHE_HIT: &str = "cache_hit";
pub const LOAD: &str = "load";
pub const TEXT_LAYER: &str = "text_layer";

/// Shared latency recorder
#[derive(Clone, Default)]
pub struct PerformanceMonitor {
    samples: Arc<Mutex<HashMap<String, VecDeque<f64>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub count: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, metric: &str, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        tracing::debug!(metric, elapsed_ms = ms, "Timing");

        let mut samples = self.samples.lock();
        let window = samples.entry(metric.to_string()).or_default();
        if window.len() == MAX_SAMPLES {
            window.pop_front();
        }
        window.push_back(ms);
    }

    /// Start a timer that records into `metric` when dropped
    pub fn time(&self, metric: &'static str) -> TimingGuard {
        TimingGuard {
            monitor: self.clone(),
            metric,
            started: Instant::now(),
            cancelled: false,
        }
    }

    pub fn summary(&self, metric: &str) -> Option<MetricSummary> {
        let samples = self.samples.lock();
        samples.get(metric).and_then(|window| summarize(window))
    }

    pub fn summaries(&self) -> BTreeMap<String, MetricSummary> {
        let samples = self.samples.lock();
        samples
            .iter()
            .filter_map(|(name, window)| summarize(window).map(|s| (name.clone(), s)))
            .collect()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

fn summarize(window: &VecDeque<f64>) -> Option<MetricSummary> {
    if window.is_empty() {
        return None;
    }

    let mut sorted: Vec<f64> = window.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let p95_index = ((count as f64 * 0.95).ceil() as usize).saturating_sub(1);

    Some(MetricSummary {
        count,
        mean_ms: sorted.iter().sum::<f64>() / count as f64,
        min_ms: sorted[0],
        max_ms: sorted[count - 1],
        p95_ms: sorted[p95_index.min(count - 1)],
    })
}

/// Records elapsed time on drop unless cancelled
pub struct TimingGuard {
    monitor: PerformanceMonitor,
    metric: &'static str,
    started: Instant,
    cancelled: bool,
}

impl TimingGuard {
    /// Drop without recording, e.g. when the timed operation failed
    pub fn cancel(mut self) {
        self.cancelled = true;
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.cancelled {
            self.monitor.record(self.metric, self.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_statistics() {
        let monitor = PerformanceMonitor::new();
        for ms in 1..=20u64 {
            monitor.record(RENDER, Duration::from_millis(ms));
        }

        let summary = monitor.summary(RENDER).unwrap();
        assert_eq!(summary.count, 20);
        assert!((summary.mean_ms - 10.5).abs() < 1e-6);
        assert!((summary.min_ms - 1.0).abs() < 1e-6);
        assert!((summary.max_ms - 20.0).abs() < 1e-6);
        assert!((summary.p95_ms - 19.0).abs() < 1e-6);
        assert!(monitor.summary(CACHE_HIT).is_none());
    }

    #[test]
    fn test_window_keeps_latest_samples() {
        let monitor = PerformanceMonitor::new();
        for ms in 0..150u64 {
            monitor.record(LOAD, Duration::from_millis(ms));
        }

        let summary = monitor.summary(LOAD).unwrap();
        assert_eq!(summary.count, MAX_SAMPLES);
        assert!((summary.min_ms - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_guard_records_unless_cancelled() {
        let monitor = PerformanceMonitor::new();
        drop(monitor.time(TEXT_LAYER));
        monitor.time(RENDER).cancel();

        let summaries = monitor.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[TEXT_LAYER].count, 1);
    }
}
