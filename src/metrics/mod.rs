//! # Metrics
//!
//! Recorder seam for counters, histograms and gauges emitted by the executor
//! and the workflow engine. [`NoopMetrics`] is the default;
//! [`InMemoryMetrics`] keeps everything in concurrent maps for tests and for
//! embedding applications that scrape values themselves.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label pairs attached to a sample
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Metrics collection trait for integration with monitoring systems
pub trait MetricsRecorder: Send + Sync {
    fn increment_counter(&self, name: &str, value: u64, labels: Labels<'_>);

    fn record_histogram(&self, name: &str, value: f64, labels: Labels<'_>);

    fn set_gauge(&self, name: &str, value: f64, labels: Labels<'_>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn increment_counter(&self, _name: &str, _value: u64, _labels: Labels<'_>) {}

    fn record_histogram(&self, _name: &str, _value: f64, _labels: Labels<'_>) {}

    fn set_gauge(&self, _name: &str, _value: f64, _labels: Labels<'_>) {}
}

/// Summary of the observations recorded for one histogram key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
    pub gauges: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, u64>,
    histograms: DashMap<String, HistogramSummary>,
    gauges: DashMap<String, f64>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter value for `name` with exactly `labels`
    pub fn counter(&self, name: &str, labels: Labels<'_>) -> u64 {
        self.counters
            .get(&metric_key(name, labels))
            .map(|value| *value)
            .unwrap_or(0)
    }

    /// Sum of a counter across every label set
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|entry| key_name(entry.key()) == name)
            .map(|entry| *entry.value())
            .sum()
    }

    pub fn histogram(&self, name: &str, labels: Labels<'_>) -> Option<HistogramSummary> {
        self.histograms
            .get(&metric_key(name, labels))
            .map(|summary| *summary)
    }

    pub fn gauge(&self, name: &str, labels: Labels<'_>) -> Option<f64> {
        self.gauges.get(&metric_key(name, labels)).map(|value| *value)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn increment_counter(&self, name: &str, value: u64, labels: Labels<'_>) {
        *self.counters.entry(metric_key(name, labels)).or_insert(0) += value;
    }

    fn record_histogram(&self, name: &str, value: f64, labels: Labels<'_>) {
        self.histograms
            .entry(metric_key(name, labels))
            .and_modify(|summary| summary.observe(value))
            .or_insert_with(|| HistogramSummary::first(value));
    }

    fn set_gauge(&self, name: &str, value: f64, labels: Labels<'_>) {
        self.gauges.insert(metric_key(name, labels), value);
    }
}

/// `name{a=1,b=2}` with labels sorted by key
fn metric_key(name: &str, labels: Labels<'_>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

fn key_name(key: &str) -> &str {
    key.split('{').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_labels_are_order_independent() {
        let metrics = InMemoryMetrics::new();
        metrics.increment_counter("crew.dispatch", 1, &[("crew", "a"), ("status", "ok")]);
        metrics.increment_counter("crew.dispatch", 2, &[("status", "ok"), ("crew", "a")]);
        metrics.increment_counter("crew.dispatch", 5, &[("crew", "b"), ("status", "ok")]);

        assert_eq!(metrics.counter("crew.dispatch", &[("crew", "a"), ("status", "ok")]), 3);
        assert_eq!(metrics.counter_total("crew.dispatch"), 8);
        assert_eq!(metrics.counter("missing", &[]), 0);
    }

    #[test]
    fn test_histogram_summary() {
        let metrics = InMemoryMetrics::new();
        for value in [4.0, 1.0, 7.0] {
            metrics.record_histogram("step.duration_ms", value, &[]);
        }
        let summary = metrics.histogram("step.duration_ms", &[]).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 7.0);
        assert!((summary.mean() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gauge_overwrites_and_snapshot() {
        let metrics = InMemoryMetrics::new();
        metrics.set_gauge("executor.active", 3.0, &[]);
        metrics.set_gauge("executor.active", 1.0, &[]);
        assert_eq!(metrics.gauge("executor.active", &[]), Some(1.0));
        assert_eq!(metrics.snapshot().gauges.get("executor.active"), Some(&1.0));
    }
}
