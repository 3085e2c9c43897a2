//! In-memory metrics: monotonic counters and fixed-capacity histograms.
//!
//! Both primitives live in concurrent maps keyed by metric name. Counters are
//! plain atomics; each histogram sits behind its own mutex so recording into
//! one metric never blocks another. Histograms are ring buffers that keep the
//! most recent `capacity` samples and overwrite the oldest once full.

pub mod handlers;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;

pub const DEFAULT_HISTOGRAM_CAPACITY: usize = 512;

// ────────────────────────────────────────────────────────────────────────────
// Histogram
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity ring buffer of recent samples.
#[derive(Debug, Clone)]
pub struct Histogram {
    samples: Vec<f64>,
    capacity: usize,
    /// Next write position once the buffer is full.
    head: usize,
    /// Samples ever recorded, including overwritten ones.
    total: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistogramSummary {
    pub count: usize,
    pub total_recorded: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Histogram {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            total: 0,
        }
    }

    pub fn record(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.head] = value;
            self.head = (self.head + 1) % self.capacity;
        }
        self.total = self.total.saturating_add(1);
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

    /// Retained samples, oldest first.
    pub fn values(&self) -> Vec<f64> {
        if self.samples.len() < self.capacity {
            return self.samples.clone();
        }
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&self.samples[self.head..]);
        out.extend_from_slice(&self.samples[..self.head]);
        out
    }

    pub fn last(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        if self.samples.len() < self.capacity {
            return self.samples.last().copied();
        }
        let idx = (self.head + self.capacity - 1) % self.capacity;
        Some(self.samples[idx])
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Nearest-rank percentile over the retained window. `p` is in [0, 100].
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(nearest_rank(&sorted, p))
    }

    pub fn summary(&self) -> Option<HistogramSummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let sum: f64 = sorted.iter().sum();
        Some(HistogramSummary {
            count: sorted.len(),
            total_recorded: self.total,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg: sum / sorted.len() as f64,
            p50: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
        })
    }
}

fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let p = p.clamp(0.0, 100.0);
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

// ────────────────────────────────────────────────────────────────────────────
// Collector
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Shared metrics sink. Cheap to clone; clones share the same maps.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    counters: DashMap<String, Arc<AtomicU64>>,
    histograms: DashMap<String, Arc<Mutex<Histogram>>>,
    histogram_capacity: usize,
}

impl MetricsCollector {
    pub fn new(histogram_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                counters: DashMap::new(),
                histograms: DashMap::new(),
                histogram_capacity: histogram_capacity.max(1),
            }),
        }
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, delta: u64) {
        self.counter(name).fetch_add(delta, Ordering::Relaxed);
    }

    pub fn counter_value(&self, name: &str) -> u64 {
        self.inner
            .counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn record(&self, name: &str, value: f64) {
        let histogram = self.histogram(name);
        // A poisoned histogram only means a panic mid-record; the buffer is still usable.
        let mut guard = histogram.lock().unwrap_or_else(|e| e.into_inner());
        guard.record(value);
    }

    pub fn histogram_summary(&self, name: &str) -> Option<HistogramSummary> {
        let histogram = self.inner.histograms.get(name)?.clone();
        let guard = histogram.lock().unwrap_or_else(|e| e.into_inner());
        guard.summary()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .inner
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        // Clone the handles first so no map shard is held while locking a histogram.
        let handles: Vec<(String, Arc<Mutex<Histogram>>)> = self
            .inner
            .histograms
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let histograms = handles
            .into_iter()
            .filter_map(|(name, h)| {
                let guard = h.lock().unwrap_or_else(|e| e.into_inner());
                guard.summary().map(|s| (name, s))
            })
            .collect();

        MetricsSnapshot {
            counters,
            histograms,
        }
    }

    fn counter(&self, name: &str) -> Arc<AtomicU64> {
        if let Some(c) = self.inner.counters.get(name) {
            return c.clone();
        }
        self.inner
            .counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    fn histogram(&self, name: &str) -> Arc<Mutex<Histogram>> {
        if let Some(h) = self.inner.histograms.get(name) {
            return h.clone();
        }
        let capacity = self.inner.histogram_capacity;
        self.inner
            .histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Histogram::new(capacity))))
            .clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_HISTOGRAM_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_overwrites_oldest_when_full() {
        let mut h = Histogram::new(3);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            h.record(v);
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.values(), vec![3.0, 4.0, 5.0]);
        assert_eq!(h.last(), Some(5.0));
        assert_eq!(h.summary().unwrap().total_recorded, 5);
    }

    #[test]
    fn test_histogram_never_exceeds_capacity() {
        let mut h = Histogram::new(16);
        for i in 0..10_000 {
            h.record(i as f64);
        }
        assert_eq!(h.len(), 16);
        assert_eq!(h.capacity(), 16);
    }

    #[test]
    fn test_percentiles_nearest_rank() {
        let mut h = Histogram::new(100);
        for i in 1..=100 {
            h.record(i as f64);
        }
        assert_eq!(h.percentile(50.0), Some(50.0));
        assert_eq!(h.percentile(95.0), Some(95.0));
        assert_eq!(h.percentile(100.0), Some(100.0));
        assert_eq!(h.percentile(0.0), Some(1.0));
        assert!((h.average().unwrap() - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_histogram_has_no_summary() {
        let h = Histogram::new(4);
        assert!(h.summary().is_none());
        assert!(h.percentile(50.0).is_none());
        assert!(h.last().is_none());
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let mut h = Histogram::new(4);
        h.record(f64::NAN);
        h.record(f64::INFINITY);
        assert!(h.is_empty());
    }

    #[test]
    fn test_counters_are_monotonic_and_independent() {
        let metrics = MetricsCollector::new(8);
        metrics.increment("decision.total");
        metrics.increment("decision.total");
        metrics.add("probe.failure", 3);
        assert_eq!(metrics.counter_value("decision.total"), 2);
        assert_eq!(metrics.counter_value("probe.failure"), 3);
        assert_eq!(metrics.counter_value("missing"), 0);
    }

    #[test]
    fn test_snapshot_includes_counters_and_histograms() {
        let metrics = MetricsCollector::new(8);
        metrics.increment("a");
        metrics.record("latency_ms", 12.0);
        metrics.record("latency_ms", 18.0);

        let snap = metrics.snapshot();
        assert_eq!(snap.counters.get("a"), Some(&1));
        let lat = snap.histograms.get("latency_ms").unwrap();
        assert_eq!(lat.count, 2);
        assert_eq!(lat.max, 18.0);
        assert!((lat.avg - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let metrics = MetricsCollector::new(8);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.increment("hits");
                        m.record("values", 1.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.counter_value("hits"), 8000);
        assert_eq!(
            metrics.histogram_summary("values").unwrap().total_recorded,
            8000
        );
    }
}
