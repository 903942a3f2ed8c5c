use ahash::AHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Latency buckets in milliseconds.
const LATENCY_BUCKETS_MS: [u64; 10] = [1, 5, 10, 25, 50, 100, 250, 1000, 5000, 30000];

#[derive(Debug)]
struct Histogram {
    counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            counts: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        for (i, boundary) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if value_ms <= *boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn summary(&self) -> HistogramSummary {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        HistogramSummary {
            count,
            sum_ms: sum,
            mean_ms: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
            buckets: LATENCY_BUCKETS_MS
                .iter()
                .zip(&self.counts)
                .map(|(le, c)| (*le, c.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum_ms: u64,
    pub mean_ms: f64,
    /// `(upper bound ms, cumulative count)` pairs.
    pub buckets: Vec<(u64, u64)>,
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Counters and latency histograms for one controller instance.
///
/// Counter keys are `name` or `name{label}`, e.g. `signals_total{browser}`.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<String, AtomicU64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn key(name: &str, label: Option<&str>) -> String {
    match label {
        Some(l) => format!("{name}{{{l}}}"),
        None => name.to_string(),
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(&key(name, None), 1);
    }

    pub fn increment_labeled(&self, name: &str, label: &str) {
        self.increment_by(&key(name, Some(label)), 1);
    }

    fn increment_by(&self, key: &str, amount: u64) {
        {
            let map = read(&self.counters);
            if let Some(c) = map.get(key) {
                c.fetch_add(amount, Ordering::Relaxed);
                return;
            }
        }
        let mut map = write(&self.counters);
        map.entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.lookup(&key(name, None))
    }

    pub fn counter_labeled(&self, name: &str, label: &str) -> u64 {
        self.lookup(&key(name, Some(label)))
    }

    fn lookup(&self, key: &str) -> u64 {
        read(&self.counters)
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a latency observation in milliseconds.
    pub fn observe_ms(&self, name: &str, value_ms: u64) {
        {
            let map = read(&self.histograms);
            if let Some(h) = map.get(name) {
                h.observe(value_ms);
                return;
            }
        }
        let mut map = write(&self.histograms);
        map.entry(name.to_string())
            .or_insert_with(Histogram::new)
            .observe(value_ms);
    }

    /// Point-in-time copy, with keys sorted for stable output.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = read(&self.counters)
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        let histograms = read(&self.histograms)
            .iter()
            .map(|(k, h)| (k.clone(), h.summary()))
            .collect();
        MetricsSnapshot {
            counters,
            histograms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}
