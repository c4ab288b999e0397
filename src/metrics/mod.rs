//! # Metrics and Health Aggregation
//!
//! In-process counters and bounded latency reservoirs, per provider and per
//! task kind. Exposed read-only through [`MetricsAggregator::snapshot`] for
//! external monitoring to poll; recording never blocks on anything but a short
//! per-series lock. Every provider attempt and every terminal task outcome is
//! recorded here — no component swallows a failure silently.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Bounded per-series reservoir size.
const LATENCY_RESERVOIR: usize = 256;

#[derive(Debug, Default)]
struct SeriesInner {
    total: u64,
    success: u64,
    failure: u64,
    /// Recent latencies in milliseconds, newest last
    latencies_ms: VecDeque<u64>,
}

impl SeriesInner {
    fn record(&mut self, ok: bool, latency: Duration) {
        self.total += 1;
        if ok {
            self.success += 1;
        } else {
            self.failure += 1;
        }
        self.latencies_ms.push_back(latency.as_millis() as u64);
        while self.latencies_ms.len() > LATENCY_RESERVOIR {
            self.latencies_ms.pop_front();
        }
    }

    fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            total: self.total,
            success: self.success,
            failure: self.failure,
            success_rate: if self.total > 0 {
                self.success as f64 / self.total as f64
            } else {
                0.0
            },
            p50_latency_ms: percentile(&self.latencies_ms, 0.50),
            p95_latency_ms: percentile(&self.latencies_ms, 0.95),
        }
    }
}

/// Read-only view of one counter series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub success_rate: f64,
    pub p50_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
}

/// Full snapshot polled by external monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub providers: HashMap<String, SeriesSnapshot>,
    pub task_kinds: HashMap<String, SeriesSnapshot>,
}

/// Collects latency and outcome counts per provider and per task kind.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    providers: DashMap<String, Mutex<SeriesInner>>,
    task_kinds: DashMap<String, Mutex<SeriesInner>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one provider call attempt (success or failure), with latency.
    pub fn record_provider_attempt(&self, provider: &str, ok: bool, latency: Duration) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .lock()
            .record(ok, latency);
    }

    /// Record one terminal task outcome with its total run duration.
    pub fn record_task(&self, kind: &str, ok: bool, duration: Duration) {
        self.task_kinds
            .entry(kind.to_string())
            .or_default()
            .lock()
            .record(ok, duration);
    }

    /// Snapshot for one provider, if it has recorded attempts.
    pub fn provider_series(&self, provider: &str) -> Option<SeriesSnapshot> {
        self.providers.get(provider).map(|s| s.lock().snapshot())
    }

    /// Read-only snapshot of everything.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            providers: self
                .providers
                .iter()
                .map(|e| (e.key().clone(), e.value().lock().snapshot()))
                .collect(),
            task_kinds: self
                .task_kinds
                .iter()
                .map(|e| (e.key().clone(), e.value().lock().snapshot()))
                .collect(),
        }
    }
}

/// Nearest-rank percentile over the reservoir.
fn percentile(values: &VecDeque<u64>, q: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<u64> = values.iter().copied().collect();
    sorted.sort_unstable();
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    Some(sorted[rank - 1])
}
